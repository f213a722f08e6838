//! Typed boundary between application records and SQL rows.
//!
//! Collection and column names are validated and quoted here. Records are
//! written through `serde_json` and read back with [`RowDeserializer`], so
//! entity structs can be inserted and selected without hand-written row
//! mapping.

use serde::de::value::{SeqDeserializer, StrDeserializer};
use serde::de::{self, DeserializeSeed, IntoDeserializer, MapAccess, Visitor};
use serde::Deserializer;
use serde_json::Value as Json;
use stowage_store::{Row, Value, LEDGER_TABLE};

use crate::error::{Result, StowageError};

/// Equality predicates ANDed together. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Match every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match rows whose `column` equals `value` (NULL-safe).
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(column, value)
    }

    pub fn and_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((column.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Render as a WHERE clause whose placeholders start after `offset`.
    pub(crate) fn to_sql(&self, offset: usize) -> Result<(String, Vec<Value>)> {
        if self.clauses.is_empty() {
            return Ok((String::new(), Vec::new()));
        }

        let mut parts = Vec::with_capacity(self.clauses.len());
        let mut params = Vec::with_capacity(self.clauses.len());
        for (i, (column, value)) in self.clauses.iter().enumerate() {
            parts.push(format!("{} IS ?{}", quote_ident(column)?, offset + i + 1));
            params.push(value.clone());
        }

        Ok((format!(" WHERE {}", parts.join(" AND ")), params))
    }
}

/// Validate and double-quote an identifier.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*`; SQLite internals and the ledger are
/// not addressable.
pub(crate) fn quote_ident(name: &str) -> Result<String> {
    let mut chars = name.chars();
    let well_formed = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    let reserved = name.eq_ignore_ascii_case(LEDGER_TABLE)
        || name.to_ascii_lowercase().starts_with("sqlite_");

    if well_formed && !reserved {
        Ok(format!("\"{}\"", name))
    } else {
        Err(StowageError::InvalidIdentifier(name.to_string()))
    }
}

/// Flatten a serialized record into `(column, value)` pairs.
///
/// The record must serialize to a JSON object. Booleans become 0/1, nested
/// arrays and objects are stored as JSON text; [`RowDeserializer`] reads
/// both back.
pub(crate) fn json_to_columns(json: Json) -> Result<Vec<(String, Value)>> {
    match json {
        Json::Object(object) => Ok(object
            .into_iter()
            .map(|(column, value)| (column, json_to_value(value)))
            .collect()),
        other => Err(StowageError::Record(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

fn json_to_value(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Integer(i64::from(b)),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
        },
        Json::String(s) => Value::Text(s),
        nested @ (Json::Array(_) | Json::Object(_)) => Value::Text(nested.to_string()),
    }
}

type DeResult<T> = std::result::Result<T, serde_json::Error>;

/// Reads a row as a map of column name to value.
///
/// Each column is shaped by what the target field asks for: integers read
/// as `bool`, JSON text reads as a sequence, map, struct or enum, and blobs
/// read as bytes or a byte sequence.
pub(crate) struct RowDeserializer<'a> {
    row: &'a Row,
}

impl<'a> RowDeserializer<'a> {
    pub(crate) fn new(row: &'a Row) -> Self {
        Self { row }
    }
}

impl<'de, 'a> Deserializer<'de> for RowDeserializer<'a> {
    type Error = serde_json::Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> DeResult<V::Value> {
        visitor.visit_map(Columns {
            columns: self.row.iter(),
            pending: None,
        })
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

struct Columns<'a, I> {
    columns: I,
    pending: Option<&'a Value>,
}

impl<'de, 'a, I> MapAccess<'de> for Columns<'a, I>
where
    I: Iterator<Item = (&'a str, &'a Value)>,
{
    type Error = serde_json::Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> DeResult<Option<K::Value>> {
        let Some((column, value)) = self.columns.next() else {
            return Ok(None);
        };
        self.pending = Some(value);
        let key: StrDeserializer<'_, serde_json::Error> = column.into_deserializer();
        seed.deserialize(key).map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> DeResult<V::Value> {
        let value = self
            .pending
            .take()
            .ok_or_else(|| de::Error::custom("column value requested before its name"))?;
        seed.deserialize(ColumnDeserializer(value))
    }
}

#[derive(Clone, Copy)]
struct ColumnDeserializer<'a>(&'a Value);

impl<'de, 'a> Deserializer<'de> for ColumnDeserializer<'a> {
    type Error = serde_json::Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> DeResult<V::Value> {
        match self.0 {
            Value::Null => visitor.visit_unit(),
            Value::Integer(i) => visitor.visit_i64(*i),
            Value::Real(f) => visitor.visit_f64(*f),
            Value::Text(s) => visitor.visit_str(s),
            Value::Blob(b) => visitor.visit_bytes(b),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> DeResult<V::Value> {
        match self.0 {
            Value::Integer(i) => visitor.visit_bool(*i != 0),
            // TEXT affinity stores 0/1 as text
            Value::Text(s) if s == "0" || s == "false" => visitor.visit_bool(false),
            Value::Text(s) if s == "1" || s == "true" => visitor.visit_bool(true),
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> DeResult<V::Value> {
        match self.0 {
            Value::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> DeResult<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> DeResult<V::Value> {
        match self.0 {
            Value::Text(s) => serde_json::from_str::<Json>(s)?.deserialize_seq(visitor),
            Value::Blob(b) => {
                let bytes: SeqDeserializer<_, serde_json::Error> =
                    SeqDeserializer::new(b.iter().copied());
                bytes.deserialize_seq(visitor)
            }
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> DeResult<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> DeResult<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> DeResult<V::Value> {
        match self.0 {
            Value::Text(s) => serde_json::from_str::<Json>(s)?.deserialize_map(visitor),
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> DeResult<V::Value> {
        match self.0 {
            Value::Text(s) => serde_json::from_str::<Json>(s)?.deserialize_struct(name, fields, visitor),
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> DeResult<V::Value> {
        match self.0 {
            // Data-carrying variants were stored as JSON objects, unit
            // variants as their bare name.
            Value::Text(s) if s.starts_with('{') => {
                serde_json::from_str::<Json>(s)?.deserialize_enum(name, variants, visitor)
            }
            Value::Text(s) => {
                let unit: StrDeserializer<'_, serde_json::Error> = s.as_str().into_deserializer();
                unit.deserialize_enum(name, variants, visitor)
            }
            _ => self.deserialize_any(visitor),
        }
    }

    serde::forward_to_deserialize_any! {
        i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct identifier ignored_any
    }
}
