//! A single migration script.

use serde::{Deserialize, Serialize};

use crate::types::{Fingerprint, MigrationId};

/// Marker separating statements inside one migration body.
pub const STATEMENT_BREAKPOINT: &str = "--> statement-breakpoint";

/// An immutable migration script: id, name, opaque body and fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    id: MigrationId,
    name: String,
    body: String,
    fingerprint: Fingerprint,
}

impl Migration {
    /// Create a migration, fingerprinting its body.
    pub fn new(id: impl Into<MigrationId>, name: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let fingerprint = Fingerprint::of(&body);
        Self {
            id: id.into(),
            name: name.into(),
            body,
            fingerprint,
        }
    }

    /// Create a migration with a fingerprint supplied by the build layer.
    pub fn with_fingerprint(
        id: impl Into<MigrationId>,
        name: impl Into<String>,
        body: impl Into<String>,
        fingerprint: Fingerprint,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            body: body.into(),
            fingerprint,
        }
    }

    pub fn id(&self) -> MigrationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Split the body into the statements executed one after another.
    ///
    /// Chunks are separated by [`STATEMENT_BREAKPOINT`]; blank chunks are
    /// skipped. A body without breakpoints is a single chunk.
    pub fn statements(&self) -> Vec<&str> {
        self.body
            .split(STATEMENT_BREAKPOINT)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}
