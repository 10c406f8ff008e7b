//! Cross-Service Identifier Mapping
//!
//! Some local agents (anime databases in particular) identify items in a
//! namespace the remote account service does not understand. An external
//! mapping database translates those identifiers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::media::IdentityKey;

/// A translated identifier in a namespace the remote service understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMatch {
    pub service: String,
    pub id: String,
    /// Season the source identifier maps to, for per-season anime entries
    pub season: Option<u32>,
}

impl RemoteMatch {
    pub fn key(&self) -> IdentityKey {
        IdentityKey::new(self.service.clone(), self.id.clone())
    }
}

/// Identifier mapping service trait
#[async_trait]
pub trait IdMappingService: Send + Sync {
    /// Translate `(service, id)`, optionally disambiguated by a context identifier
    async fn lookup(
        &self,
        service: &str,
        id: &str,
        context: Option<&str>,
    ) -> Result<Option<RemoteMatch>>;
}
