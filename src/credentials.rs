use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::host::CredentialStorage;

/// Authentication material for the remote metadata endpoint.
/// Immutable once loaded at controller initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub user_id: String,
}

/// Shape of the persisted client blob: a list of server records, each
/// optionally carrying an access token and user id
#[derive(Debug, Deserialize)]
struct CredentialBlob {
    #[serde(rename = "Servers", default)]
    servers: Vec<ServerRecord>,
}

#[derive(Debug, Deserialize)]
struct ServerRecord {
    #[serde(rename = "AccessToken", default)]
    access_token: Option<String>,
    #[serde(rename = "UserId", default)]
    user_id: Option<String>,
}

/// Reads previously persisted authentication material from the host
/// client's key-value storage
pub struct CredentialStore {
    storage: Arc<dyn CredentialStorage>,
    key: String,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn CredentialStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    /// Load credentials from storage.
    ///
    /// Returns the first server entry that carries both a token and a
    /// user id. An absent key, malformed JSON, or a blob with no
    /// qualifying entry all come back as `None`; malformed input is a
    /// soft failure, logged and swallowed.
    pub fn load(&self) -> Option<Credentials> {
        let raw = match self.storage.read(&self.key) {
            Some(raw) => raw,
            None => {
                debug!("No credential record under key {:?}", self.key);
                return None;
            }
        };

        let blob: CredentialBlob = match serde_json::from_str(&raw) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Malformed credential record under {:?}: {}", self.key, e);
                return None;
            }
        };

        let found = blob.servers.into_iter().find_map(|server| {
            match (server.access_token, server.user_id) {
                (Some(token), Some(user_id)) if !token.is_empty() && !user_id.is_empty() => {
                    Some(Credentials { token, user_id })
                }
                _ => None,
            }
        });

        if found.is_none() {
            warn!("Credential record has no entry with both token and user id");
        }
        found
    }
}
