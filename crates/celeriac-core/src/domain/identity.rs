use serde::{Deserialize, Serialize};

use super::ClientId;

/// Identity of one client process, fixed at construction.
///
/// `client_id` names the reply queue; `client_name` (`id@hostname`) is sent as
/// the `origin` header of every task message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    client_id: ClientId,
    client_name: String,
}

impl ClientIdentity {
    pub fn new(client_id: ClientId, hostname: &str) -> Self {
        let client_name = format!("{client_id}@{hostname}");
        Self {
            client_id,
            client_name,
        }
    }

    /// Uses the hostname of the current machine.
    pub fn for_local_host(client_id: ClientId) -> Self {
        let hostname = gethostname::gethostname();
        Self::new(client_id, &hostname.to_string_lossy())
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }
}
