use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything a node needs to join a cluster that was initialized earlier for
/// the same account. Written once by the init node, read by every join.
#[derive(Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinCredentialsBundle {
    /// Server node-token, used by agents.
    pub join_token: String,
    /// Admin kubeconfig with the server address pointing at the init node.
    pub kubeconfig: String,
    pub server_ip: String,
    /// Cluster secret generated at init, used by additional servers.
    pub master_token: String,
}

impl JoinCredentialsBundle {
    pub const API_PORT: u16 = 6443;

    pub fn server_url(&self) -> String {
        format!("https://{}:{}", self.server_ip, Self::API_PORT)
    }

    pub fn to_yaml(&self) -> Result<Vec<u8>, serde_yaml::Error> {
        serde_yaml::to_string(self).map(String::into_bytes)
    }

    pub fn from_yaml(data: &[u8]) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_slice(data)
    }
}

impl fmt::Debug for JoinCredentialsBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinCredentialsBundle")
            .field("server_ip", &self.server_ip)
            .finish_non_exhaustive()
    }
}
