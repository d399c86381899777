use shared::models::ValidationError;
use shared::utils::BlobStoreError;

use crate::state::NodeState;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to decode {what}: {reason}")]
    ConfigDecode { what: &'static str, reason: String },
    #[error("unsupported action `{0}`")]
    UnsupportedAction(String),
    #[error("provider `{0}` is not implemented")]
    UnsupportedProvider(String),
    #[error("node {host} did not become reachable after {attempts} attempts")]
    NotReady { host: String, attempts: u32 },
    #[error("credentials not found: {0}")]
    CredentialsNotFound(String),
    #[error("no state found to operate on for node {0}")]
    StateNotFound(String),
    #[error("provisioning failed: {0}")]
    Provisioning(String),
    #[error("remote storage error: {0}")]
    RemoteIo(#[from] BlobStoreError),
    #[error("{0} was modified by another job")]
    StateConflict(String),
    #[error("could not persist state for node {node_id} after {attempts} attempts, local copy kept at {path}: {reason}")]
    PersistExhausted {
        node_id: String,
        attempts: u32,
        path: String,
        reason: String,
    },
    #[error("command `{command}` failed: {reason}")]
    Command { command: String, reason: String },
    #[error("illegal node state transition {from:?} -> {to:?}")]
    InvalidTransition { from: NodeState, to: NodeState },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("operation cancelled")]
    Cancelled,
}

impl ProvisionError {
    pub(crate) fn decode(what: &'static str, reason: impl ToString) -> Self {
        ProvisionError::ConfigDecode {
            what,
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same call can succeed. Conflicts and validation
    /// problems never go away by waiting.
    pub fn is_transient(&self) -> bool {
        match self {
            ProvisionError::RemoteIo(BlobStoreError::Backend(_)) => true,
            ProvisionError::Io(_) | ProvisionError::Command { .. } => true,
            _ => false,
        }
    }
}

impl From<ValidationError> for ProvisionError {
    fn from(err: ValidationError) -> Self {
        ProvisionError::ConfigDecode {
            what: "job input",
            reason: err.to_string(),
        }
    }
}

pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
