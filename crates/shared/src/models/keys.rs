//! Object names used in the blob store. Other tooling reads these keys, so
//! they must not change.

pub fn workspace_archive(node_id: &str) -> String {
    format!("{node_id}.zip")
}

pub fn join_bundle(account_id: &str) -> String {
    format!("{account_id}-config.yaml")
}

pub fn ssh_bundle(account_id: &str) -> String {
    format!("{account_id}.zip")
}
