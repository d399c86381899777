use shared::models::{NodeSpec, ProviderCredentials};

use super::{required, set};
use crate::error::{ProvisionError, Result};
use crate::ssh_keys::SshKeyPair;
use crate::terraform::TfVars;

const DEFAULT_IMAGE: &str = "ubuntu-22-04-x64";

pub(super) fn terraform_vars(
    node: &NodeSpec,
    credentials: &ProviderCredentials,
    keys: &SshKeyPair,
) -> Result<TfVars> {
    if node.is_spot() {
        return Err(ProvisionError::decode(
            "node spec",
            "spot provisioning is not available on DigitalOcean",
        ));
    }
    let size = node
        .instance_type
        .as_deref()
        .ok_or_else(|| ProvisionError::decode("node spec", "missing `instanceType`"))?;

    let mut vars = TfVars::new();
    set(&mut vars, "do_token", required(credentials.api_token.as_deref(), "apiToken")?);
    set(&mut vars, "region", &node.region);
    set(&mut vars, "node_id", &node.node_id);
    set(&mut vars, "node_name", &node.node_name);
    set(&mut vars, "droplet_size", size);
    set(
        &mut vars,
        "image",
        node.image_id
            .as_deref()
            .filter(|i| !i.is_empty())
            .unwrap_or(DEFAULT_IMAGE),
    );
    set(&mut vars, "keys_path", keys.dir.display());
    if let Some(vpc) = node.vpc.as_deref().filter(|v| !v.is_empty()) {
        set(&mut vars, "vpc_uuid", vpc);
    }
    Ok(vars)
}
