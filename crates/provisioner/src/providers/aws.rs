use std::path::Path;

use shared::models::{NodeSpec, ProviderCredentials};

use super::{required, set, NODE_CONFIG_FILE};
use crate::error::{ProvisionError, Result};
use crate::ssh_keys::SshKeyPair;
use crate::terraform::TfVars;

pub(super) fn terraform_vars(
    node: &NodeSpec,
    credentials: &ProviderCredentials,
    keys: &SshKeyPair,
    workspace: &Path,
) -> Result<TfVars> {
    let mut vars = TfVars::new();
    set(&mut vars, "access_key", required(credentials.access_key.as_deref(), "accessKey")?);
    set(&mut vars, "secret_key", required(credentials.secret_key.as_deref(), "secretKey")?);
    set(&mut vars, "region", &node.region);
    set(&mut vars, "node_id", &node.node_id);
    set(&mut vars, "node_name", &node.node_name);

    if node.is_spot() {
        let shape = node
            .spot
            .as_ref()
            .ok_or_else(|| ProvisionError::decode("node spec", "spot node without a spot shape"))?;
        set(&mut vars, "spot", true);
        set(&mut vars, "cpu_min", shape.cpu_min);
        set(&mut vars, "cpu_max", shape.cpu_max);
        set(&mut vars, "mem_min", shape.mem_min);
        set(&mut vars, "mem_max", shape.mem_max);
        set(&mut vars, "node_config_path", workspace.join(NODE_CONFIG_FILE).display());
    } else {
        let instance_type = node
            .instance_type
            .as_deref()
            .ok_or_else(|| ProvisionError::decode("node spec", "missing `instanceType`"))?;
        set(&mut vars, "instance_type", instance_type);
    }

    // Empty selects the template's default AMI
    set(&mut vars, "ami", node.image_id.as_deref().unwrap_or_default());
    set(&mut vars, "keys_path", keys.dir.display());
    if let Some(vpc) = node.vpc.as_deref().filter(|v| !v.is_empty()) {
        set(&mut vars, "vpc_id", vpc);
    }
    set(&mut vars, "is_gpu", node.is_gpu);
    Ok(vars)
}
