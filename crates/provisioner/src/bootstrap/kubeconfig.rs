use serde::Serialize;
use serde_yaml::Value;
use shared::models::{JoinCredentialsBundle, Taint};
use std::collections::BTreeMap;

use crate::error::{ProvisionError, Result};

/// Points every cluster entry of a k3s kubeconfig at `server_url`. k3s writes
/// `https://127.0.0.1:6443`, which is useless off the node.
pub fn rewrite_server(raw: &str, server_url: &str) -> Result<String> {
    let mut doc: Value = serde_yaml::from_str(raw)
        .map_err(|e| ProvisionError::Provisioning(format!("unreadable kubeconfig: {e}")))?;
    let clusters = doc
        .get_mut("clusters")
        .and_then(Value::as_sequence_mut)
        .ok_or_else(|| ProvisionError::Provisioning("kubeconfig has no clusters".to_string()))?;
    for entry in clusters {
        if let Some(cluster) = entry.get_mut("cluster").and_then(Value::as_mapping_mut) {
            cluster.insert("server".into(), server_url.into());
        }
    }
    serde_yaml::to_string(&doc)
        .map_err(|e| ProvisionError::Provisioning(format!("cannot render kubeconfig: {e}")))
}

/// `/etc/rancher/k3s/config.yaml` for agents that join from user-data.
#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct AgentConfig<'a> {
    server: String,
    token: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    node_label: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    node_taint: Vec<String>,
}

pub fn render_agent_config(
    bundle: &JoinCredentialsBundle,
    labels: &BTreeMap<String, String>,
    taints: &[Taint],
) -> Result<String> {
    let config = AgentConfig {
        server: bundle.server_url(),
        token: &bundle.join_token,
        node_label: labels.iter().map(|(k, v)| format!("{k}={v}")).collect(),
        node_taint: taints.iter().map(Taint::to_flag_value).collect(),
    };
    serde_yaml::to_string(&config)
        .map_err(|e| ProvisionError::Provisioning(format!("cannot render node config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const K3S_YAML: &str = r#"apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: LS0tLS1CRUdJTg==
    server: https://127.0.0.1:6443
  name: default
contexts:
- context:
    cluster: default
    user: default
  name: default
current-context: default
kind: Config
users:
- name: default
  user:
    client-certificate-data: LS0t
"#;

    #[test]
    fn test_rewrite_server() {
        let out = rewrite_server(K3S_YAML, "https://203.0.113.5:6443").unwrap();
        let doc: Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(
            doc["clusters"][0]["cluster"]["server"].as_str(),
            Some("https://203.0.113.5:6443")
        );
        assert_eq!(
            doc["clusters"][0]["cluster"]["certificate-authority-data"].as_str(),
            Some("LS0tLS1CRUdJTg==")
        );
        assert_eq!(doc["current-context"].as_str(), Some("default"));
    }

    #[test]
    fn test_rewrite_rejects_garbage() {
        assert!(rewrite_server("just text", "https://x:6443").is_err());
    }

    #[test]
    fn test_agent_config() {
        let bundle = JoinCredentialsBundle {
            join_token: "K10node".into(),
            kubeconfig: String::new(),
            server_ip: "10.1.1.1".into(),
            master_token: "m".into(),
        };
        let labels = BTreeMap::from([("node.kubernetes.io/gpu".to_string(), "true".to_string())]);
        let out = render_agent_config(&bundle, &labels, &[]).unwrap();
        let doc: Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(doc["server"].as_str(), Some("https://10.1.1.1:6443"));
        assert_eq!(doc["token"].as_str(), Some("K10node"));
        assert_eq!(doc["node-label"][0].as_str(), Some("node.kubernetes.io/gpu=true"));
        assert!(doc.get("node-taint").is_none());
    }
}
