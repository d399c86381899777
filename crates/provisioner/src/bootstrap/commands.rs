//! Shell commands run on the node during bootstrap.

use std::collections::BTreeMap;

use shared::models::Taint;

const INSTALL: &str = "curl -sfL https://get.k3s.io";

pub const KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";
pub const NODE_TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";
pub const SERVER_TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/token";

pub const IS_INSTALLED: &str = "if command -v k3s >/dev/null 2>&1; then echo installed; fi";
pub const RESTART_SERVER: &str = "sudo systemctl restart k3s";

pub fn read_file(path: &str) -> String {
    format!("sudo cat {}", quote(path))
}

pub fn init_server(token: &str, external_ip: &str) -> String {
    format!(
        "{INSTALL} | K3S_TOKEN={} sh -s - server --cluster-init --node-external-ip {ip} --tls-san {ip}",
        quote(token),
        ip = quote(external_ip),
    )
}

pub fn join_server(server_url: &str, token: &str, external_ip: &str) -> String {
    format!(
        "{INSTALL} | K3S_TOKEN={} sh -s - server --server {} --node-external-ip {ip} --tls-san {ip}",
        quote(token),
        quote(server_url),
        ip = quote(external_ip),
    )
}

pub fn join_agent(
    server_url: &str,
    token: &str,
    external_ip: &str,
    labels: &BTreeMap<String, String>,
    taints: &[Taint],
) -> String {
    let mut command = format!(
        "{INSTALL} | K3S_URL={} K3S_TOKEN={} sh -s - agent --node-external-ip {}",
        quote(server_url),
        quote(token),
        quote(external_ip),
    );
    for (key, value) in labels {
        command.push_str(" --node-label ");
        command.push_str(&quote(&format!("{key}={value}")));
    }
    for taint in taints {
        command.push_str(" --node-taint ");
        command.push_str(&quote(&taint.to_flag_value()));
    }
    command
}

/// Single-quotes `value` unless it is made of characters the shell leaves alone.
pub fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("node.kubernetes.io/gpu=true"), "node.kubernetes.io/gpu=true");
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn test_init_server() {
        assert_eq!(
            init_server("abc123", "198.51.100.1"),
            "curl -sfL https://get.k3s.io | K3S_TOKEN=abc123 sh -s - server --cluster-init \
             --node-external-ip 198.51.100.1 --tls-san 198.51.100.1"
        );
    }

    #[test]
    fn test_join_agent_flags() {
        let labels = BTreeMap::from([
            ("role".to_string(), "gpu worker".to_string()),
            ("zone".to_string(), "a".to_string()),
        ]);
        let taints = vec![Taint {
            key: "dedicated".into(),
            value: "ml".into(),
            effect: "NoSchedule".into(),
        }];
        let command = join_agent("https://10.0.0.1:6443", "K10::x", "203.0.113.2", &labels, &taints);
        assert!(command.contains("K3S_URL=https://10.0.0.1:6443 K3S_TOKEN=K10::x sh -s - agent"));
        assert!(command.contains("--node-label 'role=gpu worker' --node-label zone=a"));
        assert!(command.ends_with("--node-taint dedicated=ml:NoSchedule"));
    }
}
