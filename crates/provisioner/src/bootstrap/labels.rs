use std::collections::BTreeMap;

use shared::models::Taint;

pub const PUBLIC_IP_LABEL: &str = "node.kubernetes.io/public-ip";
pub const GPU_LABEL: &str = "node.kubernetes.io/gpu";

/// Account defaults, then node labels, then the labels derived from the
/// instance itself. Later sources win on key collisions.
pub fn merge_labels(
    public_ip: Option<&str>,
    is_gpu: bool,
    account: &BTreeMap<String, String>,
    node: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = account.clone();
    labels.extend(node.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(ip) = public_ip {
        labels.insert(PUBLIC_IP_LABEL.to_string(), ip.to_string());
    }
    if is_gpu {
        labels.insert(GPU_LABEL.to_string(), "true".to_string());
    }
    labels
}

/// Union keyed on (key, effect); a node taint replaces the account one in place.
pub fn merge_taints(account: &[Taint], node: &[Taint]) -> Vec<Taint> {
    let mut merged: Vec<Taint> = Vec::with_capacity(account.len() + node.len());
    for taint in account.iter().chain(node) {
        match merged
            .iter_mut()
            .find(|t| t.key == taint.key && t.effect == taint.effect)
        {
            Some(existing) => *existing = taint.clone(),
            None => merged.push(taint.clone()),
        }
    }
    merged
}
