use std::path::Path;

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_counter_vec, CounterVec, IntCounterVec, TextEncoder};

lazy_static! {
    /// Finished jobs by outcome
    pub static ref JOBS: IntCounterVec = register_int_counter_vec!(
        "provisioner_jobs_total",
        "Provisioning jobs by provider, action and result",
        &["provider", "action", "result"] // result: success, failure
    ).unwrap();

    pub static ref JOB_DURATION: CounterVec = register_counter_vec!(
        "provisioner_job_duration_seconds_total",
        "Wall time spent in provisioning jobs",
        &["provider", "action"]
    ).unwrap();

    pub static ref READINESS_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "provisioner_readiness_attempts_total",
        "SSH readiness probe attempts",
        &["result"] // result: reachable, unreachable
    ).unwrap();

    pub static ref PERSIST_RETRIES: IntCounterVec = register_int_counter_vec!(
        "provisioner_state_persist_retries_total",
        "Failed workspace uploads that were retried",
        &["node_id"]
    ).unwrap();

    // Alert on this one: the workspace only exists on local disk
    pub static ref PERSIST_ESCALATIONS: IntCounterVec = register_int_counter_vec!(
        "provisioner_state_persist_escalations_total",
        "Workspace uploads abandoned after exhausting the retry policy",
        &["node_id"]
    ).unwrap();
}

pub fn export_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families)
}

/// Writes the registry in text format for a node-exporter textfile
/// collector. The file is replaced atomically.
pub fn write_metrics_file(path: &Path) -> anyhow::Result<()> {
    let body = export_metrics()?;
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    std::fs::write(&staging, body)?;
    std::fs::rename(&staging, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_counters() {
        PERSIST_ESCALATIONS.with_label_values(&["metrics-test"]).inc();
        let text = export_metrics().unwrap();
        assert!(text.contains("provisioner_state_persist_escalations_total"));
        assert!(text.contains("node_id=\"metrics-test\""));
    }

    #[test]
    fn test_write_metrics_file() {
        JOBS.with_label_values(&["aws", "delete", "success"]).inc();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provisioner.prom");
        write_metrics_file(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("provisioner_jobs_total"));
    }
}
