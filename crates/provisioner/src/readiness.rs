use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio_util::sync::CancellationToken;

use crate::error::{ProvisionError, Result};
use crate::metrics::READINESS_ATTEMPTS;
use crate::retry::{retry, RetryError, RetryPolicy};
use crate::runner::{CommandRunner, RemoteHost};

pub const DEFAULT_ATTEMPTS: u32 = 24;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Polls a fresh instance over ssh until it accepts a command. Every attempt,
/// the first included, waits one interval, so a node that never comes up is
/// given up on after `attempts * interval`.
pub struct NodeReadinessProbe {
    runner: Arc<dyn CommandRunner>,
    policy: RetryPolicy,
}

impl NodeReadinessProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, attempts: u32, interval: Duration) -> Self {
        Self {
            runner,
            policy: RetryPolicy::fixed(attempts, interval).delaying_first_attempt(),
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.policy = self.policy.with_deadline(deadline);
        self
    }

    pub async fn wait_ready(&self, host: &RemoteHost, cancel: &CancellationToken) -> Result<()> {
        let name = format!("Waiting for ssh on {}", host.address);
        let outcome = retry(
            &self.policy,
            &name,
            cancel,
            |_: &ProvisionError| true,
            |_| {
                let runner = &self.runner;
                async move {
                    let result = runner.run_remote(host, "true").await;
                    let label = if result.is_ok() { "reachable" } else { "unreachable" };
                    READINESS_ATTEMPTS.with_label_values(&[label]).inc();
                    result
                }
            },
        )
        .await;

        match outcome {
            Ok(_) => {
                info!("{} is reachable", host.address);
                Ok(())
            }
            Err(RetryError::Cancelled { .. }) => Err(ProvisionError::Cancelled),
            Err(err) => Err(ProvisionError::NotReady {
                host: host.address.clone(),
                attempts: err.attempts(),
            }),
        }
    }
}
