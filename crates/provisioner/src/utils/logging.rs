use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, LevelFilter};
use time::macros::format_description;
use tokio::task::JoinHandle;
use tracing_loki::BackgroundTaskController;
use tracing_subscriber::filter::EnvFilter as TracingEnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::prelude::*;
use url::Url;

use crate::cli::{Cli, Commands};
use crate::orchestrator::decode_payload;
use shared::models::NodeSpec;

struct SimpleTimeFormatter;

impl FormatTime for SimpleTimeFormatter {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let datetime = time::OffsetDateTime::from_unix_timestamp(timestamp as i64)
            .unwrap_or(time::OffsetDateTime::UNIX_EPOCH);

        let format = format_description!("[hour]:[minute]:[second]");
        let formatted = datetime
            .format(format)
            .unwrap_or_else(|_| String::from("??:??:??"));

        write!(w, "{formatted}")
    }
}

/// Handle on the Loki shipper. Flush it before the process exits, the job is
/// short lived and the last lines matter most.
pub struct LokiShutdown {
    controller: BackgroundTaskController,
    task: JoinHandle<()>,
}

impl LokiShutdown {
    pub async fn flush(self, timeout: Duration) {
        self.controller.shutdown().await;
        if tokio::time::timeout(timeout, self.task).await.is_err() {
            eprintln!("Timed out flushing logs to Loki");
        }
    }
}

pub fn setup_logging(
    cli: Option<&Cli>,
) -> Result<Option<LokiShutdown>, Box<dyn std::error::Error + Send + Sync>> {
    let mut log_level = LevelFilter::Info;
    let mut loki_url: Option<String> = None;
    let mut labels: Vec<(&str, String)> = Vec::new();

    if let Some(cli) = cli {
        if let Commands::Run {
            provider,
            action,
            node_spec,
            loki_url: cmd_loki_url,
            log_level: cmd_log_level,
            ..
        } = &cli.command
        {
            loki_url = cmd_loki_url.clone();
            if let Some(level) = cmd_log_level {
                log_level = level.parse()?;
            }
            let node_id = decode_payload::<NodeSpec>("node spec", node_spec)
                .map(|node| node.node_id)
                .unwrap_or_else(|_| "unknown".to_string());
            labels.push(("provider", provider.clone()));
            labels.push(("action", action.clone()));
            labels.push(("node_id", node_id));
        }
    }

    let env_filter = TracingEnvFilter::from_default_env()
        .add_directive(format!("{log_level}").parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("hyper_util=warn".parse()?)
        .add_directive("google_cloud_storage=warn".parse()?)
        .add_directive("tracing::span=warn".parse()?);

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_timer(SimpleTimeFormatter)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    let Some(loki_url_str) = loki_url else {
        registry.init();
        return Ok(None);
    };

    let loki_url_parsed = Url::parse(&loki_url_str)?;
    let mut builder = tracing_loki::builder()
        .label("app", "provisioner")?
        .label("version", env!("CARGO_PKG_VERSION"))?;
    for (key, value) in labels {
        builder = builder.label(key, value)?;
    }
    let (loki_layer, controller, task) = builder.build_controller_url(loki_url_parsed)?;

    let task = tokio::spawn(task);
    registry.with(loki_layer).init();
    debug!("Logging to console and Loki at {loki_url_str}");
    Ok(Some(LokiShutdown { controller, task }))
}
