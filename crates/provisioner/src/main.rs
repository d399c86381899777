use clap::Parser;
use shared::utils::signal::cancel_on_signal;
use std::panic;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use provisioner::{setup_logging, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loki = match setup_logging(Some(&cli)) {
        Ok(loki) => loki,
        Err(e) => {
            eprintln!("Warning: Failed to initialize logging: {e}. Using default logging.");
            None
        }
    };

    panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .unwrap_or_else(|| panic::Location::caller());
        let message = match panic_info.payload().downcast_ref::<&str>() {
            Some(s) => *s,
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => s.as_str(),
                None => "Unknown panic payload",
            },
        };

        log::error!(
            "PANIC: '{}' at {}:{}",
            message,
            location.file(),
            location.line()
        );
    }));

    let cancellation_token = CancellationToken::new();
    let signal_handle = match cancel_on_signal(cancellation_token.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: failed to install signal handlers: {e}");
            std::process::exit(1);
        }
    };

    // A running terraform is not interrupted by cancellation, and the
    // workspace upload after it always gets one attempt. The grace period
    // bounds both; past it the child process is killed on drop.
    let shutdown_grace = Duration::from_secs(cli.shutdown_grace);
    let grace = async {
        cancellation_token.cancelled().await;
        tokio::time::sleep(shutdown_grace).await;
    };
    let result = tokio::select! {
        result = cli.run(cancellation_token.clone()) => result,
        _ = grace => Err(anyhow::anyhow!("job did not stop within {}s of cancellation", shutdown_grace.as_secs())),
    };
    signal_handle.abort();

    if let Err(e) = &result {
        log::error!("Command execution error: {e:#}");
    }
    if let Some(loki) = loki {
        loki.flush(Duration::from_secs(5)).await;
    }
    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
