use tokio::{
    io,
    signal::unix::{signal, SignalKind},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// Exit code used when a second signal arrives while the job is still
/// winding down.
pub const FORCED_EXIT_CODE: i32 = 130;

// Spawns a task that cancels `cancellation_token` on the first SIGTERM,
// SIGINT, SIGHUP or SIGQUIT. A second signal terminates the process, so an
// operator can get out of a job stuck in cleanup.
pub fn cancel_on_signal(cancellation_token: CancellationToken) -> io::Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let signal_handle = tokio::spawn(async move {
        let mut received = 0u32;
        loop {
            let name = tokio::select! {
                _ = sigterm.recv() => "termination",
                _ = sigint.recv() => "interrupt",
                _ = sighup.recv() => "hangup",
                _ = sigquit.recv() => "quit",
            };
            received += 1;
            if received == 1 {
                log::warn!("Received {name} signal, cancelling job");
                cancellation_token.cancel();
            } else {
                log::error!("Received {name} signal again, exiting immediately");
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    });

    Ok(signal_handle)
}
