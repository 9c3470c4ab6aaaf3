use clap::Parser;
use color_eyre::eyre::{Context, eyre};
use jumpgate::{ApplicationConfig, TunnelSpec, start};
use tracing::{debug, error, info, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal, prelude::*};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(ChronoLocal::rfc_3339())
                .with_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                ),
        )
        .with(ErrorLayer::default())
        .init();

    let config = ApplicationConfig::parse();
    let (mut tunnel, mut errors) = start(TunnelSpec::from(config))
        .await
        .with_context(|| "Error starting tunnel")?;
    info!(local_addr = %tunnel.local_addr(), "Listening for connections.");

    let signal = wait_for_signal();
    tokio::pin!(signal);
    let result = loop {
        tokio::select! {
            event = errors.recv() => match event {
                Some(error) if error.is_fatal() => {
                    error!(%error, "Tunnel failed.");
                    break Err(eyre!(error).wrap_err("Tunnel stopped unexpectedly"));
                }
                Some(error) => warn!(%error, "Connection error."),
                None => break Err(eyre!("Tunnel stopped unexpectedly")),
            },
            _ = &mut signal => {
                info!("Shutting down.");
                break Ok(());
            }
        }
    };
    tunnel.stop();
    tunnel.closed().await;
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut signal_terminate), Ok(mut signal_interrupt)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        warn!("Unable to listen for signals.");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = signal_terminate.recv() => debug!("Received SIGTERM."),
        _ = signal_interrupt.recv() => debug!("Received SIGINT."),
    };
}

#[cfg(windows)]
async fn wait_for_signal() {
    use tokio::signal::windows;

    let (Ok(mut signal_c), Ok(mut signal_break)) = (windows::ctrl_c(), windows::ctrl_break())
    else {
        warn!("Unable to listen for signals.");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = signal_c.recv() => debug!("Received CTRL_C."),
        _ = signal_break.recv() => debug!("Received CTRL_BREAK."),
    };
}
