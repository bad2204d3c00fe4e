mod autoplay;
mod core;
mod discovery;
mod mpv;

use drift_core::config::Config;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = drift_core::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,drift_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    // All external inputs funnel into DaemonCore
    let (event_tx, event_rx) = mpsc::channel::<core::DaemonEvent>(256);
    let (mpv_tx, mut mpv_rx) = mpsc::channel::<mpv::MpvEvent>(256);

    // Bridge raw mpv events onto the daemon channel
    {
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = mpv_rx.recv().await {
                if event_tx.send(core::DaemonEvent::Mpv(event)).await.is_err() {
                    break;
                }
            }
        });
    }

    let daemon = core::DaemonCore::new(config, mpv_tx, event_tx).await?;

    info!("Daemon initialised, running event loop");
    daemon.run(event_rx).await
}
