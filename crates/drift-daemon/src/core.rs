//! Daemon core: the single event loop that owns all mutable state.
//!
//! Every external input (mpv events, discovery outcomes) funnels into one
//! mpsc channel consumed here. The cursor, the title map, and the history
//! file are only ever touched from this loop, so no locking is needed while
//! at most one discovery run is in flight.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use drift_core::config::Config;
use drift_core::history::History;

use crate::autoplay::AutoplayController;
use crate::discovery::{self, DiscoveryError, PlayCandidate};
use crate::mpv::{MpvDriver, MpvEvent, MpvHandle};

pub enum DaemonEvent {
    Mpv(MpvEvent),
    Discovery(Result<PlayCandidate, DiscoveryError>),
}

#[derive(Debug, Clone, Copy)]
enum NoticeLevel {
    Info,
    Warn,
}

pub struct DaemonCore {
    config: Config,
    driver: MpvDriver,
    mpv: MpvHandle,
    autoplay: AutoplayController,
    history: History,
    event_tx: mpsc::Sender<DaemonEvent>,
}

impl DaemonCore {
    pub async fn new(
        config: Config,
        mpv_tx: mpsc::Sender<MpvEvent>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> anyhow::Result<Self> {
        let mut driver = MpvDriver::new(config.mpv.default_volume);
        let mpv = driver.spawn_and_connect(mpv_tx).await?;
        let history = History::open(config.paths.history_file.clone());

        Ok(Self {
            config,
            driver,
            mpv,
            autoplay: AutoplayController::new(),
            history,
            event_tx,
        })
    }

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        while let Some(event) = event_rx.recv().await {
            match event {
                DaemonEvent::Mpv(e) => self.handle_mpv_event(e).await,
                DaemonEvent::Discovery(outcome) => self.handle_discovery_outcome(outcome).await,
            }
        }
        info!("event channel closed, shutting down");
        self.driver.kill().await;
        Ok(())
    }

    async fn handle_mpv_event(&mut self, event: MpvEvent) {
        match event.event_name() {
            // Playlist exhausted: the autoplay trigger. Also fires once at
            // startup, where the unset cursor makes it a no-op.
            Some("idle") => self.handle_queue_end(),
            Some("file-loaded") => self.handle_track_started().await,
            Some("client-message") => {
                let args = event.client_message_args();
                self.handle_client_message(&args);
            }
            _ => {}
        }
    }

    fn handle_queue_end(&mut self) {
        let running = self.driver.process_alive();
        match self.autoplay.on_queue_end(running) {
            Ok(seed) => {
                self.notify(NoticeLevel::Info, "Searching for a related track...");
                discovery::spawn_search(seed, self.config.discovery.clone(), self.event_tx.clone());
            }
            Err(skip) => debug!(
                "autoplay trigger ignored: {:?} (radio={}, cursor={:?})",
                skip,
                self.autoplay.enabled(),
                self.autoplay.last_played()
            ),
        }
    }

    async fn handle_discovery_outcome(&mut self, outcome: Result<PlayCandidate, DiscoveryError>) {
        match outcome {
            Ok(candidate) => {
                info!("autoplay: queueing {} ({})", candidate.title, candidate.url);
                self.autoplay.commit(&candidate);
                if let Err(e) = self.mpv.loadfile_append(&candidate.url).await {
                    warn!("autoplay: loadfile failed: {}", e);
                }
                self.notify(NoticeLevel::Info, &format!("Up next: {}", candidate.title));
            }
            Err(e) => {
                self.notify(NoticeLevel::Warn, &format!("Autoplay: {}", e));
            }
        }
    }

    /// A track started: advance the cursor and record it in the history,
    /// preferring the title the discovery run saw over mpv's media-title.
    async fn handle_track_started(&mut self) {
        let Some(url) = self.mpv.get_property_str("path").await else {
            return;
        };
        let title = match self.autoplay.title_for(&url) {
            Some(t) => t.to_string(),
            None => self
                .mpv
                .get_property_str("media-title")
                .await
                .unwrap_or_else(|| url.clone()),
        };
        let duration = self.mpv.get_property_f64("duration").await;

        self.autoplay.set_last_played(&url);
        if let Err(e) = self.history.add(&title, &url, duration) {
            warn!("history: write failed: {}", e);
        }
    }

    /// `script-message` keybindings from mpv's input.conf, e.g.
    /// `r script-message drift-toggle`.
    fn handle_client_message(&mut self, args: &[&str]) {
        match args.first().copied() {
            Some("drift-toggle") => {
                let on = self.autoplay.toggle();
                let msg = if on { "Radio mode on" } else { "Radio mode off" };
                self.notify(NoticeLevel::Info, msg);
            }
            Some("drift-history") => {
                let recent: Vec<&str> = self
                    .history
                    .entries()
                    .iter()
                    .take(5)
                    .map(|e| e.title.as_str())
                    .collect();
                if recent.is_empty() {
                    self.notify(NoticeLevel::Info, "History is empty");
                } else {
                    self.notify(NoticeLevel::Info, &recent.join("\n"));
                }
            }
            Some("drift-clear-history") => match self.history.clear() {
                Ok(()) => self.notify(NoticeLevel::Info, "History cleared"),
                Err(e) => warn!("history: clear failed: {}", e),
            },
            Some(other) => debug!("ignoring client-message {:?}", other),
            None => {}
        }
    }

    /// Log plus fire-and-forget mpv OSD; never blocks the event loop.
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info => info!("{}", message),
            NoticeLevel::Warn => warn!("{}", message),
        }
        let mpv = self.mpv.clone();
        let text = message.to_string();
        tokio::spawn(async move {
            let _ = mpv.show_text(&text).await;
        });
    }
}
