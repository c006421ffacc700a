use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::supplicant::LinkEvent;

/// Events the monitor's main loop consumes.
#[derive(Debug)]
pub enum MonitorEvent {
    /// Something happened on the supplicant link
    Link(LinkEvent),
    /// Periodic scan trigger
    ScanTick,
    /// ctrl-c
    Shutdown,
}

/// Fans the supplicant link, the scan timer and ctrl-c into one stream for
/// the main loop. Spawns one background task per source.
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<MonitorEvent>,
    _tx: mpsc::UnboundedSender<MonitorEvent>,
    stop: Arc<AtomicBool>,
}

impl EventHandler {
    pub fn new(
        mut link_rx: mpsc::UnboundedReceiver<LinkEvent>,
        scan_interval: Option<Duration>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _tx = tx.clone();
        let stop = Arc::new(AtomicBool::new(false));

        // Link forwarder task
        let link_tx = tx.clone();
        let link_stop = stop.clone();
        tokio::spawn(async move {
            while let Some(event) = link_rx.recv().await {
                if link_stop.load(Ordering::Relaxed) {
                    return;
                }
                if link_tx.send(MonitorEvent::Link(event)).is_err() {
                    return;
                }
            }
            debug!("link event stream ended");
        });

        // Scan tick task
        if let Some(period) = scan_interval {
            let tick_tx = tx.clone();
            let tick_stop = stop.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                // The first tick fires immediately; skip it so attaching
                // interfaces get a moment to come up.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if tick_stop.load(Ordering::Relaxed) {
                        return;
                    }
                    if tick_tx.send(MonitorEvent::ScanTick).is_err() {
                        return;
                    }
                }
            });
        }

        // ctrl-c task
        let signal_tx = tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = signal_tx.send(MonitorEvent::Shutdown);
            }
        });

        Self { rx, _tx: tx, stop }
    }

    /// Receive the next event
    pub async fn next(&mut self) -> Option<MonitorEvent> {
        self.rx.recv().await
    }

    /// Signal all background tasks to stop
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
