//! Process interruption (SIGINT, SIGTERM, SIGHUP) as a shared, sticky flag
//! that in-flight run phases can race against.

use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

#[derive(Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Installs signal handlers that trigger this interrupt. Needs a running
    /// tokio runtime.
    pub fn listen_for_signals(&self) -> std::io::Result<()> {
        let mut streams = Vec::new();
        for (kind, name) in [
            (SignalKind::interrupt(), "SIGINT"),
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
        ] {
            streams.push((signal(kind)?, name));
        }
        for (mut stream, name) in streams {
            let this = self.clone();
            tokio::spawn(async move {
                if stream.recv().await.is_some() {
                    tracing::warn!(signal = name, "interrupt received");
                    this.trigger();
                }
            });
        }
        Ok(())
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Resolves once the interrupt has fired; immediately if it already has.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}
