use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop request shared with the signal handler.
///
/// The monitor checks it at the top of every iteration only, so a row append
/// in flight always completes.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route Ctrl-C (SIGINT/SIGTERM) into a stop request. Only one handler per process.
    pub fn install_ctrlc_handler() -> Result<Self> {
        let shutdown = Self::new();
        let handle = shutdown.clone();
        ctrlc::set_handler(move || {
            handle.request();
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
        Ok(shutdown)
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
