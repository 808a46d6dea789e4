use anyhow::Result;
use log::{info, warn};
use std::{
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use crate::config::Config;
use crate::remote;
use crate::store::MailStore;

pub struct DaemonConfig {
    pub interval_secs: u64,
}

/// Sync on an interval until Ctrl-C.
pub fn run_daemon(store: &mut dyn MailStore, cfg: &Config, dcfg: DaemonConfig) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r2 = running.clone();
    ctrlc::set_handler(move || {
        r2.store(false, Ordering::SeqCst);
    })?;

    info!("sync daemon started, interval {}s", dcfg.interval_secs);
    while running.load(Ordering::SeqCst) {
        if let Err(e) = remote::sync::sync(store, cfg) {
            warn!("sync failed: {:#}", e);
        }

        // sleep in short ticks so Ctrl-C lands promptly
        for _ in 0..dcfg.interval_secs {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_secs(1));
        }
    }
    info!("sync daemon stopped");
    Ok(())
}
