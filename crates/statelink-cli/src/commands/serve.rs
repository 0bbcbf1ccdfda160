//! Long-running node: relay plus control channel until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use statelink_core::{
    AttachOutcome, ControlServer, Core, CoreConfig, SignatureDetector, SyncRelay,
    WindowsProcessLocator,
};
use tracing::{debug, info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Serve against the real host process.
pub fn run(config: CoreConfig, attach: bool) -> Result<()> {
    let core = Arc::new(Core::new(
        config,
        Box::new(WindowsProcessLocator),
        Box::new(SignatureDetector),
    )?);

    if attach {
        match core.attach() {
            Ok(AttachOutcome::Attached(version)) => info!("Attached ({})", version),
            Ok(AttachOutcome::AlreadyAttached) => {}
            Err(e) => warn!("Attach failed: {}; waiting for an Init request", e),
        }
    }

    run_node(core)
}

/// Start the control channel and relay, block until shutdown, then tear down
/// in order: relay, control channel, host slots and handle.
pub fn run_node(core: Arc<Core>) -> Result<()> {
    let shutdown = core.shutdown_signal();
    let shutdown_ctrlc = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, stopping...");
        shutdown_ctrlc.trigger();
    })?;

    let config = core.config().clone();
    let mut control = ControlServer::start(Arc::clone(&core), &config.control)
        .context("failed to start control channel")?;
    let mut relay = SyncRelay::start(Arc::clone(&core), config.relay.clone())
        .context("failed to start relay")?;

    println!(
        "statelink {} as {} (player {}), control on {} (Ctrl+C to quit)",
        env!("CARGO_PKG_VERSION"),
        relay.role(),
        core.local_player_id(),
        control.local_addr()
    );

    while !shutdown.wait(STATUS_INTERVAL) {
        let stats = core.relay_stats().snapshot();
        debug!(
            "attached={} players={} received={} relayed={} applied={} dropped={}",
            core.is_attached(),
            core.player_count(),
            stats.received,
            stats.relayed,
            stats.applied,
            stats.dropped
        );
    }

    relay.stop();
    control.stop();
    core.detach();
    info!("Shutdown complete");
    Ok(())
}
