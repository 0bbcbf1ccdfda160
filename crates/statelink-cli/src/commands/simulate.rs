//! Node backed by an in-process fake host whose local player walks in a circle.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use statelink_core::memory::layout::{entity, timing};
use statelink_core::offset::names;
use statelink_core::{
    Core, CoreConfig, FixedDetector, MockHost, MockLocator, OffsetTable, OffsetTableId,
    ShutdownSignal,
};
use tracing::{info, warn};

use super::serve::run_node;

const SIMULATED_BASE: u32 = 0x0040_0000;
const WALK_RADIUS: f32 = 25.0;

pub fn run(config: CoreConfig) -> Result<()> {
    let version = OffsetTableId::Retail10;
    let table = OffsetTable::for_version(version);
    let host = MockHost::simulated(SIMULATED_BASE, &table)?;

    let core = Arc::new(Core::new(
        config,
        Box::new(MockLocator::new(host.clone())),
        Box::new(FixedDetector(version)),
    )?);
    core.attach()?;
    info!("Simulated host ready at {:#x}", SIMULATED_BASE);

    let local = host.peek_u32(SIMULATED_BASE.wrapping_add(table.offset(names::PLAYER_PED_POINTER)?));
    let shutdown = core.shutdown_signal();
    let walker = thread::spawn(move || walk(&host, local, &shutdown));

    let result = run_node(core);
    if walker.join().is_err() {
        warn!("Simulated walker panicked");
    }
    result
}

/// Move the local record around so ticks carry changing state.
fn walk(host: &MockHost, record: u32, shutdown: &ShutdownSignal) {
    let started = Instant::now();
    let interval = Duration::from_millis(timing::TICK_INTERVAL_MS);
    loop {
        let t = started.elapsed().as_secs_f32() * 0.5;
        let position = [WALK_RADIUS * t.cos(), WALK_RADIUS * t.sin(), 10.0];
        let heading = [0.0, 0.0, t + std::f32::consts::FRAC_PI_2];
        for (base, values) in [(entity::POSITION, position), (entity::ROTATION, heading)] {
            for (i, v) in values.iter().enumerate() {
                host.poke_u32(record + base + 4 * i as u32, v.to_bits());
            }
        }
        if shutdown.wait(interval) {
            break;
        }
    }
}
