//! Cooperative polling: one pass over the registry per tick, in id order.
//!
//! A pass runs in two steps. Devices are polled under the hub lock and
//! their callback pushes are queued; the queue is then delivered with the
//! hub lock released, so a slow collector never stalls the HTTP workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::callback::Push;
use crate::hub::{Hub, publish_changes};
use crate::machines::PollContext;

/// What one pass over the registry left to do.
#[derive(Debug, Default)]
pub struct Cycle {
    pub warnings: u32,
    pub pushes: Vec<Push>,
}

impl Hub {
    /// Polls every due device once. Sensor warnings are already recorded
    /// in the stats; the pushes still have to be delivered.
    pub fn collect_cycle(&mut self) -> Cycle {
        let mut cycle = Cycle::default();

        for slot in &mut self.slots {
            let started = self.hw.clock.now_ms();
            if !slot.device.is_due(slot.last_poll, started) {
                continue;
            }

            let before = slot.values.values.clone();
            let mut ctx = PollContext {
                hw: &self.hw,
                stats: &mut self.stats,
                outbox: &mut cycle.pushes,
            };
            let warnings = slot.driver.poll(&slot.device, &mut slot.values, &mut ctx);
            slot.last_poll = Some(started);

            let finished = self.hw.clock.now_ms();
            let took = finished.saturating_sub(started);
            if took > self.runtime.slow_poll_ms {
                self.stats.slow_polls += 1;
                warn!(
                    "Slow poll of device {} ({}): {took} ms",
                    slot.device.id, slot.device.device_type
                );
            }

            publish_changes(&self.events, &slot.device, &before, &slot.values, finished);
            cycle.warnings += warnings;
        }
        cycle
    }
}

/// Sends `pushes` without holding the hub lock, then books failed pushes
/// as warnings. When the total is not zero the last warning is forwarded
/// through the server callback; a failed forward is only logged. Returns
/// the total warning count.
pub fn deliver(hub: &Mutex<Hub>, warnings: u32, pushes: Vec<Push>) -> u32 {
    if warnings == 0 && pushes.is_empty() {
        return 0;
    }
    let dispatcher = hub.lock().dispatcher();
    let failed = dispatcher.lock().deliver(pushes);

    let (total, forward) = hub.lock().settle(warnings, &failed);
    if let Some(push) = forward
        && let Err(e) = dispatcher.lock().dispatch(&push.callback, &push.path)
    {
        warn!("forwarding warning failed: {e}");
    }
    total
}

/// One full pass: poll, then deliver. Returns the warnings it produced.
pub fn poll_cycle(hub: &Mutex<Hub>) -> u32 {
    let cycle = hub.lock().collect_cycle();
    deliver(hub, cycle.warnings, cycle.pushes)
}

/// Runs [`poll_cycle`] every `tick` on a dedicated thread until `stop` is
/// raised.
pub fn spawn(
    hub: Arc<Mutex<Hub>>,
    tick: Duration,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("poll".into())
        .spawn(move || {
            info!("Poll loop started, tick {} ms", tick.as_millis());
            while !stop.load(Ordering::Relaxed) {
                let warnings = poll_cycle(&hub);
                if warnings > 0 {
                    debug!("Poll cycle produced {warnings} warnings");
                }
                thread::sleep(tick);
            }
            info!("Poll loop stopped");
        })
}
