//! Adaptive sampling rate control
//!
//! Watches drained `is-on-track` messages and moves the telemetry source
//! between the preferred on-track rate and a 1 Hz idle rate. Adjustments are
//! best effort: sources pick the new value up before their next poll.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::types::{QueuedMessage, SamplingFrequency};

/// Owner of the shared sampling frequency
#[derive(Debug)]
pub struct RateController {
    preferred: SamplingFrequency,
    frequency: watch::Sender<SamplingFrequency>,
    // Off while the simulator is detached
    active: AtomicBool,
}

impl RateController {
    /// Sources start polling at the idle rate until the car is on track.
    pub fn new(preferred: SamplingFrequency) -> Self {
        let (frequency, _) = watch::channel(SamplingFrequency::IDLE);
        Self { preferred, frequency, active: AtomicBool::new(false) }
    }

    pub fn preferred(&self) -> SamplingFrequency {
        self.preferred
    }

    pub fn current(&self) -> SamplingFrequency {
        *self.frequency.borrow()
    }

    /// Receiver sources read before each polling cycle.
    pub fn subscribe(&self) -> watch::Receiver<SamplingFrequency> {
        self.frequency.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Simulator attached: adjustments resume.
    pub fn on_source_connected(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// Simulator detached: adjustments stop until it comes back.
    pub fn on_source_disconnected(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// React to a message the drain task just delivered.
    ///
    /// Returns the new frequency when the message changed it.
    pub fn observe(&self, message: &QueuedMessage) -> Option<SamplingFrequency> {
        let on_track = message.on_track()?;
        if !self.is_active() {
            debug!(on_track, "simulator detached, ignoring rate change");
            return None;
        }

        let target = if on_track { self.preferred } else { SamplingFrequency::IDLE };
        self.set(target).then_some(target)
    }

    /// Set the sampling frequency directly. Returns whether it changed.
    pub fn set(&self, frequency: SamplingFrequency) -> bool {
        let changed = self.frequency.send_if_modified(|current| {
            if *current == frequency {
                false
            } else {
                *current = frequency;
                true
            }
        });
        if changed {
            info!(%frequency, "telemetry sampling frequency changed");
        }
        changed
    }
}
