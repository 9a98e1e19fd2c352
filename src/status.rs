//! Pipeline health indication
//!
//! The hardware this design descends from signals health on an RGB LED;
//! here the indicator is a trait so the pipeline can drive whatever the
//! host has. The default implementation folds transitions into tracing.

use std::sync::atomic::{AtomicU8, Ordering};

/// Health states the pipeline reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Good,
    Bad,
}

/// Receiver for pipeline health transitions.
///
/// `event`/`clear_event` bracket noteworthy-but-harmless moments (a pool
/// overflow in progress); `toggle_send` pulses once per transmitted
/// datagram.
pub trait StatusIndicator: Send + Sync {
    fn good(&self);
    fn bad(&self);
    fn event(&self);
    fn clear_event(&self);
    fn toggle_send(&self);
}

const STATE_OFF: u8 = 0;
const STATE_GOOD: u8 = 1;
const STATE_BAD: u8 = 2;

/// Default indicator: logs state *transitions* (not every pulse) via tracing
pub struct TracingIndicator {
    state: AtomicU8,
}

impl TracingIndicator {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_OFF),
        }
    }

    pub fn health(&self) -> Option<Health> {
        match self.state.load(Ordering::Relaxed) {
            STATE_GOOD => Some(Health::Good),
            STATE_BAD => Some(Health::Bad),
            _ => None,
        }
    }
}

impl Default for TracingIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusIndicator for TracingIndicator {
    fn good(&self) {
        if self.state.swap(STATE_GOOD, Ordering::Relaxed) != STATE_GOOD {
            tracing::info!("status: good");
        }
    }

    fn bad(&self) {
        if self.state.swap(STATE_BAD, Ordering::Relaxed) != STATE_BAD {
            tracing::warn!("status: bad");
        }
    }

    fn event(&self) {
        tracing::trace!("status: event");
    }

    fn clear_event(&self) {}

    fn toggle_send(&self) {}
}
