//! Interrupt to task notification

use core::{
    ops::{BitOr, BitOrAssign},
    sync::atomic::{AtomicU8, Ordering},
};

/// Events the polling task waits for.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Events(u8);

impl Events {
    pub const NONE: Self = Self(0);
    /// A frame is complete and must be processed.
    pub const READ_READY: Self = Self(0x01);
    /// A response is queued and may be transmitted.
    pub const EMIT_READY: Self = Self(0x02);

    const KNOWN: u8 = Self::READ_READY.0 | Self::EMIT_READY.0;

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether any bit besides the known events is set.
    #[must_use]
    pub const fn has_unknown(self) -> bool {
        self.0 & !Self::KNOWN != 0
    }
}

impl BitOr for Events {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Sink for events raised by the session.
///
/// Called from interrupt context, so implementations must not block.
pub trait Notify {
    fn notify(&self, events: Events);
}

impl<N: Notify + ?Sized> Notify for &N {
    fn notify(&self, events: Events) {
        (**self).notify(events);
    }
}

#[cfg(feature = "alloc")]
impl<N: Notify + ?Sized> Notify for alloc::sync::Arc<N> {
    fn notify(&self, events: Events) {
        (**self).notify(events);
    }
}

/// Lock-free event flags, coalescing until taken.
#[derive(Debug, Default)]
pub struct EventFlags(AtomicU8);

impl EventFlags {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Take and clear all pending events.
    pub fn take(&self) -> Events {
        Events(self.0.swap(0, Ordering::AcqRel))
    }

    #[must_use]
    pub fn peek(&self) -> Events {
        Events(self.0.load(Ordering::Acquire))
    }
}

impl Notify for EventFlags {
    fn notify(&self, events: Events) {
        self.0.fetch_or(events.0, Ordering::AcqRel);
    }
}

#[cfg(feature = "std")]
pub use self::signal::Signal;

#[cfg(feature = "std")]
mod signal {
    use super::{Events, Notify};
    use std::{
        sync::{Condvar, Mutex, PoisonError},
        time::{Duration, Instant},
    };

    /// Blocking notification for a polling thread.
    #[derive(Debug, Default)]
    pub struct Signal {
        pending: Mutex<Events>,
        cond: Condvar,
    }

    impl Signal {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Wait until events are pending or `timeout` elapsed.
        ///
        /// Returns the pending events and clears them; empty on timeout.
        pub fn wait_timeout(&self, timeout: Duration) -> Events {
            let deadline = Instant::now() + timeout;
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            while pending.is_empty() {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                pending = self
                    .cond
                    .wait_timeout(pending, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            core::mem::take(&mut *pending)
        }
    }

    impl Notify for Signal {
        fn notify(&self, events: Events) {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            *pending |= events;
            self.cond.notify_one();
        }
    }
}
