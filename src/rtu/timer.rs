//! Character timers driven by a periodic tick

/// Bits per character on the line: start, 8 data, parity or stop, stop.
pub const BITS_PER_CHAR: u64 = 11;

/// Above this baud rate the silence intervals are fixed.
pub const FIXED_TIMEOUT_BAUD_RATE: u32 = 19_200;

/// Fixed 1.5 character interval above 19200 baud.
pub const FIXED_T15_MICROS: u32 = 750;

/// Fixed 3.5 character interval above 19200 baud.
pub const FIXED_T35_MICROS: u32 = 1750;

/// Silence intervals in ticks.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub t15: u32,
    pub t35: u32,
}

/// Compute the 1.5 and 3.5 character intervals for `baud_rate` counted in
/// ticks of `tick_micros`.
///
/// `tick_micros` must not be zero.
#[must_use]
pub const fn silence_timeouts(baud_rate: u32, tick_micros: u32) -> Timeouts {
    if baud_rate > FIXED_TIMEOUT_BAUD_RATE {
        return Timeouts {
            t15: FIXED_T15_MICROS / tick_micros,
            t35: FIXED_T35_MICROS / tick_micros,
        };
    }
    let per_tick = tick_micros as u64 * baud_rate as u64;
    Timeouts {
        t15: (3 * BITS_PER_CHAR * 1_000_000 / (2 * per_tick)) as u32,
        t35: (7 * BITS_PER_CHAR * 1_000_000 / (2 * per_tick)) as u32,
    }
}

/// Count-up timer that fires once on the tick its count exceeds the timeout.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timer {
    enabled: bool,
    count: u32,
    timeout: u32,
}

impl Timer {
    #[must_use]
    pub const fn new(timeout: u32) -> Self {
        Self {
            enabled: false,
            count: 0,
            timeout,
        }
    }

    pub fn start(&mut self) {
        self.count = 0;
        self.enabled = true;
    }

    /// Restart counting without changing whether the timer runs.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn stop(&mut self) {
        self.count = 0;
        self.enabled = false;
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn timeout(&self) -> u32 {
        self.timeout
    }

    /// Advance by one tick. Returns `true` when the timer expires, which
    /// also stops it.
    pub fn tick(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.count += 1;
        if self.count > self.timeout {
            self.stop();
            return true;
        }
        false
    }
}
