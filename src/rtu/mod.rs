//! Modbus RTU slave
//!
//! Frames are delimited by silent intervals on the line. A [`Session`] is fed
//! single bytes, timer ticks and transmitter events from interrupt context
//! and raises [`Events`] for a task that runs the codec and starts the
//! response.

mod machine;
mod notify;
mod session;
mod timer;

pub use self::{machine::*, notify::*, session::*, timer::*};
pub use crate::codec::rtu::{
    BROADCAST_ADDRESS, DecodedFrame, Header, MAX_FRAME_LEN, MAX_SLAVE_ADDRESS, MIN_FRAME_LEN,
    SlaveId, crc16, extract_frame, seal_frame,
};

use crate::error::Error;
use core::time::Duration;

/// Baud rates a session can be started with.
pub const SUPPORTED_BAUD_RATES: [u32; 8] =
    [1200, 2400, 4800, 9600, 19_200, 38_400, 57_600, 115_200];

/// Default tick resolution of the silence timers.
pub const DEFAULT_TICK_MICROS: u32 = 50;

/// RTU session configuration.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Own address, `1..=247`.
    pub slave_address: SlaveId,
    pub baud_rate: u32,
    /// Period of [`Session::on_tick`] calls.
    pub tick_micros: u32,
    /// How long the task waits for events before doing housekeeping.
    pub poll_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slave_address: 1,
            baud_rate: 19_200,
            tick_micros: DEFAULT_TICK_MICROS,
            poll_timeout: Duration::from_millis(500),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.slave_address == BROADCAST_ADDRESS || self.slave_address > MAX_SLAVE_ADDRESS {
            return Err(Error::InvalidConfig("slave address out of range"));
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(Error::InvalidConfig("unsupported baud rate"));
        }
        if self.tick_micros == 0 {
            return Err(Error::InvalidConfig("zero tick period"));
        }
        Ok(())
    }
}
