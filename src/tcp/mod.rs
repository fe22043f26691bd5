//! Modbus TCP slave
//!
//! The [`Server`] is driven by the callbacks of a TCP stack. Incoming chunks
//! are split into MBAP framed messages by an [`Assembler`] and responses are
//! queued in a per connection [`RingBuffer`] until the transport can take
//! them.

mod assembler;
mod ring;
mod server;

pub use self::{assembler::*, ring::*, server::*};
pub use crate::codec::tcp::{
    DecodedFrame, HEADER_LEN, Header, MAX_FRAME_LEN, PROTOCOL_ID, TransactionId, UnitId,
    extract_frame, message_len,
};

use crate::error::Error;

pub const DEFAULT_MAX_IDLE_ROUNDS: u8 = 3;

/// Default number of simultaneous connections.
pub const DEFAULT_MAX_CLIENTS: usize = 4;

/// Default output ring capacity per connection.
pub const DEFAULT_RING_CAPACITY: usize = 3 * 1024;

/// TCP server configuration.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Poll rounds without traffic before a connection is closed.
    pub max_idle_rounds: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_idle_rounds: DEFAULT_MAX_IDLE_ROUNDS,
        }
    }
}

impl Config {
    pub const fn validate(&self) -> Result<(), Error> {
        if self.max_idle_rounds == 0 {
            return Err(Error::InvalidConfig("zero idle rounds"));
        }
        Ok(())
    }
}
