//! Statistics and failure observation

use crate::frame::{Exception, FunctionCode};

/// Receives protocol exceptions and internal failures.
///
/// Used for statistics, never for control flow.
pub trait Observer {
    /// A request was answered with an exception.
    fn exception(&mut self, function: FunctionCode, exception: Exception) {
        let _ = (function, exception);
    }

    /// An internal or driver failure occurred.
    fn error(&mut self, message: &str) {
        let _ = message;
    }
}

impl Observer for () {}

impl<O: Observer + ?Sized> Observer for &mut O {
    fn exception(&mut self, function: FunctionCode, exception: Exception) {
        (**self).exception(function, exception);
    }

    fn error(&mut self, message: &str) {
        (**self).error(message);
    }
}

/// Per exception code counters.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExceptionCounters {
    pub illegal_function: u32,
    pub illegal_data_address: u32,
    pub illegal_data_value: u32,
    pub slave_device_failure: u32,
    pub acknowledge: u32,
    pub negative_acknowledge: u32,
    pub other: u32,
    pub errors: u32,
}

impl ExceptionCounters {
    /// Sum of all exception counters.
    #[must_use]
    pub const fn exceptions(&self) -> u32 {
        self.illegal_function
            + self.illegal_data_address
            + self.illegal_data_value
            + self.slave_device_failure
            + self.acknowledge
            + self.negative_acknowledge
            + self.other
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Observer for ExceptionCounters {
    fn exception(&mut self, _: FunctionCode, exception: Exception) {
        let counter = match exception {
            Exception::IllegalFunction => &mut self.illegal_function,
            Exception::IllegalDataAddress => &mut self.illegal_data_address,
            Exception::IllegalDataValue => &mut self.illegal_data_value,
            Exception::SlaveDeviceFailure => &mut self.slave_device_failure,
            Exception::Acknowledge => &mut self.acknowledge,
            Exception::NegativeAcknowledge => &mut self.negative_acknowledge,
            _ => &mut self.other,
        };
        *counter = counter.saturating_add(1);
    }

    fn error(&mut self, _: &str) {
        self.errors = self.errors.saturating_add(1);
    }
}

/// RTU session statistics.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtuStats {
    /// Frames handed to the codec.
    pub messages_received: u32,
    /// Responses fully transmitted.
    pub messages_sent: u32,
    pub messages_ok: u32,
    pub messages_nok: u32,
    /// Frames dropped by the framing layer (buffer full, noise).
    pub frames_discarded: u32,
    pub overruns: u32,
    pub unknown_events: u32,
    pub timer_errors: u32,
    pub uart_errors: u32,
    pub internal_errors: u32,
}

impl RtuStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// TCP server statistics.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpStats {
    /// Currently open connections.
    pub clients_connected: u32,
    /// High water mark of `clients_connected`.
    pub clients_max: u32,
    pub clients_accepted: u32,
    pub clients_rejected: u32,
    pub clients_timeouts: u32,
    pub clients_errors: u32,
    pub clients_closed: u32,
    pub messages_received: u32,
    pub messages_sent: u32,
    pub messages_ok: u32,
    pub messages_nok: u32,
    pub messages_ring_buffer_full: u32,
    pub internal_errors: u32,
}

impl TcpStats {
    /// Clear all counters except the connection gauge.
    pub fn reset(&mut self) {
        *self = Self {
            clients_connected: self.clients_connected,
            clients_max: self.clients_connected,
            ..Self::default()
        };
    }

    pub(crate) fn connected(&mut self) {
        self.clients_accepted += 1;
        self.clients_connected += 1;
        self.clients_max = self.clients_max.max(self.clients_connected);
    }

    pub(crate) fn disconnected(&mut self) {
        self.clients_connected = self.clients_connected.saturating_sub(1);
    }
}
