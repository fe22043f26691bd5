/// Slave ID
pub type SlaveId = u8;

/// Address used by masters to reach every slave on the line.
pub const BROADCAST_ADDRESS: SlaveId = 0;

/// Highest assignable slave address.
pub const MAX_SLAVE_ADDRESS: SlaveId = 247;

/// RTU header
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub slave: SlaveId,
}

impl Header {
    #[must_use]
    pub const fn is_broadcast(&self) -> bool {
        self.slave == BROADCAST_ADDRESS
    }
}
