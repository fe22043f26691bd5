use core::fmt;

/// modbus-slave Error
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Invalid coil value
    CoilValue(u16),
    /// Invalid buffer size
    BufferSize,
    /// Invalid CRC
    Crc(u16, u16),
    /// Invalid byte count
    ByteCount(u8),
    /// Length Mismatch
    LengthMismatch(usize, usize),
    /// Protocol not Modbus
    ProtocolNotModbus(u16),
    /// Invalid exception code
    ExceptionCode(u8),
    /// The buffer allocator could not provide the requested buffer
    Allocation,
    /// A declared message length exceeds the maximum message size
    FramingOverflow(usize),
    /// All connection slots are in use
    NoFreeSlot,
    /// The output ring buffer cannot hold the response
    RingBufferFull,
    /// No active connection with this id
    UnknownClient(usize),
    /// Rejected configuration value
    InvalidConfig(&'static str),
    /// Hardware, timer or transport failure
    Driver(&'static str),
}

/// The error categories of the slave stack.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AllocationFailure,
    MalformedFrame,
    FramingOverflow,
    ResourceExhausted,
    DriverFailure,
}

impl Error {
    /// Category of this error.
    ///
    /// Malformed frames and framing overflows are discarded silently,
    /// allocation failures and exhausted resources are only counted,
    /// driver failures reset the owning session.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        use Error::*;

        match self {
            CoilValue(_) | BufferSize | Crc(_, _) | ByteCount(_) | LengthMismatch(_, _)
            | ProtocolNotModbus(_) | ExceptionCode(_) => ErrorKind::MalformedFrame,
            Allocation => ErrorKind::AllocationFailure,
            FramingOverflow(_) => ErrorKind::FramingOverflow,
            NoFreeSlot | RingBufferFull | UnknownClient(_) => ErrorKind::ResourceExhausted,
            InvalidConfig(_) | Driver(_) => ErrorKind::DriverFailure,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;

        match self {
            CoilValue(v) => write!(f, "Invalid coil value: {v}"),
            BufferSize => write!(f, "Invalid buffer size"),
            Crc(expected, actual) => write!(
                f,
                "Invalid CRC: expected = 0x{expected:0>4X}, actual = 0x{actual:0>4X}"
            ),
            ByteCount(cnt) => write!(f, "Invalid byte count: {cnt}"),
            LengthMismatch(length_field, pdu_len) => write!(
                f,
                "Length Mismatch: Length Field: {length_field}, PDU Len + 1: {pdu_len}"
            ),
            ProtocolNotModbus(protocol_id) => {
                write!(f, "Protocol not Modbus(0), received {protocol_id} instead")
            }
            ExceptionCode(code) => write!(f, "Invalid exception code: 0x{code:0>2X}"),
            Allocation => write!(f, "Buffer allocation failed"),
            FramingOverflow(len) => write!(f, "Declared message length too large: {len}"),
            NoFreeSlot => write!(f, "No free connection slot"),
            RingBufferFull => write!(f, "Output ring buffer full"),
            UnknownClient(id) => write!(f, "No active client with id {id}"),
            InvalidConfig(what) => write!(f, "Invalid configuration: {what}"),
            Driver(what) => write!(f, "Driver failure: {what}"),
        }
    }
}

impl core::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(Error::Crc(1, 2).kind(), ErrorKind::MalformedFrame);
        assert_eq!(Error::Allocation.kind(), ErrorKind::AllocationFailure);
        assert_eq!(Error::FramingOverflow(512).kind(), ErrorKind::FramingOverflow);
        assert_eq!(Error::RingBufferFull.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(Error::NoFreeSlot.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(Error::Driver("uart").kind(), ErrorKind::DriverFailure);
    }
}
