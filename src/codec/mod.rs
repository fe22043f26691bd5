use crate::{error::*, frame::*, util::*};
use byteorder::{BigEndian, ByteOrder};
use core::convert::TryFrom;

#[cfg(feature = "rtu")]
pub mod rtu;
#[cfg(feature = "tcp")]
pub mod tcp;

type Result<T> = core::result::Result<T, Error>;

/// Maximum size of a request or response PDU.
pub const MAX_PDU_LEN: usize = 253;

/// Quantity limits of the supported functions.
pub(crate) const MAX_READ_BITS: Quantity = 2000;
pub(crate) const MAX_READ_WORDS: Quantity = 125;
pub(crate) const MAX_WRITE_BITS: Quantity = 1968;
pub(crate) const MAX_WRITE_WORDS: Quantity = 123;
pub(crate) const MAX_READ_WRITE_WORDS: Quantity = 121;

impl TryFrom<u8> for Exception {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        use crate::frame::Exception::*;
        let ex = match code {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => SlaveDeviceFailure,
            0x05 => Acknowledge,
            0x06 => SlaveDeviceBusy,
            0x07 => NegativeAcknowledge,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            _ => {
                return Err(Error::ExceptionCode(code));
            }
        };
        Ok(ex)
    }
}

impl From<ExceptionResponse> for [u8; 2] {
    fn from(ex: ExceptionResponse) -> [u8; 2] {
        [ex.function.value() | 0x80, ex.exception as u8]
    }
}

/// Reject a block of `quantity` items starting at `address` that would run
/// past the end of the 16 bit address space.
const fn check_range(address: Address, quantity: Quantity) -> core::result::Result<(), Exception> {
    if address as u32 + quantity as u32 > 0x1_0000 {
        return Err(Exception::IllegalDataAddress);
    }
    Ok(())
}

const fn check_quantity(quantity: Quantity, max: Quantity) -> core::result::Result<(), Exception> {
    if quantity == 0 || quantity > max {
        return Err(Exception::IllegalDataValue);
    }
    Ok(())
}

/// Slave side request decoding.
///
/// Any layout or value violation is reported as the exception the slave
/// must answer with, never as a transport error.
impl<'r> TryFrom<&'r [u8]> for Request<'r> {
    type Error = Exception;

    fn try_from(bytes: &'r [u8]) -> core::result::Result<Self, Exception> {
        use crate::frame::Request::*;
        use Exception::{IllegalDataValue, IllegalFunction};
        use FunctionCode as f;

        let Some(&fn_code) = bytes.first() else {
            return Err(IllegalDataValue);
        };
        let fn_code = FunctionCode::new(fn_code);
        if let f::Custom(_) = fn_code {
            return Err(IllegalFunction);
        }
        if bytes.len() < min_request_pdu_len(fn_code) {
            return Err(IllegalDataValue);
        }

        let req = match fn_code {
            f::ReadCoils
            | f::ReadDiscreteInputs
            | f::ReadInputRegisters
            | f::ReadHoldingRegisters => {
                if bytes.len() != 5 {
                    return Err(IllegalDataValue);
                }
                let addr = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);
                let max = match fn_code {
                    f::ReadCoils | f::ReadDiscreteInputs => MAX_READ_BITS,
                    _ => MAX_READ_WORDS,
                };
                check_quantity(quantity, max)?;
                check_range(addr, quantity)?;

                match fn_code {
                    f::ReadCoils => ReadCoils(addr, quantity),
                    f::ReadDiscreteInputs => ReadDiscreteInputs(addr, quantity),
                    f::ReadInputRegisters => ReadInputRegisters(addr, quantity),
                    _ => ReadHoldingRegisters(addr, quantity),
                }
            }
            f::WriteSingleCoil => {
                if bytes.len() != 5 {
                    return Err(IllegalDataValue);
                }
                let coil = u16_coil_to_bool(BigEndian::read_u16(&bytes[3..5]))
                    .map_err(|_| IllegalDataValue)?;
                WriteSingleCoil(BigEndian::read_u16(&bytes[1..3]), coil)
            }
            f::WriteSingleRegister => {
                if bytes.len() != 5 {
                    return Err(IllegalDataValue);
                }
                WriteSingleRegister(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                )
            }
            f::WriteMultipleCoils => {
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);
                let byte_count = bytes[5] as usize;
                check_quantity(quantity, MAX_WRITE_BITS)?;
                if byte_count != packed_coils_len(quantity as usize)
                    || bytes.len() != 6 + byte_count
                {
                    return Err(IllegalDataValue);
                }
                check_range(address, quantity)?;
                let coils =
                    Coils::new(&bytes[6..], quantity as usize).map_err(|_| IllegalDataValue)?;
                WriteMultipleCoils(address, coils)
            }
            f::WriteMultipleRegisters => {
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);
                let byte_count = bytes[5] as usize;
                check_quantity(quantity, MAX_WRITE_WORDS)?;
                if byte_count != quantity as usize * 2 || bytes.len() != 6 + byte_count {
                    return Err(IllegalDataValue);
                }
                check_range(address, quantity)?;
                let data =
                    Data::new(&bytes[6..], quantity as usize).map_err(|_| IllegalDataValue)?;
                WriteMultipleRegisters(address, data)
            }
            f::MaskWriteRegister => {
                if bytes.len() != 7 {
                    return Err(IllegalDataValue);
                }
                MaskWriteRegister(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                    BigEndian::read_u16(&bytes[5..7]),
                )
            }
            f::ReadWriteMultipleRegisters => {
                let read_address = BigEndian::read_u16(&bytes[1..3]);
                let read_quantity = BigEndian::read_u16(&bytes[3..5]);
                let write_address = BigEndian::read_u16(&bytes[5..7]);
                let write_quantity = BigEndian::read_u16(&bytes[7..9]);
                let write_count = bytes[9] as usize;
                check_quantity(read_quantity, MAX_READ_WORDS)?;
                check_quantity(write_quantity, MAX_READ_WRITE_WORDS)?;
                if write_count != write_quantity as usize * 2 || bytes.len() != 10 + write_count
                {
                    return Err(IllegalDataValue);
                }
                check_range(read_address, read_quantity)?;
                check_range(write_address, write_quantity)?;
                let data = Data::new(&bytes[10..], write_quantity as usize)
                    .map_err(|_| IllegalDataValue)?;
                ReadWriteMultipleRegisters(read_address, read_quantity, write_address, data)
            }
            f::Custom(_) => return Err(IllegalFunction),
        };
        Ok(req)
    }
}

const fn min_request_pdu_len(fn_code: FunctionCode) -> usize {
    use FunctionCode::*;
    match fn_code {
        ReadCoils | ReadDiscreteInputs | ReadInputRegisters | WriteSingleCoil
        | ReadHoldingRegisters | WriteSingleRegister => 5,
        WriteMultipleCoils | WriteMultipleRegisters => 6,
        MaskWriteRegister => 7,
        ReadWriteMultipleRegisters => 10,
        Custom(_) => 1,
    }
}
