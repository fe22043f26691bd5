//! Common helpers

use crate::{Coil, Error};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Turn a bool into a u16 coil value
#[must_use]
pub const fn bool_to_u16_coil(state: bool) -> u16 {
    if state { 0xFF00 } else { 0x0000 }
}

/// Turn a u16 coil value into a boolean value.
pub const fn u16_coil_to_bool(coil: u16) -> Result<bool, Error> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        _ => Err(Error::CoilValue(coil)),
    }
}

/// Calculate the number of bytes required for a given number of coils.
#[must_use]
pub const fn packed_coils_len(bitcount: usize) -> usize {
    bitcount.div_ceil(8)
}

/// Read the `n`-th bit of a packed bit array.
///
/// Bits are numbered LSB first within each byte.
#[must_use]
pub fn read_bit(bytes: &[u8], n: usize) -> Coil {
    (bytes[n / 8] >> (n % 8)) & 0b1 > 0
}

/// Write the `n`-th bit of a packed bit array, leaving its neighbours untouched.
pub fn write_bit(bytes: &mut [u8], n: usize, value: Coil) {
    let mask = 1 << (n % 8);
    if value {
        bytes[n / 8] |= mask;
    } else {
        bytes[n / 8] &= !mask;
    }
}

/// Read a little-endian word.
#[must_use]
pub fn read_u16_le(buf: &[u8]) -> u16 {
    LittleEndian::read_u16(buf)
}

/// Write a little-endian word.
pub fn write_u16_le(buf: &mut [u8], value: u16) {
    LittleEndian::write_u16(buf, value);
}

/// Read a big-endian (Modbus wire order) word.
#[must_use]
pub fn read_u16_be(buf: &[u8]) -> u16 {
    BigEndian::read_u16(buf)
}

/// Write a big-endian (Modbus wire order) word.
pub fn write_u16_be(buf: &mut [u8], value: u16) {
    BigEndian::write_u16(buf, value);
}
