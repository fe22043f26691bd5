//! Modbus RTU

use super::*;
use byteorder::{ByteOrder, LittleEndian};

pub use crate::frame::rtu::*;

// [MODBUS over Serial Line Specification and Implementation Guide V1.02](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf), page 13
// "The maximum size of a MODBUS RTU frame is 256 bytes."
pub const MAX_FRAME_LEN: usize = 256;

/// Address byte plus trailing CRC.
pub const FRAME_OVERHEAD: usize = 3;

/// Smallest frame that can carry a function code: address, function, CRC.
pub const MIN_FRAME_LEN: usize = 4;

/// An extracted RTU PDU frame.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    pub hdr: Header,
    pub pdu: &'a [u8],
}

/// Verify a complete RTU frame and split it into header and PDU.
///
/// The frame boundaries are known from the silent interval on the line, so
/// the whole buffer is the frame.
pub fn extract_frame(adu: &[u8]) -> Result<DecodedFrame<'_>> {
    if adu.len() < MIN_FRAME_LEN || adu.len() > MAX_FRAME_LEN {
        return Err(Error::BufferSize);
    }
    let (adu_buf, crc_buf) = adu.split_at(adu.len() - 2);
    // The CRC is the only little-endian field in Modbus.
    let expected_crc = LittleEndian::read_u16(crc_buf);
    let actual_crc = crc16(adu_buf);
    if expected_crc != actual_crc {
        return Err(Error::Crc(expected_crc, actual_crc));
    }
    let (slave_id, pdu) = adu_buf.split_at(1);
    Ok(DecodedFrame {
        hdr: Header { slave: slave_id[0] },
        pdu,
    })
}

/// Fill the last two bytes of `adu` with the CRC of everything before them.
pub fn seal_frame(adu: &mut [u8]) -> Result<()> {
    if adu.len() < MIN_FRAME_LEN - 1 {
        return Err(Error::BufferSize);
    }
    let split = adu.len() - 2;
    let crc = crc16(&adu[..split]);
    LittleEndian::write_u16(&mut adu[split..], crc);
    Ok(())
}

/// Calculate the CRC (Cyclic Redundancy Check) sum.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0xFFFF;
    for x in data {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            // if we followed clippy's suggestion to move out the crc >>= 1, the condition may not be met any more
            // the recommended action therefore makes no sense and it is better to allow this lint
            #[allow(clippy::branches_sharing_code)]
            if (crc & 0x0001) != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
