//! Modbus TCP

use super::*;
use byteorder::{BigEndian, ByteOrder};

pub use crate::frame::tcp::*;

/// MBAP header length including the unit identifier.
pub const HEADER_LEN: usize = 7;

/// Bytes in front of the part counted by the MBAP length field.
pub const PREFIX_LEN: usize = 6;

/// Offset of the MBAP length field.
pub const LENGTH_OFFSET: usize = 4;

// [MODBUS MESSAGING ON TCP/IP IMPLEMENTATION GUIDE V1.0b](http://modbus.org/docs/Modbus_Messaging_Implementation_Guide_V1_0b.pdf), page 5
// "The maximum size of a MODBUS TCP ADU is 260 bytes."
pub const MAX_FRAME_LEN: usize = 260;

/// The only protocol identifier Modbus defines.
pub const PROTOCOL_ID: u16 = 0;

/// An extracted TCP PDU frame.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    pub hdr: Header,
    pub pdu: &'a [u8],
}

/// Verify a complete TCP ADU and split it into header and PDU.
pub fn extract_frame(adu: &[u8]) -> Result<DecodedFrame<'_>> {
    if adu.len() <= HEADER_LEN {
        return Err(Error::BufferSize);
    }
    let (header_buf, pdu) = adu.split_at(HEADER_LEN);
    let protocol_id = BigEndian::read_u16(&header_buf[2..4]);
    if protocol_id != PROTOCOL_ID {
        return Err(Error::ProtocolNotModbus(protocol_id));
    }
    let m_length = BigEndian::read_u16(&header_buf[LENGTH_OFFSET..PREFIX_LEN]) as usize;
    if m_length != adu.len() - PREFIX_LEN {
        return Err(Error::LengthMismatch(m_length, adu.len() - PREFIX_LEN));
    }
    Ok(DecodedFrame {
        hdr: Header {
            transaction_id: BigEndian::read_u16(&header_buf[0..2]),
            unit_id: header_buf[6],
        },
        pdu,
    })
}

/// Total length of the message whose first bytes are in `prefix`.
///
/// Returns `None` until the length field has been received.
#[must_use]
pub fn message_len(prefix: &[u8]) -> Option<usize> {
    if prefix.len() < PREFIX_LEN {
        return None;
    }
    Some(PREFIX_LEN + BigEndian::read_u16(&prefix[LENGTH_OFFSET..PREFIX_LEN]) as usize)
}

/// Write the MBAP header for a response carrying `pdu_len` bytes.
pub fn write_header(buf: &mut [u8], hdr: Header, pdu_len: usize) -> Result<()> {
    if buf.len() < HEADER_LEN || HEADER_LEN + pdu_len > MAX_FRAME_LEN {
        return Err(Error::BufferSize);
    }
    BigEndian::write_u16(&mut buf[0..2], hdr.transaction_id);
    BigEndian::write_u16(&mut buf[2..4], PROTOCOL_ID);
    BigEndian::write_u16(&mut buf[LENGTH_OFFSET..PREFIX_LEN], (pdu_len + 1) as u16);
    buf[6] = hdr.unit_id;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_len() {
        assert_eq!(message_len(&[]), None);
        assert_eq!(message_len(&[0x00, 0x01, 0x00, 0x00, 0x00]), None);
        assert_eq!(message_len(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06]), Some(12));
        assert_eq!(message_len(&[0x00, 0x01, 0x00, 0x00, 0x01, 0xFA]), Some(512));
    }

    #[test]
    fn test_write_header() {
        let mut buf = [0; 9];
        let hdr = Header {
            transaction_id: 0x1234,
            unit_id: 0x11,
        };
        write_header(&mut buf, hdr, 2).unwrap();
        assert_eq!(&buf[..7], &[0x12, 0x34, 0x00, 0x00, 0x00, 0x03, 0x11]);

        assert_eq!(write_header(&mut buf[..6], hdr, 2), Err(Error::BufferSize));
        assert_eq!(write_header(&mut buf, hdr, 254), Err(Error::BufferSize));
    }

    mod frame_decoder {

        use super::*;

        #[test]
        fn extract_usual_tcp_request_frame() {
            let buf = &[
                0x01, // transaction id
                0x02, // transaction id
                0x00, // protocol id
                0x00, // protocol id
                0x00, // length
                0x06, // length
                0x11, // unit id
                0x03, // function code
                0x00, // addr
                0x6B, // addr
                0x00, // quantity
                0x03, // quantity
            ];
            let DecodedFrame { hdr, pdu } = extract_frame(buf).unwrap();
            assert_eq!(hdr.transaction_id, 258);
            assert_eq!(hdr.unit_id, 0x11);
            assert_eq!(pdu, &[0x03, 0x00, 0x6B, 0x00, 0x03]);
        }

        #[test]
        fn extract_frame_with_foreign_protocol() {
            let buf = &[0x00, 0x01, 0x00, 0x02, 0x00, 0x02, 0x01, 0x03];
            assert_eq!(extract_frame(buf), Err(Error::ProtocolNotModbus(2)));
        }

        #[test]
        fn extract_frame_with_wrong_length() {
            let buf = &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00];
            assert_eq!(extract_frame(buf), Err(Error::LengthMismatch(6, 3)));
        }

        #[test]
        fn extract_too_short_frame() {
            let buf = &[0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01];
            assert_eq!(extract_frame(buf), Err(Error::BufferSize));
        }
    }
}
