//! Message reassembly from a TCP byte stream

use super::{MAX_FRAME_LEN, message_len};
use crate::codec::tcp::PREFIX_LEN;
use crate::error::Error;

/// Splits arbitrarily chunked stream data into MBAP framed messages.
///
/// A message spanning several chunks is carried over in an internal buffer
/// of one maximum sized ADU.
#[derive(Debug, Clone)]
pub struct Assembler {
    buf: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_FRAME_LEN],
            len: 0,
        }
    }

    /// Bytes of an incomplete message carried over from earlier chunks.
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.len
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Consume `chunk`, calling `on_message` for every complete message.
    ///
    /// A message declaring more than [`MAX_FRAME_LEN`] bytes fails with
    /// [`Error::FramingOverflow`] carrying the declared length. The carried
    /// over bytes and the rest of the chunk are dropped in that case, the
    /// messages before it have already been delivered.
    pub fn feed<F>(&mut self, mut chunk: &[u8], mut on_message: F) -> Result<(), Error>
    where
        F: FnMut(&[u8]),
    {
        while !chunk.is_empty() {
            if self.len == 0 {
                if let Some(total) = message_len(chunk) {
                    check_len(total)?;
                    if let Some((msg, rest)) = chunk.split_at_checked(total) {
                        on_message(msg);
                        chunk = rest;
                        continue;
                    }
                }
                // Either the length field or the body is incomplete. Both fit.
                self.buf[..chunk.len()].copy_from_slice(chunk);
                self.len = chunk.len();
                return Ok(());
            }

            let wanted = message_len(&self.buf[..self.len]).unwrap_or(PREFIX_LEN);
            let take = (wanted - self.len).min(chunk.len());
            let (head, rest) = chunk.split_at(take);
            self.buf[self.len..self.len + take].copy_from_slice(head);
            self.len += take;
            chunk = rest;

            let Some(total) = message_len(&self.buf[..self.len]) else {
                continue;
            };
            if let Err(err) = check_len(total) {
                self.len = 0;
                return Err(err);
            }
            if self.len == total {
                self.len = 0;
                on_message(&self.buf[..total]);
            }
        }
        Ok(())
    }
}

const fn check_len(total: usize) -> Result<(), Error> {
    if total > MAX_FRAME_LEN {
        return Err(Error::FramingOverflow(total - PREFIX_LEN));
    }
    Ok(())
}
