//! Modbus slave request processing
//!
//! [`Slave`] validates a complete ADU, dispatches it against a
//! [`RegisterAccess`] implementation and builds the framed response in a
//! buffer obtained from its [`Allocator`].

use crate::{
    buffer::{Allocator, BufferPurpose},
    error::Error,
    frame::*,
    stats::Observer,
    util::*,
};
use core::convert::TryFrom;

#[cfg(feature = "rtu")]
use crate::codec::rtu;
#[cfg(feature = "tcp")]
use crate::codec::tcp;

type Result<T> = core::result::Result<T, Error>;

/// Application register map.
pub trait RegisterAccess {
    /// Answer a single register query.
    ///
    /// Checks return `Ok(_)` to allow the access, reads return the register
    /// value. Bit tables use `0` and `1`.
    ///
    /// The provided implementation exposes holding registers that always
    /// read `0` and accept any write.
    fn query(&mut self, query: RegisterQuery) -> core::result::Result<Word, Exception> {
        match query.register {
            RegisterType::HoldingRegister => Ok(0),
            _ => Err(Exception::IllegalFunction),
        }
    }
}

impl<F> RegisterAccess for F
where
    F: FnMut(RegisterQuery) -> core::result::Result<Word, Exception>,
{
    fn query(&mut self, query: RegisterQuery) -> core::result::Result<Word, Exception> {
        self(query)
    }
}

/// Register map with the default behavior of [`RegisterAccess`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRegisters;

impl RegisterAccess for DefaultRegisters {}

/// Protocol codec of one slave device.
#[derive(Debug)]
pub struct Slave<R, A, O = ()> {
    registers: R,
    allocator: A,
    observer: O,
}

impl<R, A, O> Slave<R, A, O>
where
    R: RegisterAccess,
    A: Allocator,
    O: Observer,
{
    pub const fn new(registers: R, allocator: A, observer: O) -> Self {
        Self {
            registers,
            allocator,
            observer,
        }
    }

    /// Process a complete RTU frame addressed to the line.
    ///
    /// Returns the framed response, which is empty if nothing must be sent:
    /// the frame was for another slave or was a broadcast.
    #[cfg(feature = "rtu")]
    pub fn process_rtu(&mut self, address: rtu::SlaveId, adu: &[u8]) -> Result<&[u8]> {
        self.free_response();
        let rtu::DecodedFrame { hdr, pdu } = rtu::extract_frame(adu)?;
        if hdr.slave != address && !hdr.is_broadcast() {
            return Ok(&[]);
        }
        let pdu_len = self.execute(pdu, 1, 2)?;
        if hdr.is_broadcast() {
            self.free_response();
            return Ok(&[]);
        }
        let buf = self.allocator.buffer_mut();
        buf[0] = address;
        rtu::seal_frame(&mut buf[..pdu_len + rtu::FRAME_OVERHEAD])?;
        Ok(self.allocator.buffer())
    }

    /// Process a complete TCP ADU including its MBAP header.
    #[cfg(feature = "tcp")]
    pub fn process_tcp(&mut self, adu: &[u8]) -> Result<&[u8]> {
        self.free_response();
        let tcp::DecodedFrame { hdr, pdu } = tcp::extract_frame(adu)?;
        let pdu_len = self.execute(pdu, tcp::HEADER_LEN, 0)?;
        tcp::write_header(self.allocator.buffer_mut(), hdr, pdu_len)?;
        Ok(self.allocator.buffer())
    }

    /// The response built by the last call, empty if none.
    pub fn response(&self) -> &[u8] {
        self.allocator.buffer()
    }

    /// Release the response buffer.
    pub fn free_response(&mut self) {
        // Releasing never fails.
        let _ = self.allocator.allocate(BufferPurpose::Response, 0);
    }

    pub const fn registers(&self) -> &R {
        &self.registers
    }

    pub const fn registers_mut(&mut self) -> &mut R {
        &mut self.registers
    }

    pub const fn observer(&self) -> &O {
        &self.observer
    }

    pub const fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn into_parts(self) -> (R, A, O) {
        (self.registers, self.allocator, self.observer)
    }

    /// Run the request PDU and write the response PDU behind `head` bytes of
    /// transport header, reserving `tail` bytes of trailer.
    ///
    /// Returns the length of the response PDU.
    fn execute(&mut self, pdu: &[u8], head: usize, tail: usize) -> Result<usize> {
        let function = FunctionCode::new(pdu.first().copied().unwrap_or_default());
        match self.serve(pdu, head, tail) {
            Ok(Ok(len)) => Ok(len),
            Ok(Err(exception)) => {
                #[cfg(feature = "log")]
                log::debug!("Answering function {function} with exception: {exception}");
                self.observer.exception(function, exception);
                self.allocate(head + 2 + tail)?;
                let ex: [u8; 2] = ExceptionResponse {
                    function,
                    exception,
                }
                .into();
                self.allocator.buffer_mut()[head..head + 2].copy_from_slice(&ex);
                Ok(2)
            }
            Err(err) => Err(err),
        }
    }

    fn serve(
        &mut self,
        pdu: &[u8],
        head: usize,
        tail: usize,
    ) -> Result<core::result::Result<usize, Exception>> {
        let req = match Request::try_from(pdu) {
            Ok(req) => req,
            Err(exception) => return Ok(Err(exception)),
        };
        let staged = match check(&mut self.registers, req) {
            Ok(staged) => staged,
            Err(exception) => return Ok(Err(exception)),
        };
        let len = req.response_pdu_len();
        self.allocate(head + len + tail)?;
        let Self {
            registers,
            allocator,
            ..
        } = self;
        let out = &mut allocator.buffer_mut()[head..head + len];
        Ok(apply(registers, req, staged, out).map(|()| len))
    }

    fn allocate(&mut self, size: usize) -> Result<()> {
        self.allocator
            .allocate(BufferPurpose::Response, size)
            .inspect_err(|_| {
                #[cfg(feature = "log")]
                log::warn!("No buffer for a response of {size} bytes");
                self.observer.error("response allocation failed");
            })
    }
}

const fn offset(address: Address, idx: usize) -> Address {
    address.wrapping_add(idx as u16)
}

fn ask(
    registers: &mut impl RegisterAccess,
    kind: QueryKind,
    register: RegisterType,
    index: Address,
    value: Word,
) -> core::result::Result<Word, Exception> {
    registers.query(RegisterQuery::new(kind, register, index, value))
}

fn read_checks(
    registers: &mut impl RegisterAccess,
    register: RegisterType,
    address: Address,
    quantity: Quantity,
) -> core::result::Result<(), Exception> {
    (0..quantity as usize).try_for_each(|i| {
        ask(registers, QueryKind::ReadCheck, register, offset(address, i), 0).map(drop)
    })
}

/// Run every check a request needs before anything is modified.
///
/// Returns the value a mask write is going to store, `0` otherwise.
fn check(
    registers: &mut impl RegisterAccess,
    req: Request<'_>,
) -> core::result::Result<Word, Exception> {
    use QueryKind::{Read, ReadCheck, WriteCheck};
    use RegisterType::*;
    use Request::*;

    match req {
        ReadCoils(address, quantity) => read_checks(registers, Coil, address, quantity)?,
        ReadDiscreteInputs(address, quantity) => {
            read_checks(registers, DiscreteInput, address, quantity)?;
        }
        ReadHoldingRegisters(address, quantity) => {
            read_checks(registers, HoldingRegister, address, quantity)?;
        }
        ReadInputRegisters(address, quantity) => {
            read_checks(registers, InputRegister, address, quantity)?;
        }
        WriteSingleCoil(address, coil) => {
            ask(registers, WriteCheck, Coil, address, Word::from(coil))?;
        }
        WriteMultipleCoils(address, coils) => {
            for (i, coil) in coils.iter().enumerate() {
                ask(registers, WriteCheck, Coil, offset(address, i), Word::from(coil))?;
            }
        }
        WriteSingleRegister(address, word) => {
            ask(registers, WriteCheck, HoldingRegister, address, word)?;
        }
        WriteMultipleRegisters(address, data) => {
            for (i, word) in data.iter().enumerate() {
                ask(registers, WriteCheck, HoldingRegister, offset(address, i), word)?;
            }
        }
        MaskWriteRegister(address, and_mask, or_mask) => {
            ask(registers, ReadCheck, HoldingRegister, address, 0)?;
            let current = ask(registers, Read, HoldingRegister, address, 0)?;
            let value = (current & and_mask) | (or_mask & !and_mask);
            ask(registers, WriteCheck, HoldingRegister, address, value)?;
            return Ok(value);
        }
        ReadWriteMultipleRegisters(read_address, read_quantity, write_address, data) => {
            for (i, word) in data.iter().enumerate() {
                ask(registers, WriteCheck, HoldingRegister, offset(write_address, i), word)?;
            }
            read_checks(registers, HoldingRegister, read_address, read_quantity)?;
        }
    }
    Ok(0)
}

/// Perform a checked request and serialize the response PDU into `out`.
fn apply(
    registers: &mut impl RegisterAccess,
    req: Request<'_>,
    staged: Word,
    out: &mut [u8],
) -> core::result::Result<(), Exception> {
    use QueryKind::{Read, Write};
    use RegisterType::*;
    use Request::*;

    out[0] = FunctionCode::from(req).value();
    match req {
        ReadCoils(address, quantity) | ReadDiscreteInputs(address, quantity) => {
            let register = if matches!(req, ReadCoils(..)) {
                Coil
            } else {
                DiscreteInput
            };
            let (head, bits) = out.split_at_mut(2);
            head[1] = bits.len() as u8;
            bits.fill(0);
            for i in 0..quantity as usize {
                let value = ask(registers, Read, register, offset(address, i), 0)?;
                write_bit(bits, i, value != 0);
            }
        }
        ReadHoldingRegisters(address, quantity) | ReadInputRegisters(address, quantity) => {
            let register = if matches!(req, ReadHoldingRegisters(..)) {
                HoldingRegister
            } else {
                InputRegister
            };
            read_words(registers, register, address, quantity, out)?;
        }
        WriteSingleCoil(address, coil) => {
            ask(registers, Write, Coil, address, Word::from(coil))?;
            write_u16_be(&mut out[1..3], address);
            write_u16_be(&mut out[3..5], bool_to_u16_coil(coil));
        }
        WriteMultipleCoils(address, coils) => {
            for (i, coil) in coils.iter().enumerate() {
                ask(registers, Write, Coil, offset(address, i), Word::from(coil))?;
            }
            write_u16_be(&mut out[1..3], address);
            write_u16_be(&mut out[3..5], coils.len() as u16);
        }
        WriteSingleRegister(address, word) => {
            ask(registers, Write, HoldingRegister, address, word)?;
            write_u16_be(&mut out[1..3], address);
            write_u16_be(&mut out[3..5], word);
        }
        WriteMultipleRegisters(address, data) => {
            for (i, word) in data.iter().enumerate() {
                ask(registers, Write, HoldingRegister, offset(address, i), word)?;
            }
            write_u16_be(&mut out[1..3], address);
            write_u16_be(&mut out[3..5], data.len() as u16);
        }
        MaskWriteRegister(address, and_mask, or_mask) => {
            ask(registers, Write, HoldingRegister, address, staged)?;
            write_u16_be(&mut out[1..3], address);
            write_u16_be(&mut out[3..5], and_mask);
            write_u16_be(&mut out[5..7], or_mask);
        }
        ReadWriteMultipleRegisters(read_address, read_quantity, write_address, data) => {
            for (i, word) in data.iter().enumerate() {
                ask(registers, Write, HoldingRegister, offset(write_address, i), word)?;
            }
            read_words(registers, HoldingRegister, read_address, read_quantity, out)?;
        }
    }
    Ok(())
}

fn read_words(
    registers: &mut impl RegisterAccess,
    register: RegisterType,
    address: Address,
    quantity: Quantity,
    out: &mut [u8],
) -> core::result::Result<(), Exception> {
    out[1] = (quantity * 2) as u8;
    for (i, chunk) in out[2..].chunks_exact_mut(2).enumerate() {
        let value = ask(registers, QueryKind::Read, register, offset(address, i), 0)?;
        write_u16_be(chunk, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buffer::StaticAllocator, stats::ExceptionCounters};

    #[derive(Default)]
    struct Map {
        coils: [bool; 16],
        holding: [u16; 16],
        input: [u16; 16],
        reject_write_at: Option<(Address, Exception)>,
        writes: usize,
    }

    impl RegisterAccess for Map {
        fn query(&mut self, q: RegisterQuery) -> core::result::Result<Word, Exception> {
            let idx = q.index as usize;
            if idx >= 16 {
                return Err(Exception::IllegalDataAddress);
            }
            match (q.kind, q.register) {
                (QueryKind::WriteCheck, _) => match self.reject_write_at {
                    Some((at, ex)) if at == q.index => Err(ex),
                    _ => Ok(0),
                },
                (QueryKind::ReadCheck, _) => Ok(0),
                (QueryKind::Read, RegisterType::Coil | RegisterType::DiscreteInput) => {
                    Ok(self.coils[idx].into())
                }
                (QueryKind::Read, RegisterType::HoldingRegister) => Ok(self.holding[idx]),
                (QueryKind::Read, RegisterType::InputRegister) => Ok(self.input[idx]),
                (QueryKind::Write, RegisterType::Coil) => {
                    self.writes += 1;
                    self.coils[idx] = q.value != 0;
                    Ok(0)
                }
                (QueryKind::Write, RegisterType::HoldingRegister) => {
                    self.writes += 1;
                    self.holding[idx] = q.value;
                    Ok(0)
                }
                (QueryKind::Write, _) => Err(Exception::IllegalFunction),
            }
        }
    }

    type TestSlave = Slave<Map, StaticAllocator, ExceptionCounters>;

    fn slave() -> TestSlave {
        Slave::new(Map::default(), StaticAllocator::new(), ExceptionCounters::default())
    }

    /// Build an RTU frame from address and PDU, appending the CRC.
    fn rtu_frame<const N: usize>(bytes: [u8; N]) -> [u8; N] {
        let mut bytes = bytes;
        rtu::seal_frame(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn rtu_read_holding_register() {
        let mut s = slave();
        s.registers_mut().holding[0] = 0x1234;
        let req = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];
        let rsp = s.process_rtu(0x01, &req).unwrap();
        assert_eq!(rsp, &[0x01, 0x03, 0x02, 0x12, 0x34, 0xB5, 0x33]);
        assert_eq!(s.response().len(), 7);
        s.free_response();
        assert!(s.response().is_empty());
    }

    #[test]
    fn rtu_write_single_register() {
        let mut s = slave();
        let req = rtu_frame([0x12, 0x06, 0x00, 0x02, 0xAB, 0xCD, 0, 0]);
        let rsp = s.process_rtu(0x12, &req).unwrap();
        assert_eq!(rsp, &req);
        assert_eq!(s.registers().holding[2], 0xABCD);
    }

    #[test]
    fn rtu_unsupported_function() {
        let mut s = slave();
        let req = rtu_frame([0x01, 0x08, 0x00, 0x00, 0x00, 0x00, 0, 0]);
        let rsp = s.process_rtu(0x01, &req).unwrap();
        assert_eq!(&rsp[..3], &[0x01, 0x88, 0x01]);
        assert_eq!(rsp.len(), 5);
        assert!(rtu::extract_frame(rsp).is_ok());
        assert_eq!(s.observer().illegal_function, 1);
    }

    #[test]
    fn rtu_frame_for_other_slave() {
        let mut s = slave();
        let req = rtu_frame([0x02, 0x06, 0x00, 0x02, 0xAB, 0xCD, 0, 0]);
        assert_eq!(s.process_rtu(0x01, &req).unwrap(), &[]);
        assert_eq!(s.registers().writes, 0);
    }

    #[test]
    fn rtu_broadcast_is_executed_silently() {
        let mut s = slave();
        let req = rtu_frame([0x00, 0x06, 0x00, 0x03, 0x00, 0x07, 0, 0]);
        assert_eq!(s.process_rtu(0x01, &req).unwrap(), &[]);
        assert_eq!(s.registers().holding[3], 7);
        assert!(s.response().is_empty());
    }

    #[test]
    fn rtu_corrupted_frame() {
        let mut s = slave();
        let req = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0B];
        assert_eq!(
            s.process_rtu(0x01, &req),
            Err(Error::Crc(0x0B84, 0x0A84))
        );
        assert_eq!(s.process_rtu(0x01, &req[..3]), Err(Error::BufferSize));
        assert!(s.response().is_empty());
    }

    #[test]
    fn all_or_nothing_write() {
        let mut s = slave();
        s.registers_mut().reject_write_at = Some((5, Exception::IllegalDataAddress));
        let mut req = [0u8; 1 + 6 + 20 + 2];
        req[..7].copy_from_slice(&[0x01, 0x10, 0x00, 0x00, 0x00, 0x0A, 0x14]);
        for (i, b) in req[7..27].iter_mut().enumerate() {
            *b = i as u8 + 1;
        }
        let req = rtu_frame(req);
        let rsp = s.process_rtu(0x01, &req).unwrap();
        assert_eq!(&rsp[..3], &[0x01, 0x90, 0x02]);
        assert_eq!(s.registers().writes, 0);
        assert_eq!(s.registers().holding, [0; 16]);
        assert_eq!(s.observer().illegal_data_address, 1);
    }

    #[test]
    fn write_multiple_registers() {
        let mut s = slave();
        let req = rtu_frame([
            0x01, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02, 0, 0,
        ]);
        let rsp = s.process_rtu(0x01, &req).unwrap();
        assert_eq!(&rsp[..6], &[0x01, 0x10, 0x00, 0x01, 0x00, 0x02]);
        assert_eq!(&rsp[6..], &[0x10, 0x08]);
        assert_eq!(s.registers().holding[1], 0x000A);
        assert_eq!(s.registers().holding[2], 0x0102);
    }

    #[test]
    fn read_and_write_coils() {
        let mut s = slave();
        let req = rtu_frame([0x01, 0x0F, 0x00, 0x02, 0x00, 0x0A, 0x02, 0b1100_1101, 0b01, 0, 0]);
        let rsp = s.process_rtu(0x01, &req).unwrap();
        assert_eq!(&rsp[1..6], &[0x0F, 0x00, 0x02, 0x00, 0x0A]);

        let req = rtu_frame([0x01, 0x01, 0x00, 0x00, 0x00, 0x0C, 0, 0]);
        let rsp = s.process_rtu(0x01, &req).unwrap();
        assert_eq!(&rsp[1..5], &[0x01, 0x02, 0b0011_0100, 0b0111]);

        let req = rtu_frame([0x01, 0x05, 0x00, 0x00, 0xFF, 0x00, 0, 0]);
        let rsp = s.process_rtu(0x01, &req).unwrap();
        assert_eq!(rsp, &req);
        assert!(s.registers().coils[0]);
    }

    #[test]
    fn read_outside_register_map() {
        let mut s = slave();
        let req = rtu_frame([0x01, 0x04, 0x00, 0x0E, 0x00, 0x04, 0, 0]);
        let rsp = s.process_rtu(0x01, &req).unwrap();
        assert_eq!(&rsp[..3], &[0x01, 0x84, 0x02]);
    }

    #[test]
    fn mask_write_register() {
        let mut s = slave();
        s.registers_mut().holding[4] = 0x12;
        let req = rtu_frame([0x01, 0x16, 0x00, 0x04, 0x00, 0xF2, 0x00, 0x25, 0, 0]);
        let rsp = s.process_rtu(0x01, &req).unwrap();
        assert_eq!(rsp, &req);
        assert_eq!(s.registers().holding[4], 0x17);
    }

    #[test]
    fn read_write_multiple_registers_writes_first() {
        let mut s = slave();
        s.registers_mut().holding[0] = 0x0101;
        let req = rtu_frame([
            0x01, 0x17, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01, 0x00, 0x01, 0x02, 0xBE, 0xEF, 0, 0,
        ]);
        let rsp = s.process_rtu(0x01, &req).unwrap();
        assert_eq!(&rsp[..7], &[0x01, 0x17, 0x04, 0x01, 0x01, 0xBE, 0xEF]);
    }

    #[test]
    fn tcp_read_input_registers() {
        let mut s = slave();
        s.registers_mut().input[0] = 0xABCD;
        s.registers_mut().input[1] = 0x0001;
        let req = [0x00, 0x2A, 0x00, 0x00, 0x00, 0x06, 0x11, 0x04, 0x00, 0x00, 0x00, 0x02];
        let rsp = s.process_tcp(&req).unwrap();
        assert_eq!(
            rsp,
            &[0x00, 0x2A, 0x00, 0x00, 0x00, 0x07, 0x11, 0x04, 0x04, 0xAB, 0xCD, 0x00, 0x01]
        );
    }

    #[test]
    fn tcp_exception_echoes_header() {
        let mut s = slave();
        let req = [0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x05, 0x03, 0x00, 0x00, 0x00, 0x00];
        let rsp = s.process_tcp(&req).unwrap();
        assert_eq!(rsp, &[0x12, 0x34, 0x00, 0x00, 0x00, 0x03, 0x05, 0x83, 0x03]);
        assert_eq!(s.observer().illegal_data_value, 1);
    }

    #[test]
    fn tcp_malformed_header() {
        let mut s = slave();
        let req = [0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(s.process_tcp(&req), Err(Error::ProtocolNotModbus(1)));
        let req = [0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(s.process_tcp(&req), Err(Error::LengthMismatch(7, 6)));
    }

    #[test]
    fn allocation_failure_produces_no_response() {
        let mut s = Slave::new(
            Map::default(),
            StaticAllocator::<8>::new(),
            ExceptionCounters::default(),
        );
        let req = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
        assert_eq!(s.process_tcp(&req), Err(Error::Allocation));
        assert!(s.response().is_empty());
        assert_eq!(s.observer().errors, 1);
    }

    #[test]
    fn default_register_access() {
        let mut s = Slave::new(DefaultRegisters, StaticAllocator::<256>::new(), ());
        let req = rtu_frame([0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0, 0]);
        let rsp = s.process_rtu(0x01, &req).unwrap();
        assert_eq!(&rsp[..5], &[0x01, 0x03, 0x02, 0x00, 0x00]);

        let req = rtu_frame([0x01, 0x01, 0x00, 0x00, 0x00, 0x01, 0, 0]);
        let rsp = s.process_rtu(0x01, &req).unwrap();
        assert_eq!(&rsp[..3], &[0x01, 0x81, 0x01]);
    }

    #[test]
    fn closure_register_access() {
        let mut reads = 0;
        let registers = |q: RegisterQuery| -> core::result::Result<Word, Exception> {
            if q.kind == QueryKind::Read {
                reads += 1;
            }
            Ok(q.index)
        };
        let mut s = Slave::new(registers, StaticAllocator::<256>::new(), ());
        let req = rtu_frame([0x01, 0x04, 0x00, 0x07, 0x00, 0x02, 0, 0]);
        let rsp = s.process_rtu(0x01, &req).unwrap();
        assert_eq!(&rsp[..7], &[0x01, 0x04, 0x04, 0x00, 0x07, 0x00, 0x08]);
        drop(s);
        assert_eq!(reads, 2);
    }
}
