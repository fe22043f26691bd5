//! Connection pool driven by TCP stack callbacks

use super::{Assembler, Config, DEFAULT_MAX_CLIENTS, DEFAULT_RING_CAPACITY, RingBuffer};
use crate::{
    buffer::Allocator,
    error::Error,
    slave::{RegisterAccess, Slave},
    stats::{Observer, TcpStats},
};

/// Index of a connection slot.
pub type ClientId = usize;

/// An accepted connection of the TCP stack.
pub trait Connection {
    /// Bytes the transport accepts for sending right now.
    fn send_capacity(&self) -> usize;

    /// Queue `data` for sending. Never called with more than
    /// [`Connection::send_capacity`] bytes.
    fn write(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Acknowledge `len` received bytes to open the receive window.
    fn received(&mut self, len: usize);

    /// Close gracefully.
    fn close(&mut self) -> Result<(), Error>;

    /// Reset the connection.
    fn abort(&mut self);
}

#[derive(Debug)]
struct Client<C, const RING: usize> {
    conn: C,
    assembler: Assembler,
    ring: RingBuffer<RING>,
    /// Bytes written to the transport and not yet acknowledged.
    in_flight: usize,
    idle_rounds: u8,
}

impl<C: Connection, const RING: usize> Client<C, RING> {
    fn new(conn: C) -> Self {
        Self {
            conn,
            assembler: Assembler::new(),
            ring: RingBuffer::new(),
            in_flight: 0,
            idle_rounds: 0,
        }
    }

    /// Hand as much queued output to the transport as it takes.
    fn flush(&mut self, stats: &mut TcpStats) {
        loop {
            let block = self.ring.linear_block(self.in_flight);
            let len = block.len().min(self.conn.send_capacity());
            if len == 0 {
                return;
            }
            if let Err(err) = self.conn.write(&block[..len]) {
                #[cfg(feature = "log")]
                log::warn!("Failed to write response: {err}");
                #[cfg(not(feature = "log"))]
                let _ = err;
                stats.internal_errors += 1;
                return;
            }
            self.in_flight += len;
            self.idle_rounds = 0;
        }
    }
}

/// Modbus TCP slave serving a fixed pool of `CLIENTS` connections, each with
/// an output ring of `RING` bytes.
///
/// All methods must be called from the single context executing the TCP
/// stack callbacks.
#[derive(Debug)]
pub struct Server<
    C,
    R,
    A,
    O = (),
    const CLIENTS: usize = DEFAULT_MAX_CLIENTS,
    const RING: usize = DEFAULT_RING_CAPACITY,
> {
    config: Config,
    clients: [Option<Client<C, RING>>; CLIENTS],
    slave: Slave<R, A, O>,
    stats: TcpStats,
}

impl<C, R, A, O, const CLIENTS: usize, const RING: usize> Server<C, R, A, O, CLIENTS, RING>
where
    C: Connection,
    R: RegisterAccess,
    A: Allocator,
    O: Observer,
{
    /// Fails with [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(config: Config, slave: Slave<R, A, O>) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            clients: core::array::from_fn(|_| None),
            slave,
            stats: TcpStats::default(),
        })
    }

    /// Take over a new connection.
    ///
    /// The connection is aborted if all slots are taken.
    pub fn accept(&mut self, mut conn: C) -> Result<ClientId, Error> {
        let Some((id, slot)) = self
            .clients
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
        else {
            #[cfg(feature = "log")]
            log::warn!("Rejecting connection, all {CLIENTS} slots in use");
            conn.abort();
            self.stats.clients_rejected += 1;
            return Err(Error::NoFreeSlot);
        };
        *slot = Some(Client::new(conn));
        self.stats.connected();
        #[cfg(feature = "log")]
        log::debug!("Accepted client {id}");
        Ok(id)
    }

    /// Data arrived on connection `id`, `None` if the remote side closed it.
    pub fn receive(&mut self, id: ClientId, chunk: Option<&[u8]>) -> Result<(), Error> {
        let Some(chunk) = chunk else {
            #[cfg(feature = "log")]
            log::debug!("Client {id} closed the connection");
            return self.close(id);
        };
        let Self {
            clients,
            slave,
            stats,
            ..
        } = self;
        let client = client_mut(clients, id)?;
        client.idle_rounds = 0;

        let Client {
            assembler, ring, ..
        } = &mut *client;
        if let Err(err) = assembler.feed(chunk, |adu| serve(slave, ring, stats, adu)) {
            #[cfg(feature = "log")]
            log::warn!("Dropping input of client {id}: {err}");
            #[cfg(not(feature = "log"))]
            let _ = err;
            stats.messages_received += 1;
            stats.messages_nok += 1;
        }

        client.flush(stats);
        client.conn.received(chunk.len());
        Ok(())
    }

    /// The transport acknowledged `len` bytes sent on connection `id`.
    pub fn sent(&mut self, id: ClientId, len: usize) -> Result<(), Error> {
        let client = client_mut(&mut self.clients, id)?;
        let acked = client.ring.skip(len.min(client.in_flight));
        client.in_flight -= acked;
        client.flush(&mut self.stats);
        Ok(())
    }

    /// Periodic poll of connection `id`.
    ///
    /// Retries pending output and closes the connection once it has been
    /// idle for [`Config::max_idle_rounds`] polls.
    pub fn poll(&mut self, id: ClientId) -> Result<(), Error> {
        let client = client_mut(&mut self.clients, id)?;
        client.flush(&mut self.stats);
        client.idle_rounds = client.idle_rounds.saturating_add(1);
        if client.idle_rounds < self.config.max_idle_rounds {
            return Ok(());
        }
        #[cfg(feature = "log")]
        log::debug!("Client {id} timed out");
        self.stats.clients_timeouts += 1;
        self.close(id)
    }

    /// The transport dropped connection `id` on its own, e.g. on reset.
    pub fn error(&mut self, id: ClientId) -> Result<(), Error> {
        take_client(&mut self.clients, id)?;
        #[cfg(feature = "log")]
        log::warn!("Client {id} failed");
        self.stats.clients_errors += 1;
        self.stats.clients_closed += 1;
        self.stats.disconnected();
        Ok(())
    }

    /// Close connection `id` and free its slot. Falls back to aborting the
    /// connection if the transport cannot close it.
    pub fn close(&mut self, id: ClientId) -> Result<(), Error> {
        let mut client = take_client(&mut self.clients, id)?;
        if let Err(err) = client.conn.close() {
            #[cfg(feature = "log")]
            log::warn!("Failed to close client {id}, aborting: {err}");
            #[cfg(not(feature = "log"))]
            let _ = err;
            client.conn.abort();
        }
        self.stats.clients_closed += 1;
        self.stats.disconnected();
        Ok(())
    }

    /// Close all connections.
    pub fn shutdown(&mut self) {
        for id in 0..CLIENTS {
            // Free slots are skipped.
            let _ = self.close(id);
        }
    }

    #[must_use]
    pub fn is_connected(&self, id: ClientId) -> bool {
        matches!(self.clients.get(id), Some(Some(_)))
    }

    /// The connection in slot `id`.
    #[must_use]
    pub fn connection(&self, id: ClientId) -> Option<&C> {
        self.clients.get(id)?.as_ref().map(|c| &c.conn)
    }

    /// Response bytes of connection `id` not yet acknowledged.
    #[must_use]
    pub fn pending_output(&self, id: ClientId) -> usize {
        self.clients
            .get(id)
            .and_then(Option::as_ref)
            .map_or(0, |c| c.ring.len())
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn stats(&self) -> &TcpStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub const fn slave(&self) -> &Slave<R, A, O> {
        &self.slave
    }

    pub const fn slave_mut(&mut self) -> &mut Slave<R, A, O> {
        &mut self.slave
    }

    /// Tear the server apart. Open connections are dropped without closing
    /// them, call [`Server::shutdown`] first.
    pub fn into_slave(self) -> Slave<R, A, O> {
        self.slave
    }
}

fn client_mut<C, const RING: usize>(
    clients: &mut [Option<Client<C, RING>>],
    id: ClientId,
) -> Result<&mut Client<C, RING>, Error> {
    clients
        .get_mut(id)
        .and_then(Option::as_mut)
        .ok_or(Error::UnknownClient(id))
}

fn take_client<C, const RING: usize>(
    clients: &mut [Option<Client<C, RING>>],
    id: ClientId,
) -> Result<Client<C, RING>, Error> {
    clients
        .get_mut(id)
        .and_then(Option::take)
        .ok_or(Error::UnknownClient(id))
}

/// Run one complete ADU through the codec and queue the response.
fn serve<R, A, O, const RING: usize>(
    slave: &mut Slave<R, A, O>,
    ring: &mut RingBuffer<RING>,
    stats: &mut TcpStats,
    adu: &[u8],
) where
    R: RegisterAccess,
    A: Allocator,
    O: Observer,
{
    stats.messages_received += 1;
    match slave.process_tcp(adu) {
        Ok(rsp) => {
            stats.messages_ok += 1;
            if ring.write(rsp).is_ok() {
                stats.messages_sent += 1;
            } else {
                #[cfg(feature = "log")]
                log::warn!("Output ring full, dropping {} byte response", rsp.len());
                stats.messages_ring_buffer_full += 1;
            }
        }
        Err(err) => {
            #[cfg(feature = "log")]
            log::debug!("Dropping TCP message: {err}");
            if err == Error::Allocation {
                stats.internal_errors += 1;
            }
            stats.messages_nok += 1;
        }
    }
    slave.free_response();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::StaticAllocator,
        frame::{Exception, QueryKind, RegisterQuery, RegisterType, Word},
    };
    use std::{cell::RefCell, rc::Rc, vec::Vec};

    #[derive(Debug, Default)]
    struct Wire {
        capacity: usize,
        written: Vec<u8>,
        window: usize,
        fail_write: bool,
        fail_close: bool,
        closed: bool,
        aborted: bool,
    }

    #[derive(Debug, Clone, Default)]
    struct FakeConnection(Rc<RefCell<Wire>>);

    impl FakeConnection {
        fn with_capacity(capacity: usize) -> Self {
            let conn = Self::default();
            conn.0.borrow_mut().capacity = capacity;
            conn
        }

        fn wire(&self) -> std::cell::RefMut<'_, Wire> {
            self.0.borrow_mut()
        }
    }

    impl Connection for FakeConnection {
        fn send_capacity(&self) -> usize {
            self.0.borrow().capacity
        }

        fn write(&mut self, data: &[u8]) -> Result<(), Error> {
            let mut wire = self.wire();
            if wire.fail_write {
                return Err(Error::Driver("tcp write"));
            }
            assert!(data.len() <= wire.capacity);
            wire.capacity -= data.len();
            wire.written.extend_from_slice(data);
            Ok(())
        }

        fn received(&mut self, len: usize) {
            self.wire().window += len;
        }

        fn close(&mut self) -> Result<(), Error> {
            let mut wire = self.wire();
            if wire.fail_close {
                return Err(Error::Driver("tcp close"));
            }
            wire.closed = true;
            Ok(())
        }

        fn abort(&mut self) {
            self.wire().aborted = true;
        }
    }

    type Registers = fn(RegisterQuery) -> Result<Word, Exception>;

    fn registers(q: RegisterQuery) -> Result<Word, Exception> {
        match (q.kind, q.register) {
            (QueryKind::Read, RegisterType::HoldingRegister) => Ok(0x1234),
            (_, RegisterType::HoldingRegister) => Ok(0),
            _ => Err(Exception::IllegalFunction),
        }
    }

    type TestServer<const CLIENTS: usize, const RING: usize> =
        Server<FakeConnection, Registers, StaticAllocator, (), CLIENTS, RING>;

    fn server<const CLIENTS: usize, const RING: usize>() -> TestServer<CLIENTS, RING> {
        let slave = Slave::new(registers as Registers, StaticAllocator::new(), ());
        Server::new(Config::default(), slave).unwrap()
    }

    const READ_REQUEST: [u8; 12] = [
        0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01,
    ];
    const READ_RESPONSE: [u8; 11] = [
        0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x12, 0x34,
    ];

    #[test]
    fn split_message_is_reassembled() {
        let mut s = server::<4, 64>();
        let conn = FakeConnection::with_capacity(1024);
        let id = s.accept(conn.clone()).unwrap();
        assert!(s.is_connected(id));
        assert_eq!(s.stats().clients_connected, 1);

        s.receive(id, Some(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01]))
            .unwrap();
        assert_eq!(s.stats().messages_received, 0);
        assert!(conn.wire().written.is_empty());
        assert_eq!(conn.wire().window, 7);

        s.receive(id, Some(&[0x03, 0x00, 0x00, 0x00, 0x01])).unwrap();
        assert_eq!(s.stats().messages_received, 1);
        assert_eq!(s.stats().messages_ok, 1);
        assert_eq!(s.stats().messages_sent, 1);
        assert_eq!(conn.wire().written, READ_RESPONSE);
        assert_eq!(conn.wire().window, 12);

        s.sent(id, READ_RESPONSE.len()).unwrap();
        assert_eq!(s.pending_output(id), 0);
    }

    #[test]
    fn oversized_message_does_not_block_connection() {
        let mut s = server::<4, 64>();
        let conn = FakeConnection::with_capacity(1024);
        let id = s.accept(conn.clone()).unwrap();

        s.receive(id, Some(&[0x00, 0x01, 0x00, 0x00, 0x02, 0x00, 0x01, 0x03]))
            .unwrap();
        assert_eq!(s.stats().messages_nok, 1);
        assert!(conn.wire().written.is_empty());

        s.receive(id, Some(&READ_REQUEST)).unwrap();
        assert_eq!(s.stats().messages_ok, 1);
        assert_eq!(conn.wire().written, READ_RESPONSE);
    }

    #[test]
    fn several_messages_in_one_chunk() {
        let mut s = server::<4, 64>();
        let conn = FakeConnection::with_capacity(1024);
        let id = s.accept(conn.clone()).unwrap();
        let mut chunk = READ_REQUEST.to_vec();
        chunk.extend_from_slice(&READ_REQUEST);
        s.receive(id, Some(&chunk)).unwrap();
        assert_eq!(s.stats().messages_ok, 2);
        assert_eq!(conn.wire().written.len(), 2 * READ_RESPONSE.len());
    }

    #[test]
    fn malformed_message_is_not_answered() {
        let mut s = server::<4, 64>();
        let conn = FakeConnection::with_capacity(1024);
        let id = s.accept(conn.clone()).unwrap();
        let mut req = READ_REQUEST;
        req[3] = 0x01;
        s.receive(id, Some(&req)).unwrap();
        assert_eq!(s.stats().messages_received, 1);
        assert_eq!(s.stats().messages_nok, 1);
        assert!(conn.wire().written.is_empty());
    }

    #[test]
    fn full_ring_drops_response() {
        let mut s = server::<4, 16>();
        let conn = FakeConnection::with_capacity(0);
        let id = s.accept(conn.clone()).unwrap();
        s.receive(id, Some(&READ_REQUEST)).unwrap();
        s.receive(id, Some(&READ_REQUEST)).unwrap();
        assert_eq!(s.stats().messages_ok, 2);
        assert_eq!(s.stats().messages_sent, 1);
        assert_eq!(s.stats().messages_ring_buffer_full, 1);
        assert_eq!(s.pending_output(id), READ_RESPONSE.len());
    }

    #[test]
    fn partial_acknowledge_resumes_at_offset() {
        let mut s = server::<4, 64>();
        let conn = FakeConnection::with_capacity(4);
        let id = s.accept(conn.clone()).unwrap();
        s.receive(id, Some(&READ_REQUEST)).unwrap();
        assert_eq!(conn.wire().written, READ_RESPONSE[..4]);

        conn.wire().capacity = 2;
        s.sent(id, 3).unwrap();
        assert_eq!(conn.wire().written, READ_RESPONSE[..6]);
        assert_eq!(s.pending_output(id), 8);

        conn.wire().capacity = 100;
        s.sent(id, 3).unwrap();
        assert_eq!(conn.wire().written, READ_RESPONSE);

        s.sent(id, 5).unwrap();
        assert_eq!(s.pending_output(id), 0);
        // Acknowledging more than was written is ignored.
        s.sent(id, 10).unwrap();
        assert_eq!(conn.wire().written, READ_RESPONSE);
    }

    #[test]
    fn write_failure_keeps_output_queued() {
        let mut s = server::<4, 64>();
        let conn = FakeConnection::with_capacity(100);
        conn.wire().fail_write = true;
        let id = s.accept(conn.clone()).unwrap();
        s.receive(id, Some(&READ_REQUEST)).unwrap();
        assert_eq!(s.stats().internal_errors, 1);
        assert_eq!(s.pending_output(id), READ_RESPONSE.len());

        conn.wire().fail_write = false;
        s.poll(id).unwrap();
        assert_eq!(conn.wire().written, READ_RESPONSE);
    }

    #[test]
    fn idle_connection_times_out() {
        let mut s = server::<4, 64>();
        let conn = FakeConnection::with_capacity(100);
        let id = s.accept(conn.clone()).unwrap();
        s.poll(id).unwrap();
        s.poll(id).unwrap();
        s.receive(id, Some(&READ_REQUEST)).unwrap();
        s.poll(id).unwrap();
        s.poll(id).unwrap();
        assert!(s.is_connected(id));
        s.poll(id).unwrap();
        assert!(!s.is_connected(id));
        assert!(conn.wire().closed);
        assert_eq!(s.stats().clients_timeouts, 1);
        assert_eq!(s.stats().clients_closed, 1);
        assert_eq!(s.stats().clients_connected, 0);
        assert_eq!(s.poll(id), Err(Error::UnknownClient(id)));
    }

    #[test]
    fn reject_when_pool_is_full() {
        let mut s = server::<2, 64>();
        let first = s.accept(FakeConnection::default()).unwrap();
        let second = s.accept(FakeConnection::default()).unwrap();
        assert_ne!(first, second);

        let rejected = FakeConnection::default();
        assert_eq!(s.accept(rejected.clone()), Err(Error::NoFreeSlot));
        assert!(rejected.wire().aborted);
        assert_eq!(s.stats().clients_rejected, 1);
        assert_eq!(s.stats().clients_max, 2);

        s.receive(first, None).unwrap();
        assert_eq!(s.accept(FakeConnection::default()), Ok(first));
        assert_eq!(s.stats().clients_accepted, 3);
        assert_eq!(s.stats().clients_connected, 2);
    }

    #[test]
    fn remote_close_and_errors_free_the_slot() {
        let mut s = server::<4, 64>();
        let conn = FakeConnection::default();
        conn.wire().fail_close = true;
        let id = s.accept(conn.clone()).unwrap();
        s.receive(id, None).unwrap();
        assert!(conn.wire().aborted);
        assert!(!s.is_connected(id));
        assert_eq!(s.stats().clients_closed, 1);

        let id = s.accept(FakeConnection::default()).unwrap();
        s.error(id).unwrap();
        assert!(!s.is_connected(id));
        assert_eq!(s.stats().clients_errors, 1);
        assert_eq!(s.stats().clients_connected, 0);
        assert_eq!(s.error(id), Err(Error::UnknownClient(id)));
        assert_eq!(s.receive(99, Some(&READ_REQUEST)), Err(Error::UnknownClient(99)));
    }

    #[test]
    fn new_rejects_invalid_config() {
        let slave = Slave::new(registers as Registers, StaticAllocator::new(), ());
        let res: Result<TestServer<4, 64>, _> = Server::new(Config { max_idle_rounds: 0 }, slave);
        assert!(matches!(res, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn shutdown_closes_all_connections() {
        let mut s = server::<4, 64>();
        let a = FakeConnection::default();
        let b = FakeConnection::default();
        s.accept(a.clone()).unwrap();
        s.accept(b.clone()).unwrap();
        s.shutdown();
        assert!(a.wire().closed && b.wire().closed);
        assert_eq!(s.stats().clients_connected, 0);
        assert_eq!(s.stats().clients_closed, 2);
    }
}
