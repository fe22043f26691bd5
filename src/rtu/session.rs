//! RTU slave session

use super::{
    Config, Effects, Event, Events, MAX_FRAME_LEN, Notify, State, Timer, Timeouts,
    silence_timeouts, transition,
};
use crate::{
    buffer::Allocator,
    error::Error,
    slave::{RegisterAccess, Slave},
    stats::{Observer, RtuStats},
};

/// Direction of the half duplex line.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Receiver and transmitter interrupts off.
    #[default]
    Off,
    /// Receiver on, RS-485 driver released.
    Receive,
    /// Transmitter on, RS-485 driver enabled.
    Transmit,
}

/// UART driver of the session.
pub trait Serial {
    /// Configure and enable the port.
    fn start(&mut self, baud_rate: u32) -> Result<(), Error>;

    fn stop(&mut self) -> Result<(), Error>;

    /// Switch interrupts and the direction pin.
    fn set_mode(&mut self, mode: Mode);

    /// Hand one byte to the transmitter.
    fn write_byte(&mut self, byte: u8);

    /// Read and clear a pending receiver overrun.
    fn take_overrun(&mut self) -> bool;
}

/// A Modbus RTU slave on one serial line.
///
/// The `on_*` methods are meant for interrupt context, [`Session::poll`] for
/// the task handling the notifications.
#[derive(Debug)]
pub struct Session<S, N, R, A, O = ()> {
    config: Config,
    active: bool,
    state: State,
    rx: [u8; MAX_FRAME_LEN],
    rx_len: usize,
    tx: [u8; MAX_FRAME_LEN],
    tx_len: usize,
    tx_pos: usize,
    emit_pending: bool,
    t15: Timer,
    t35: Timer,
    slave: Slave<R, A, O>,
    serial: S,
    notifier: N,
    stats: RtuStats,
}

impl<S, N, R, A, O> Session<S, N, R, A, O>
where
    S: Serial,
    N: Notify,
    R: RegisterAccess,
    A: Allocator,
    O: Observer,
{
    pub const fn new(config: Config, serial: S, notifier: N, slave: Slave<R, A, O>) -> Self {
        Self {
            config,
            active: false,
            state: State::Init,
            rx: [0; MAX_FRAME_LEN],
            rx_len: 0,
            tx: [0; MAX_FRAME_LEN],
            tx_len: 0,
            tx_pos: 0,
            emit_pending: false,
            t15: Timer::new(0),
            t35: Timer::new(0),
            slave,
            serial,
            notifier,
            stats: RtuStats {
                messages_received: 0,
                messages_sent: 0,
                messages_ok: 0,
                messages_nok: 0,
                frames_discarded: 0,
                overruns: 0,
                unknown_events: 0,
                timer_errors: 0,
                uart_errors: 0,
                internal_errors: 0,
            },
        }
    }

    /// Validate the configuration, start the serial driver and begin
    /// listening for the first silent interval.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.active {
            return Err(Error::InvalidConfig("session already started"));
        }
        if self.config.tick_micros == 0 {
            self.stats.timer_errors += 1;
        }
        self.config.validate()?;

        let Timeouts { t15, t35 } =
            silence_timeouts(self.config.baud_rate, self.config.tick_micros);
        self.t15 = Timer::new(t15);
        self.t35 = Timer::new(t35);

        if let Err(err) = self.serial.start(self.config.baud_rate) {
            #[cfg(feature = "log")]
            log::error!("Failed to start serial port: {err}");
            self.stats.uart_errors += 1;
            self.slave.observer_mut().error("serial start failed");
            return Err(err);
        }

        self.clear_receive_buffer();
        self.clear_send_buffer();
        self.state = State::Init;
        self.serial.set_mode(Mode::Receive);
        self.t35.start();
        self.active = true;
        #[cfg(feature = "log")]
        log::debug!(
            "RTU slave {} listening at {} baud",
            self.config.slave_address,
            self.config.baud_rate
        );
        Ok(())
    }

    /// Silence the line and stop the serial driver.
    pub fn stop(&mut self) -> Result<(), Error> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.serial.set_mode(Mode::Off);
        self.t15.stop();
        self.t35.stop();
        self.clear_receive_buffer();
        self.clear_send_buffer();
        self.state = State::Init;
        self.serial.stop().inspect_err(|_| {
            self.stats.uart_errors += 1;
        })
    }

    /// A byte was received.
    pub fn on_byte_received(&mut self, byte: u8) {
        if !self.active {
            return;
        }
        let event = if self.state == State::Reception && self.rx_len >= self.rx.len() {
            #[cfg(feature = "log")]
            log::warn!("Receive buffer full, discarding frame");
            Event::BufferFull
        } else {
            Event::Byte(byte)
        };
        self.dispatch(event);
    }

    /// Periodic timer tick.
    pub fn on_tick(&mut self) {
        if !self.active {
            return;
        }
        if self.t15.tick() {
            self.dispatch(Event::T15);
        }
        if self.t35.tick() {
            self.dispatch(Event::T35);
        }
    }

    /// The transmitter can take the next byte.
    pub fn on_transmit_ready(&mut self) {
        if !self.active || self.state != State::Emission || self.tx_pos == 0 {
            return;
        }
        if let Some(&byte) = self.tx[..self.tx_len].get(self.tx_pos) {
            self.serial.write_byte(byte);
            self.tx_pos += 1;
        } else {
            self.stats.messages_sent += 1;
            self.dispatch(Event::SendBufferEmpty);
        }
    }

    /// The receiver lost data.
    pub fn on_overrun(&mut self) {
        if !self.active {
            return;
        }
        #[cfg(feature = "log")]
        log::warn!("Receiver overrun in state {:?}", self.state);
        self.stats.overruns += 1;
        self.dispatch(Event::Overrun);
    }

    /// Handle the events the task was woken with.
    ///
    /// An empty set means the wait timed out. Returns `false` in that case.
    pub fn poll(&mut self, events: Events) -> bool {
        if events.is_empty() {
            if self.active && self.serial.take_overrun() {
                self.stats.overruns += 1;
                if self.state != State::Emission {
                    self.serial.set_mode(Mode::Receive);
                }
            }
            return false;
        }
        if events.has_unknown() {
            self.stats.unknown_events += 1;
        }
        if events.contains(Events::READ_READY) {
            self.on_read_ready();
        }
        if events.contains(Events::EMIT_READY) {
            self.on_emit_ready();
        }
        true
    }

    fn on_read_ready(&mut self) {
        if self.state != State::Ready {
            return;
        }
        let len = core::mem::take(&mut self.rx_len);
        self.stats.messages_received += 1;

        let event = match self.slave.process_rtu(self.config.slave_address, &self.rx[..len]) {
            Ok(rsp) if rsp.is_empty() => {
                self.stats.messages_ok += 1;
                Event::NoResponse
            }
            Ok(rsp) => {
                self.stats.messages_ok += 1;
                self.tx[..rsp.len()].copy_from_slice(rsp);
                self.tx_len = rsp.len();
                self.tx_pos = 0;
                Event::ResponseQueued
            }
            Err(err) => {
                #[cfg(feature = "log")]
                log::debug!("Dropping RTU frame: {err}");
                if err == Error::Allocation {
                    self.stats.internal_errors += 1;
                }
                self.stats.messages_nok += 1;
                Event::NoResponse
            }
        };
        self.slave.free_response();
        self.rx[..len].fill(0);
        self.dispatch(event);
    }

    fn on_emit_ready(&mut self) {
        // Set once per queued response, so a stale event after the
        // transmission is a no-op.
        if self.state != State::Emission || !core::mem::take(&mut self.emit_pending) {
            return;
        }
        self.dispatch(Event::EmitReady);
    }

    fn dispatch(&mut self, event: Event) {
        let t = transition(self.state, event);
        self.state = t.next;
        self.apply(t.effects, event);
    }

    fn apply(&mut self, effects: Effects, event: Event) {
        if effects.contains(Effects::DISCARD_FRAME) {
            if self.rx_len > 0 {
                self.stats.frames_discarded += 1;
            }
            self.clear_receive_buffer();
        }
        if effects.contains(Effects::STORE_BYTE) {
            if let (Event::Byte(byte), Some(slot)) = (event, self.rx.get_mut(self.rx_len)) {
                *slot = byte;
                self.rx_len += 1;
            }
        }
        if effects.contains(Effects::DISABLE_TIMERS) {
            self.t15.stop();
            self.t35.stop();
        }
        if effects.contains(Effects::START_TIMERS) {
            self.t15.start();
            self.t35.start();
        }
        if effects.contains(Effects::RESET_TIMERS) {
            self.t15.reset();
            self.t35.reset();
        }
        if effects.contains(Effects::RESTART_T35) {
            self.t35.start();
        }
        if effects.contains(Effects::CLEAR_SEND_BUFFER) {
            self.clear_send_buffer();
        }
        if effects.contains(Effects::STOP_TRANSMIT) {
            self.serial.set_mode(Mode::Off);
        }
        if effects.contains(Effects::START_TRANSMIT) {
            self.serial.set_mode(Mode::Transmit);
            self.serial.write_byte(self.tx[0]);
            self.tx_pos = 1;
            self.emit_pending = false;
        }
        if effects.contains(Effects::ENABLE_RECEIVE) {
            self.serial.set_mode(Mode::Receive);
        }
        if effects.contains(Effects::NOTIFY_READ_READY) {
            self.notifier.notify(Events::READ_READY);
        }
        if effects.contains(Effects::NOTIFY_EMIT_READY) {
            self.emit_pending = true;
            self.notifier.notify(Events::EMIT_READY);
        }
    }

    fn clear_receive_buffer(&mut self) {
        self.rx[..self.rx_len].fill(0);
        self.rx_len = 0;
    }

    fn clear_send_buffer(&mut self) {
        self.tx[..self.tx_len].fill(0);
        self.tx_len = 0;
        self.tx_pos = 0;
        self.emit_pending = false;
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn stats(&self) -> &RtuStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Bytes of the frame currently being received.
    #[must_use]
    pub fn received(&self) -> &[u8] {
        &self.rx[..self.rx_len]
    }

    pub const fn slave(&self) -> &Slave<R, A, O> {
        &self.slave
    }

    pub const fn slave_mut(&mut self) -> &mut Slave<R, A, O> {
        &mut self.slave
    }

    pub const fn serial(&self) -> &S {
        &self.serial
    }

    pub const fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    pub const fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Tear the session apart. Call [`Session::stop`] first.
    pub fn into_parts(self) -> (S, N, Slave<R, A, O>) {
        (self.serial, self.notifier, self.slave)
    }
}

#[cfg(feature = "std")]
impl<S, N, R, A, O> Session<S, N, R, A, O>
where
    S: Serial,
    N: Notify + core::ops::Deref<Target = super::Signal>,
    R: RegisterAccess,
    A: Allocator,
    O: Observer,
{
    /// Wait at most [`Config::poll_timeout`] for events and handle them.
    ///
    /// Returns `false` if the wait timed out.
    pub fn wait_and_poll(&mut self) -> bool {
        let events = self.notifier.wait_timeout(self.config.poll_timeout);
        self.poll(events)
    }
}
