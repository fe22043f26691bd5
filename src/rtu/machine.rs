//! Silent-interval framing state machine
//!
//! [`transition`] is a pure function. The [`Session`](super::Session) feeds it
//! events from interrupt and task context and carries out the returned
//! [`Effects`].

use core::ops::BitOr;

/// RTU line state.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// Waiting for a first 3.5 character silence.
    #[default]
    Init,
    /// Ready to receive a frame.
    Idle,
    /// Receiving a frame.
    Reception,
    /// 1.5 character silence seen, waiting for the end of frame.
    Wait,
    /// Frame complete, waiting for the task to process it.
    Ready,
    /// Transmitting the response.
    Emission,
}

/// Inputs of the state machine.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A byte arrived on the line.
    Byte(u8),
    /// A byte arrived while the receive buffer is full.
    BufferFull,
    /// The receiver lost data.
    Overrun,
    /// The 1.5 character timer expired.
    T15,
    /// The 3.5 character timer expired.
    T35,
    /// The codec produced a response for the received frame.
    ResponseQueued,
    /// The received frame must not be answered.
    NoResponse,
    /// The task is ready to transmit the queued response.
    EmitReady,
    /// The last byte of the response has been handed to the transmitter.
    SendBufferEmpty,
}

/// Side effects of a transition, as a bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Effects(u16);

impl Effects {
    pub const NONE: Self = Self(0);
    /// Append the received byte to the receive buffer.
    pub const STORE_BYTE: Self = Self(1 << 0);
    /// Start both silence timers from zero.
    pub const START_TIMERS: Self = Self(1 << 1);
    /// Zero both timer counts, keeping them running.
    pub const RESET_TIMERS: Self = Self(1 << 2);
    /// Start the 3.5 character timer from zero.
    pub const RESTART_T35: Self = Self(1 << 3);
    pub const DISABLE_TIMERS: Self = Self(1 << 4);
    /// Drop the received bytes.
    pub const DISCARD_FRAME: Self = Self(1 << 5);
    pub const NOTIFY_READ_READY: Self = Self(1 << 6);
    pub const NOTIFY_EMIT_READY: Self = Self(1 << 7);
    /// Switch the line to transmit and send the first byte.
    pub const START_TRANSMIT: Self = Self(1 << 8);
    pub const STOP_TRANSMIT: Self = Self(1 << 9);
    pub const ENABLE_RECEIVE: Self = Self(1 << 10);
    pub const CLEAR_SEND_BUFFER: Self = Self(1 << 11);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for Effects {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Result of [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: State,
    pub effects: Effects,
}

impl Transition {
    const fn stay(state: State) -> Self {
        Self {
            next: state,
            effects: Effects::NONE,
        }
    }

    const fn to(next: State, effects: Effects) -> Self {
        Self { next, effects }
    }
}

/// Compute the successor of `state` on `event`.
#[must_use]
pub const fn transition(state: State, event: Event) -> Transition {
    use Event as E;
    use State as S;

    match (state, event) {
        (_, E::Overrun) => Transition::to(
            S::Idle,
            Effects::CLEAR_SEND_BUFFER
                .union(Effects::DISABLE_TIMERS)
                .union(Effects::DISCARD_FRAME)
                .union(Effects::ENABLE_RECEIVE),
        ),
        (_, E::BufferFull) => Transition::to(
            S::Idle,
            Effects::DISABLE_TIMERS.union(Effects::DISCARD_FRAME),
        ),

        // Bytes seen before the line was silent once are noise.
        (S::Init, E::Byte(_)) => Transition::to(S::Init, Effects::RESTART_T35),
        (S::Init, E::T35) => Transition::to(S::Idle, Effects::NONE),

        (S::Idle, E::Byte(_)) => Transition::to(
            S::Reception,
            Effects::STORE_BYTE.union(Effects::START_TIMERS),
        ),

        (S::Reception, E::Byte(_)) => Transition::to(
            S::Reception,
            Effects::STORE_BYTE.union(Effects::RESET_TIMERS),
        ),
        (S::Reception, E::T15) => Transition::to(S::Wait, Effects::NONE),

        // A byte between 1.5 and 3.5 characters of silence breaks the
        // frame. Resynchronize on the next full silence.
        (S::Wait, E::Byte(_)) => Transition::to(
            S::Init,
            Effects::DISCARD_FRAME.union(Effects::RESTART_T35),
        ),
        (S::Wait, E::T35) => Transition::to(S::Ready, Effects::NOTIFY_READ_READY),

        // The frame is complete. Bytes of the next one are dropped until
        // the task has answered.
        (S::Ready, E::ResponseQueued) => Transition::to(S::Emission, Effects::NOTIFY_EMIT_READY),
        (S::Ready, E::NoResponse) => Transition::to(
            S::Idle,
            Effects::ENABLE_RECEIVE.union(Effects::CLEAR_SEND_BUFFER),
        ),

        (S::Emission, E::EmitReady) => Transition::to(S::Emission, Effects::START_TRANSMIT),
        (S::Emission, E::SendBufferEmpty) => Transition::to(
            S::Emission,
            Effects::STOP_TRANSMIT
                .union(Effects::RESTART_T35)
                .union(Effects::CLEAR_SEND_BUFFER),
        ),
        (S::Emission, E::T35) => Transition::to(S::Idle, Effects::ENABLE_RECEIVE),

        _ => Transition::stay(state),
    }
}
