//! Double-buffer bookkeeping for the pipelined driver.
//!
//! Each buffer role (source tiles, destination tiles) owns a [`BufferPair`]:
//! two slots, each either *filling* (free for a producer) or *draining* (a
//! consumer has been enqueued against it). A draining slot carries the event
//! that marks the end of its consumption; [`BufferPair::reclaim`] hands that
//! event back so the next producer can wait on it before overwriting.
//!
//! The pair also tracks its *leading* slot, the one most recently
//! published. Publishing always flips the leading slot, so the driver finds
//! the next slot to fill and the slot to consume without keeping its own
//! iteration counter.
//!
//! ```text
//!            fill            publish        begin_drain
//!   Filling ───────▶ Filling ───────▶ (leading) ───────▶ Draining(ev)
//!      ▲                                                     │
//!      └──────────────────── reclaim → ev ───────────────────┘
//! ```

use crate::device::Event;
use crate::error::{ConvError, ConvResult};

/// One of the two slots of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Ping.
    A,
    /// Pong.
    B,
}

impl Slot {
    /// The other slot.
    #[inline]
    pub fn other(self) -> Self {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    /// `0` for `A`, `1` for `B`.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }
}

/// State of one slot.
#[derive(Debug, Clone)]
pub enum SlotState {
    /// Free for a producer.
    Filling,
    /// A consumer is enqueued; the event completes when it is done.
    Draining(Event),
}

impl SlotState {
    /// Returns `true` for [`SlotState::Draining`].
    pub fn is_draining(&self) -> bool {
        matches!(self, SlotState::Draining(_))
    }
}

/// Two slots of one buffer role.
#[derive(Debug)]
pub struct BufferPair {
    role: &'static str,
    states: [SlotState; 2],
    leading: Option<Slot>,
}

impl BufferPair {
    /// A pair with both slots filling and nothing published.
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            states: [SlotState::Filling, SlotState::Filling],
            leading: None,
        }
    }

    /// Role name used in errors and logs.
    pub fn role(&self) -> &'static str {
        self.role
    }

    /// State of `slot`.
    pub fn state(&self, slot: Slot) -> &SlotState {
        &self.states[slot.index()]
    }

    /// Most recently published slot.
    pub fn leading(&self) -> Option<Slot> {
        self.leading
    }

    /// Leading slot, failing if nothing was published yet.
    pub fn require_leading(&self) -> ConvResult<Slot> {
        self.leading.ok_or_else(|| {
            ConvError::invalid_transition(format!("{} pair has no published slot", self.role))
        })
    }

    /// Slot the next producer writes: the one not leading.
    pub fn next_slot(&self) -> Slot {
        self.leading.map_or(Slot::A, Slot::other)
    }

    /// Returns a draining slot to filling, yielding the event its producer
    /// must wait on. `None` when the slot was already free.
    pub fn reclaim(&mut self, slot: Slot) -> Option<Event> {
        match std::mem::replace(&mut self.states[slot.index()], SlotState::Filling) {
            SlotState::Draining(event) => Some(event),
            SlotState::Filling => None,
        }
    }

    /// Asserts `slot` may be written.
    pub fn fill(&self, slot: Slot) -> ConvResult<()> {
        if self.state(slot).is_draining() {
            return Err(ConvError::invalid_transition(format!(
                "{} slot {:?} written while draining",
                self.role, slot
            )));
        }
        Ok(())
    }

    /// Marks `slot` as the leading slot once its producer is enqueued.
    pub fn publish(&mut self, slot: Slot) -> ConvResult<()> {
        self.fill(slot)?;
        if self.leading == Some(slot) {
            return Err(ConvError::invalid_transition(format!(
                "{} slot {:?} published twice in a row",
                self.role, slot
            )));
        }
        self.leading = Some(slot);
        Ok(())
    }

    /// Marks `slot` as being consumed until `event` completes.
    pub fn begin_drain(&mut self, slot: Slot, event: Event) -> ConvResult<()> {
        if self.state(slot).is_draining() {
            return Err(ConvError::invalid_transition(format!(
                "{} slot {:?} already draining",
                self.role, slot
            )));
        }
        self.states[slot.index()] = SlotState::Draining(event);
        Ok(())
    }
}
