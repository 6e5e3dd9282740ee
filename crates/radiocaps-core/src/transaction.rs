//! # Capability Switch Transaction
//!
//! Book-keeping for the single in-flight switch. The manager owns at most
//! one [`Transaction`]; its absence means `Idle`.
//!
//! ```text
//!   Idle ──trigger──▶ Starting ──all START ok──▶ Applying ──all reports match──▶ Finishing ──▶ Idle
//!                        │                          │                                ▲
//!                        └──START failed────────────┴──timeout / mismatch / failure──┘
//! ```

use std::fmt;

use quanta::Instant;
use serde::Serialize;

use crate::agent::AgentId;
use crate::capability::Phase;
use crate::channel::RilError;
use crate::device::SlotIndex;

/// Manager transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Idle,
    Starting,
    Applying,
    Finishing,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::Idle => write!(f, "idle"),
            TxState::Starting => write!(f, "starting"),
            TxState::Applying => write!(f, "applying"),
            TxState::Finishing => write!(f, "finishing"),
        }
    }
}

/// Why a switch was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// A phase request failed on the channel.
    RequestFailed {
        slot: SlotIndex,
        phase: Phase,
        error: RilError,
    },
    /// The modem answered a phase request with status FAIL.
    Rejected { slot: SlotIndex, phase: Phase },
    /// The unsolicited report disagrees with the pending target.
    Mismatch { slot: SlotIndex },
    /// The unsolicited report carries a different session id.
    UnknownSession { slot: SlotIndex, session_id: u32 },
    /// Not every APPLY confirmation arrived in time.
    Timeout,
    /// A participant deregistered mid-transaction.
    ParticipantRemoved { slot: SlotIndex },
}

/// Observable outcome of manager processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SwitchEvent {
    StateChanged {
        session_id: u32,
        from: TxState,
        to: TxState,
    },
    /// Every participant's pending capability became current.
    Committed { session_id: u32, holder: SlotIndex },
    /// Settled assignment left unchanged.
    Aborted { session_id: u32, reason: AbortReason },
    /// A desired holder was recorded while a transaction is in flight.
    Queued { slot: SlotIndex },
    /// A switch towards `slot` waits for an affected modem to become ready.
    Deferred { slot: SlotIndex },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Participant {
    pub agent: AgentId,
    pub slot: SlotIndex,
    pub started: bool,
    pub confirmed: bool,
}

impl Participant {
    pub fn new(agent: AgentId, slot: SlotIndex) -> Self {
        Participant {
            agent,
            slot,
            started: false,
            confirmed: false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Transaction {
    pub session_id: u32,
    pub state: TxState,
    pub winner: AgentId,
    pub participants: Vec<Participant>,
    /// APPLY confirmation deadline, set on entering `Applying`.
    pub deadline: Option<Instant>,
}

impl Transaction {
    pub fn new(session_id: u32, winner: AgentId, participants: Vec<Participant>) -> Self {
        Transaction {
            session_id,
            state: TxState::Starting,
            winner,
            participants,
            deadline: None,
        }
    }

    pub fn involves(&self, agent: AgentId) -> bool {
        self.participants.iter().any(|p| p.agent == agent)
    }

    pub fn participant_mut(&mut self, agent: AgentId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.agent == agent)
    }

    pub fn all_started(&self) -> bool {
        self.participants.iter().all(|p| p.started)
    }

    pub fn all_confirmed(&self) -> bool {
        self.participants.iter().all(|p| p.confirmed)
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.state == TxState::Applying && self.deadline.is_some_and(|d| now >= d)
    }
}
