//! # Per-Modem Capability Agent
//!
//! One agent per modem. The agent never decides anything: it executes the
//! manager's phase requests on its own channel and forwards responses and
//! unsolicited capability reports back to the manager's event queue.
//!
//! [`RadioCaps`] is the shared handle modem drivers hold. Cloning it adds
//! a reference; dropping the last clone cancels the agent's outstanding
//! requests and deregisters it from the manager.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::debug;

use crate::capability::{Phase, RadioCapability};
use crate::channel::{
    HandlerId, RequestId, RilChannel, RilRequest, RilResult, UnsolEvent, UnsolKind,
};
use crate::device::{NetworkState, RadioState, SlotConfig, SlotIndex};
use crate::manager::{CapsEvent, CapsManager};
use crate::policy::AgentView;

/// Manager-assigned agent identity, unique for the manager's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(pub(crate) u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent{}", self.0)
    }
}

/// A request the agent is still waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Outstanding {
    pub request: RequestId,
    pub token: u64,
    pub phase: Phase,
}

/// What a response token refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseMatch {
    /// The current START/APPLY request.
    Phase(Phase),
    /// A FINISH request, which nobody waits on.
    Finish,
    /// Cancelled, superseded or unknown.
    Stale,
}

/// Per-modem participant state, owned by the manager's registry.
pub(crate) struct AgentRecord {
    pub id: AgentId,
    pub log_prefix: String,
    pub channel: Arc<dyn RilChannel>,
    pub radio: Arc<dyn RadioState>,
    pub network: Arc<dyn NetworkState>,
    pub config: SlotConfig,
    /// Last confirmed capability.
    pub current: Option<RadioCapability>,
    /// Target of the in-flight transaction.
    pub pending: Option<RadioCapability>,
    pub outstanding: Option<Outstanding>,
    finishing: Vec<Outstanding>,
    next_token: u64,
    unsol_handler: Option<HandlerId>,
}

impl AgentRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn attach(
        id: AgentId,
        log_prefix: String,
        channel: Arc<dyn RilChannel>,
        radio: Arc<dyn RadioState>,
        network: Arc<dyn NetworkState>,
        config: SlotConfig,
        initial: Option<RadioCapability>,
        events: &Sender<CapsEvent>,
    ) -> Self {
        let tx = events.clone();
        let handler = channel.add_unsol_handler(
            UnsolKind::RadioCapability,
            Arc::new(move |event: &UnsolEvent| {
                let UnsolEvent::RadioCapability(cap) = event;
                let _ = tx.send(CapsEvent::CapabilityChanged {
                    agent: id,
                    capability: cap.clone(),
                });
            }),
        );

        AgentRecord {
            id,
            log_prefix,
            channel,
            radio,
            network,
            config,
            current: initial,
            pending: None,
            outstanding: None,
            finishing: Vec::new(),
            next_token: 0,
            unsol_handler: Some(handler),
        }
    }

    pub fn slot(&self) -> SlotIndex {
        self.config.slot
    }

    pub fn view(&self) -> AgentView<'_> {
        AgentView {
            config: &self.config,
            current: self.current.as_ref(),
            online: self.radio.is_online(),
        }
    }

    /// Radio online and nothing on the network side that forbids a switch.
    pub fn is_ready(&self) -> bool {
        self.radio.is_online() && !self.network.is_busy()
    }

    fn submit(&mut self, cap: RadioCapability, events: &Sender<CapsEvent>) -> Outstanding {
        self.next_token += 1;
        let token = self.next_token;
        let phase = cap.phase;
        let agent = self.id;
        let tx = events.clone();

        debug!(agent = %self.log_prefix, capability = %cap, "set radio capability");
        let request = self.channel.send(
            RilRequest::SetRadioCapability(cap),
            Box::new(move |result: RilResult| {
                let _ = tx.send(CapsEvent::PhaseResponse {
                    agent,
                    token,
                    result,
                });
            }),
        );
        Outstanding {
            request,
            token,
            phase,
        }
    }

    /// Sends a START or APPLY request. At most one such request is
    /// outstanding; a previous one is cancelled first.
    pub fn send_phase(&mut self, cap: RadioCapability, events: &Sender<CapsEvent>) {
        self.cancel_outstanding();
        let outstanding = self.submit(cap, events);
        self.outstanding = Some(outstanding);
    }

    /// Sends a FINISH request without waiting on it.
    pub fn send_finish(&mut self, cap: RadioCapability, events: &Sender<CapsEvent>) {
        let outstanding = self.submit(cap, events);
        self.finishing.push(outstanding);
    }

    pub fn take_response(&mut self, token: u64) -> ResponseMatch {
        if let Some(out) = self.outstanding.filter(|o| o.token == token) {
            self.outstanding = None;
            return ResponseMatch::Phase(out.phase);
        }
        if let Some(pos) = self.finishing.iter().position(|o| o.token == token) {
            self.finishing.remove(pos);
            return ResponseMatch::Finish;
        }
        ResponseMatch::Stale
    }

    pub fn cancel_outstanding(&mut self) {
        if let Some(out) = self.outstanding.take() {
            if self.channel.cancel(out.request) {
                debug!(agent = %self.log_prefix, request = %out.request, phase = %out.phase, "cancelled");
            }
        }
    }

    /// Cancels everything in flight and stops listening to the channel.
    pub fn detach(&mut self) {
        self.cancel_outstanding();
        for out in self.finishing.drain(..) {
            self.channel.cancel(out.request);
        }
        if let Some(handler) = self.unsol_handler.take() {
            self.channel.remove_handler(handler);
        }
        self.pending = None;
    }
}

// ─── Public handle ─────────────────────────────────────────────────────────

struct AgentHandle {
    id: AgentId,
    slot: SlotIndex,
    manager: CapsManager,
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        self.manager.deregister(self.id);
    }
}

/// Shared handle to one modem's capability agent.
#[derive(Clone)]
pub struct RadioCaps {
    inner: Arc<AgentHandle>,
}

impl RadioCaps {
    /// Creates an agent for one modem and registers it with `manager`.
    ///
    /// `initial` seeds the agent's confirmed capability when the modem has
    /// already reported one (typically from [`crate::probe::check`]).
    pub fn new(
        manager: &CapsManager,
        log_prefix: &str,
        channel: Arc<dyn RilChannel>,
        radio: Arc<dyn RadioState>,
        network: Arc<dyn NetworkState>,
        config: SlotConfig,
        initial: Option<RadioCapability>,
    ) -> Self {
        let slot = config.slot;
        let id = manager.register(log_prefix, channel, radio, network, config, initial);
        RadioCaps {
            inner: Arc::new(AgentHandle {
                id,
                slot,
                manager: manager.clone(),
            }),
        }
    }

    pub fn id(&self) -> AgentId {
        self.inner.id
    }

    pub fn slot(&self) -> SlotIndex {
        self.inner.slot
    }

    pub fn manager(&self) -> &CapsManager {
        &self.inner.manager
    }

    /// Last confirmed capability.
    pub fn current(&self) -> Option<RadioCapability> {
        self.inner.manager.agent_current(self.inner.id)
    }

    /// Target of the in-flight transaction, if this modem takes part.
    pub fn pending(&self) -> Option<RadioCapability> {
        self.inner.manager.agent_pending(self.inner.id)
    }

    /// Re-evaluates the assignment after radio or network state changed.
    pub fn notify_state_changed(&self) {
        self.inner.manager.trigger();
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for RadioCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadioCaps")
            .field("id", &self.inner.id)
            .field("slot", &self.inner.slot)
            .finish()
    }
}
