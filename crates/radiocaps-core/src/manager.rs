//! # Capability Manager
//!
//! One manager per device. It owns the registry of agents, decides which
//! modem should hold full capability and drives the switch transaction
//! that gets it there.
//!
//! Channel completions, unsolicited reports and data-manager notifications
//! never touch manager state directly: they are pushed onto an event queue
//! and applied by [`CapsManager::process_events`] (or a [`crate::CapsRuntime`]
//! worker calling it). The state machine is therefore only re-entered from
//! that one place, and a callback fired from inside a request submission
//! cannot recurse into a half-updated transaction.
//!
//! ```text
//!   trigger ──▶ evaluate ──(idle)──────▶ START x N ──▶ APPLY x N ──▶ reports ──▶ FINISH/SUCCESS
//!                  │                        │              │                        commit
//!                  └─(in flight)─▶ queued   └── failure ───┴── timeout/mismatch ──▶ FINISH/FAIL
//!                                                                                   rollback
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use quanta::Clock;
use tracing::{debug, info, trace, warn};

use crate::agent::{AgentId, AgentRecord, ResponseMatch};
use crate::capability::{Phase, RadioCapability, Status};
use crate::channel::{HandlerId, RilChannel, RilResult};
use crate::config::ManagerConfig;
use crate::device::{DataManager, NetworkState, RadioState, SlotConfig, SlotIndex};
use crate::policy::{AgentView, CapabilityPolicy};
use crate::transaction::{AbortReason, Participant, SwitchEvent, Transaction, TxState};

/// Sessions remembered so that their late reports are not mistaken for
/// spontaneous capability changes.
const RECENT_SESSIONS: usize = 32;

/// Work item for the manager's event queue.
#[derive(Debug)]
pub(crate) enum CapsEvent {
    Reevaluate,
    /// Unblocks a waiting worker without doing anything.
    Wake,
    PhaseResponse {
        agent: AgentId,
        token: u64,
        result: RilResult,
    },
    CapabilityChanged {
        agent: AgentId,
        capability: RadioCapability,
    },
}

struct ManagerState {
    config: ManagerConfig,
    policy: Box<dyn CapabilityPolicy>,
    clock: Clock,
    events_tx: Sender<CapsEvent>,
    data_manager: Arc<dyn DataManager>,
    dm_handler: Option<HandlerId>,
    /// Registration order is the tie-break order.
    agents: Vec<AgentRecord>,
    next_agent: u64,
    next_session: u32,
    tx: Option<Transaction>,
    /// Desired holder recorded while a transaction was in flight.
    queued: Option<AgentId>,
    /// A trigger arrived while a transaction was in flight.
    reevaluate: bool,
    recent_sessions: VecDeque<u32>,
    outbox: Vec<SwitchEvent>,
    shut_down: bool,
}

struct ManagerShared {
    state: Mutex<ManagerState>,
    events_rx: Receiver<CapsEvent>,
    /// Held by whoever is draining `events_rx`, so events are applied in
    /// queue order even with several drivers.
    driver: Mutex<()>,
}

impl ManagerShared {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ManagerShared {
    fn drop(&mut self) {
        self.lock().shutdown();
    }
}

/// Shared handle to the device-wide capability manager.
///
/// Cloning adds a reference; the manager is torn down when the last clone
/// (including those held by [`crate::RadioCaps`] agents) is dropped.
#[derive(Clone)]
pub struct CapsManager {
    shared: Arc<ManagerShared>,
}

impl CapsManager {
    pub fn new(data_manager: Arc<dyn DataManager>) -> Self {
        Self::with_config(data_manager, ManagerConfig::default())
    }

    pub fn with_config(data_manager: Arc<dyn DataManager>, config: ManagerConfig) -> Self {
        let policy = Box::new(config.policy());
        Self::with_parts(data_manager, config, policy, Clock::new())
    }

    /// Full constructor: custom assignment policy and clock.
    pub fn with_parts(
        data_manager: Arc<dyn DataManager>,
        config: ManagerConfig,
        policy: Box<dyn CapabilityPolicy>,
        clock: Clock,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();

        let notify = events_tx.clone();
        let dm_handler = data_manager.add_slot_changed_handler(Box::new(move || {
            let _ = notify.send(CapsEvent::Reevaluate);
        }));

        let next_session = config.first_session_id.max(1);
        let state = ManagerState {
            config,
            policy,
            clock,
            events_tx,
            data_manager,
            dm_handler: Some(dm_handler),
            agents: Vec::new(),
            next_agent: 0,
            next_session,
            tx: None,
            queued: None,
            reevaluate: false,
            recent_sessions: VecDeque::with_capacity(RECENT_SESSIONS),
            outbox: Vec::new(),
            shut_down: false,
        };

        CapsManager {
            shared: Arc::new(ManagerShared {
                state: Mutex::new(state),
                events_rx,
                driver: Mutex::new(()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.shared.lock()
    }

    /// Applies every queued event (and an expired APPLY deadline) and
    /// returns what happened. Never blocks.
    pub fn process_events(&self) -> Vec<SwitchEvent> {
        let _driver = self.shared.driver.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.lock();
        state.pump(&self.shared.events_rx);
        std::mem::take(&mut state.outbox)
    }

    /// Waits up to `max_wait` for the first event (or the APPLY deadline),
    /// then behaves like [`CapsManager::process_events`].
    pub fn wait_events(&self, max_wait: Duration) -> Vec<SwitchEvent> {
        // Only the state lock is released while blocked; triggers and
        // registrations never need the driver lock.
        let _driver = self.shared.driver.lock().unwrap_or_else(|e| e.into_inner());
        let wait = self
            .next_deadline()
            .map_or(max_wait, |left| left.min(max_wait));

        // The manager holds a sender, so only a timeout ends the wait early.
        let first = self.shared.events_rx.recv_timeout(wait).ok();

        let mut state = self.lock();
        if let Some(event) = first {
            state.handle(event);
        }
        state.pump(&self.shared.events_rx);
        std::mem::take(&mut state.outbox)
    }

    /// Time left until the APPLY deadline, if a transaction is waiting on one.
    pub fn next_deadline(&self) -> Option<Duration> {
        let state = self.lock();
        let deadline = state.tx.as_ref()?.deadline?;
        Some(deadline.saturating_duration_since(state.clock.now()))
    }

    /// Requests a re-evaluation of the full-capability assignment.
    pub fn trigger(&self) {
        let _ = self.lock().events_tx.send(CapsEvent::Reevaluate);
    }

    pub(crate) fn wake(&self) {
        let _ = self.lock().events_tx.send(CapsEvent::Wake);
    }

    /// Abandons any in-flight transaction without FINISH, cancels all
    /// outstanding requests and detaches every agent. Idempotent.
    pub fn shutdown(&self) {
        self.lock().shutdown();
    }

    pub fn state(&self) -> TxState {
        self.lock().tx.as_ref().map_or(TxState::Idle, |tx| tx.state)
    }

    /// Session id of the in-flight transaction.
    pub fn session_id(&self) -> Option<u32> {
        self.lock().tx.as_ref().map(|tx| tx.session_id)
    }

    /// Slot whose agent holds full capability in the settled assignment.
    pub fn holder_slot(&self) -> Option<SlotIndex> {
        let state = self.lock();
        state
            .agents
            .iter()
            .find(|a| a.current.as_ref().is_some_and(|c| state.policy.holds_full(c)))
            .map(|a| a.slot())
    }

    /// Slot recorded as the next desired holder while a switch is in flight.
    pub fn queued_slot(&self) -> Option<SlotIndex> {
        let state = self.lock();
        let queued = state.queued?;
        state.record(queued).map(|a| a.slot())
    }

    pub fn agent_count(&self) -> usize {
        self.lock().agents.len()
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    pub fn clock(&self) -> Clock {
        self.lock().clock.clone()
    }

    pub fn config(&self) -> ManagerConfig {
        self.lock().config.clone()
    }

    pub(crate) fn register(
        &self,
        log_prefix: &str,
        channel: Arc<dyn RilChannel>,
        radio: Arc<dyn RadioState>,
        network: Arc<dyn NetworkState>,
        config: SlotConfig,
        initial: Option<RadioCapability>,
    ) -> AgentId {
        let mut state = self.lock();
        state.next_agent += 1;
        let id = AgentId(state.next_agent);
        if state.shut_down {
            debug!(agent = %log_prefix, "manager shut down, agent not tracked");
            return id;
        }

        let record = AgentRecord::attach(
            id,
            log_prefix.to_string(),
            channel,
            radio,
            network,
            config,
            initial,
            &state.events_tx,
        );
        debug!(agent = %log_prefix, slot = record.slot(), "registered");
        state.agents.push(record);
        let _ = state.events_tx.send(CapsEvent::Reevaluate);
        id
    }

    pub(crate) fn deregister(&self, id: AgentId) {
        self.lock().deregister(id);
    }

    pub(crate) fn agent_current(&self, id: AgentId) -> Option<RadioCapability> {
        self.lock().record(id)?.current.clone()
    }

    pub(crate) fn agent_pending(&self, id: AgentId) -> Option<RadioCapability> {
        self.lock().record(id)?.pending.clone()
    }
}

impl fmt::Debug for CapsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("CapsManager")
            .field("agents", &state.agents.len())
            .field("state", &state.tx.as_ref().map_or(TxState::Idle, |tx| tx.state))
            .field("queued", &state.queued)
            .finish()
    }
}

// ─── State machine ─────────────────────────────────────────────────────────

impl ManagerState {
    fn record(&self, id: AgentId) -> Option<&AgentRecord> {
        self.agents.iter().find(|a| a.id == id)
    }

    fn index_of(&self, id: AgentId) -> Option<usize> {
        self.agents.iter().position(|a| a.id == id)
    }

    fn emit(&mut self, event: SwitchEvent) {
        self.outbox.push(event);
    }

    fn transition(&mut self, to: TxState) {
        let Some(tx) = self.tx.as_mut() else {
            return;
        };
        let from = tx.state;
        tx.state = to;
        let session_id = tx.session_id;
        debug!(session = session_id, %from, %to, "transaction state");
        self.emit(SwitchEvent::StateChanged {
            session_id,
            from,
            to,
        });
    }

    fn pump(&mut self, events: &Receiver<CapsEvent>) {
        loop {
            match events.try_recv() {
                Ok(event) => self.handle(event),
                Err(_) => {
                    if !self.check_deadline() {
                        break;
                    }
                }
            }
        }
    }

    fn handle(&mut self, event: CapsEvent) {
        if self.shut_down {
            return;
        }
        match event {
            CapsEvent::Reevaluate => self.evaluate(),
            CapsEvent::Wake => {}
            CapsEvent::PhaseResponse {
                agent,
                token,
                result,
            } => self.on_response(agent, token, result),
            CapsEvent::CapabilityChanged { agent, capability } => {
                self.on_capability(agent, capability)
            }
        }
    }

    /// Aborts a transaction whose APPLY deadline passed. Returns true if
    /// it did.
    fn check_deadline(&mut self) -> bool {
        let now = self.clock.now();
        if self.tx.as_ref().is_some_and(|tx| tx.expired(now)) {
            self.abort(AbortReason::Timeout);
            return true;
        }
        false
    }

    fn allocate_session(&mut self) -> u32 {
        let id = self.next_session;
        self.next_session = self.next_session.wrapping_add(1).max(1);
        id
    }

    fn remember_session(&mut self, session_id: u32) {
        if self.recent_sessions.len() == RECENT_SESSIONS {
            self.recent_sessions.pop_front();
        }
        self.recent_sessions.push_back(session_id);
    }

    /// Index of the agent that should hold full capability.
    fn desired_holder(&self) -> Option<usize> {
        let views: Vec<AgentView<'_>> = self.agents.iter().map(|a| a.view()).collect();

        if let Some(slot) = self.data_manager.data_slot() {
            if let Some(i) = views.iter().position(|v| v.slot() == slot) {
                if self.policy.eligible(&views[i]) {
                    return Some(i);
                }
            }
        }
        if let Some(i) = views
            .iter()
            .position(|v| v.current.is_some_and(|c| self.policy.holds_full(c)))
        {
            return Some(i);
        }
        views.iter().position(|v| self.policy.eligible(v))
    }

    fn evaluate(&mut self) {
        if self.tx.is_some() {
            self.reevaluate = true;
        }
        let Some(winner) = self.desired_holder() else {
            trace!("no eligible agent");
            return;
        };
        let winner_id = self.agents[winner].id;

        if let Some(tx) = &self.tx {
            if tx.winner == winner_id {
                self.queued = None;
            } else if self.queued != Some(winner_id) {
                self.queued = Some(winner_id);
                let slot = self.agents[winner].slot();
                debug!(slot, session = tx.session_id, "switch queued");
                self.emit(SwitchEvent::Queued { slot });
            }
            return;
        }

        self.start(winner);
    }

    fn start(&mut self, winner: usize) {
        let targets = {
            let views: Vec<AgentView<'_>> = self.agents.iter().map(|a| a.view()).collect();
            self.policy.plan(&views, winner)
        };

        // Agents with an unknown capability cannot hold full, so only the
        // winner is switched away from "unknown".
        let affected: Vec<(usize, RadioCapability)> = targets
            .into_iter()
            .enumerate()
            .filter(|(i, target)| {
                let current = self.agents[*i].current.as_ref();
                (*i == winner || current.is_some()) && !target.is_met_by(current)
            })
            .map(|(i, target)| {
                let cap = RadioCapability::configured(target.rat, target.logical_modem_id);
                (i, cap)
            })
            .collect();

        let winner_slot = self.agents[winner].slot();
        if affected.is_empty() {
            trace!(slot = winner_slot, "assignment already settled");
            return;
        }
        if let Some((i, _)) = affected.iter().find(|(i, _)| !self.agents[*i].is_ready()) {
            debug!(
                slot = winner_slot,
                blocked_by = %self.agents[*i].log_prefix,
                "switch deferred until modem is ready"
            );
            self.emit(SwitchEvent::Deferred { slot: winner_slot });
            return;
        }

        let session_id = self.allocate_session();
        let participants = affected
            .iter()
            .map(|(i, _)| Participant::new(self.agents[*i].id, self.agents[*i].slot()))
            .collect();
        let winner_id = self.agents[winner].id;

        for (i, cap) in &affected {
            self.agents[*i].pending = Some(cap.for_phase(session_id, Phase::Start, Status::Unknown));
        }

        info!(
            session = session_id,
            slot = winner_slot,
            participants = affected.len(),
            "capability switch started"
        );
        self.tx = Some(Transaction::new(session_id, winner_id, participants));
        self.emit(SwitchEvent::StateChanged {
            session_id,
            from: TxState::Idle,
            to: TxState::Starting,
        });

        self.send_phase(Phase::Start);
    }

    /// Issues `phase` to every participant before any answer is processed.
    fn send_phase(&mut self, phase: Phase) {
        let Some(tx) = &self.tx else {
            return;
        };
        let session_id = tx.session_id;
        let ids: Vec<AgentId> = tx.participants.iter().map(|p| p.agent).collect();

        for id in ids {
            let Some(idx) = self.index_of(id) else {
                continue;
            };
            let agent = &mut self.agents[idx];
            let Some(pending) = &agent.pending else {
                continue;
            };
            let cap = pending.for_phase(session_id, phase, Status::Unknown);
            agent.send_phase(cap, &self.events_tx);
        }
    }

    fn on_response(&mut self, agent: AgentId, token: u64, result: RilResult) {
        let Some(idx) = self.index_of(agent) else {
            trace!(%agent, "response for removed agent");
            return;
        };
        let record = &mut self.agents[idx];
        let phase = match record.take_response(token) {
            ResponseMatch::Phase(phase) => phase,
            ResponseMatch::Finish => {
                if let Err(error) = &result {
                    debug!(agent = %record.log_prefix, %error, "finish failed");
                }
                return;
            }
            ResponseMatch::Stale => {
                trace!(agent = %record.log_prefix, token, "stale response");
                return;
            }
        };
        let slot = record.slot();

        let Some(tx) = self.tx.as_mut() else {
            return;
        };
        if !tx.involves(agent) {
            return;
        }

        match result {
            Err(error) => {
                warn!(session = tx.session_id, slot, %phase, %error, "phase request failed");
                self.abort(AbortReason::RequestFailed { slot, phase, error });
            }
            Ok(Some(cap)) if cap.status == Status::Fail => {
                warn!(session = tx.session_id, slot, %phase, "phase rejected by modem");
                self.abort(AbortReason::Rejected { slot, phase });
            }
            Ok(_) => {
                if phase != Phase::Start || tx.state != TxState::Starting {
                    // APPLY acknowledgments are informational, commit waits
                    // for the unsolicited reports.
                    return;
                }
                if let Some(p) = tx.participant_mut(agent) {
                    p.started = true;
                }
                if tx.all_started() {
                    self.enter_apply();
                }
            }
        }
    }

    fn enter_apply(&mut self) {
        let deadline = self.clock.now() + self.config.apply_timeout;
        if let Some(tx) = self.tx.as_mut() {
            tx.deadline = Some(deadline);
        }
        self.transition(TxState::Applying);
        self.send_phase(Phase::Apply);
    }

    fn on_capability(&mut self, agent: AgentId, cap: RadioCapability) {
        let Some(idx) = self.index_of(agent) else {
            return;
        };
        let slot = self.agents[idx].slot();

        let Some(tx) = self.tx.as_mut() else {
            if self.accept_report(idx, cap) {
                self.evaluate();
            }
            return;
        };

        if !tx.involves(agent) {
            // Not ours to confirm, but the modem really changed: re-plan
            // once the transaction settles.
            if cap.session_id != tx.session_id && self.accept_report(idx, cap) {
                self.reevaluate = true;
            }
            return;
        }
        if tx.state != TxState::Applying {
            debug!(
                agent = %self.agents[idx].log_prefix,
                session = cap.session_id,
                state = %tx.state,
                "capability report ignored"
            );
            return;
        }

        if cap.session_id != tx.session_id && self.recent_sessions.contains(&cap.session_id) {
            trace!(slot, session = cap.session_id, "late report ignored");
            return;
        }
        if cap.session_id != tx.session_id {
            warn!(session = tx.session_id, slot, reported = cap.session_id, "unknown session");
            self.abort(AbortReason::UnknownSession {
                slot,
                session_id: cap.session_id,
            });
            return;
        }

        let matches = self.agents[idx]
            .pending
            .as_ref()
            .is_some_and(|p| p.same_binding(&cap));
        if cap.status == Status::Fail || !matches {
            warn!(session = tx.session_id, slot, capability = %cap, "capability mismatch");
            self.abort(AbortReason::Mismatch { slot });
            return;
        }

        debug!(session = tx.session_id, slot, "apply confirmed");
        if let Some(p) = tx.participant_mut(agent) {
            p.confirmed = true;
        }
        if tx.all_confirmed() {
            self.commit();
        }
    }

    /// Takes a report outside any transaction of ours as a spontaneous
    /// change, unless it is a late echo of one of our own sessions.
    /// Returns true if the agent's current capability changed.
    fn accept_report(&mut self, idx: usize, cap: RadioCapability) -> bool {
        let record = &mut self.agents[idx];
        if cap.session_id != 0 && self.recent_sessions.contains(&cap.session_id) {
            trace!(agent = %record.log_prefix, session = cap.session_id, "late report ignored");
            return false;
        }
        if cap.status == Status::Fail {
            return false;
        }
        if record.current.as_ref().is_some_and(|c| c.same_binding(&cap)) {
            return false;
        }

        info!(agent = %record.log_prefix, capability = %cap, "capability changed");
        record.current = Some(cap.for_phase(cap.session_id, Phase::Configured, cap.status));
        true
    }

    fn commit(&mut self) {
        self.transition(TxState::Finishing);
        let Some(tx) = self.tx.take() else {
            return;
        };
        let session_id = tx.session_id;

        // Every participant flips pending → current in this one step.
        for p in &tx.participants {
            let Some(idx) = self.index_of(p.agent) else {
                continue;
            };
            let agent = &mut self.agents[idx];
            agent.cancel_outstanding();
            if let Some(pending) = agent.pending.take() {
                agent.send_finish(
                    pending.for_phase(session_id, Phase::Finish, Status::Success),
                    &self.events_tx,
                );
                agent.current = Some(pending.for_phase(session_id, Phase::Configured, Status::Success));
            }
        }

        let holder = self
            .index_of(tx.winner)
            .map(|i| self.agents[i].slot())
            .unwrap_or_else(|| tx.participants.first().map_or(0, |p| p.slot));
        info!(session = session_id, holder, "capability switch committed");

        self.emit(SwitchEvent::StateChanged {
            session_id,
            from: TxState::Finishing,
            to: TxState::Idle,
        });
        self.emit(SwitchEvent::Committed { session_id, holder });
        self.remember_session(session_id);
        self.settle();
    }

    fn abort(&mut self, reason: AbortReason) {
        self.transition(TxState::Finishing);
        let Some(tx) = self.tx.take() else {
            return;
        };
        let session_id = tx.session_id;
        let reduced_rat = self.config.reduced_rat;

        for p in &tx.participants {
            let Some(idx) = self.index_of(p.agent) else {
                continue;
            };
            let agent = &mut self.agents[idx];
            agent.cancel_outstanding();
            if agent.pending.take().is_some() {
                // A modem with no known capability falls back to its slot
                // default, never to the target being abandoned.
                let revert = agent.current.clone().unwrap_or_else(|| {
                    RadioCapability::configured(reduced_rat, agent.config.logical_modem_id.clone())
                });
                let finish = revert.for_phase(session_id, Phase::Finish, Status::Fail);
                agent.send_finish(finish, &self.events_tx);
            }
        }

        warn!(session = session_id, ?reason, "capability switch aborted");
        self.emit(SwitchEvent::StateChanged {
            session_id,
            from: TxState::Finishing,
            to: TxState::Idle,
        });
        self.emit(SwitchEvent::Aborted { session_id, reason });
        self.remember_session(session_id);
        self.settle();
    }

    /// Back in idle: re-plan if anything changed meanwhile.
    fn settle(&mut self) {
        self.queued = None;
        if std::mem::take(&mut self.reevaluate) {
            self.evaluate();
        }
    }

    fn deregister(&mut self, id: AgentId) {
        let Some(idx) = self.index_of(id) else {
            return;
        };
        let mut record = self.agents.remove(idx);
        record.detach();
        debug!(agent = %record.log_prefix, slot = record.slot(), "deregistered");

        if self.queued == Some(id) {
            self.queued = None;
        }
        if self.tx.as_ref().is_some_and(|tx| tx.involves(id)) {
            self.abort(AbortReason::ParticipantRemoved {
                slot: record.slot(),
            });
        }
        let _ = self.events_tx.send(CapsEvent::Reevaluate);
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if let Some(tx) = self.tx.take() {
            info!(session = tx.session_id, state = %tx.state, "transaction abandoned");
        }
        self.queued = None;
        self.reevaluate = false;
        for agent in &mut self.agents {
            agent.detach();
        }
        self.agents.clear();
        if let Some(handler) = self.dm_handler.take() {
            self.data_manager.remove_handler(handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::RatMask;
    use crate::sim::{SimChannel, SimDataManager, SimNetwork, SimRadio};
    use crate::RadioCaps;

    struct Modem {
        channel: Arc<SimChannel>,
        caps: RadioCaps,
    }

    fn modem(manager: &CapsManager, slot: SlotIndex, initial: Option<RadioCapability>) -> Modem {
        let channel = Arc::new(SimChannel::new(format!("ril{slot}")));
        channel.set_modem_capability(initial.clone());
        let caps = RadioCaps::new(
            manager,
            &format!("[ril{slot}]"),
            channel.clone(),
            Arc::new(SimRadio::new(true)),
            Arc::new(SimNetwork::new(false)),
            SlotConfig::new(slot, manager.config().full_rat),
            initial,
        );
        Modem { channel, caps }
    }

    fn full(id: &str) -> RadioCapability {
        RadioCapability::configured(ManagerConfig::default().full_rat, id)
    }

    fn reduced(id: &str) -> RadioCapability {
        RadioCapability::configured(RatMask::FAMILY_GSM, id)
    }

    #[test]
    fn session_ids_wrap_skipping_zero() {
        let dm = Arc::new(SimDataManager::new(None));
        let cfg = ManagerConfig {
            first_session_id: u32::MAX,
            ..Default::default()
        };
        let manager = CapsManager::with_config(dm, cfg);
        let mut state = manager.lock();
        assert_eq!(state.allocate_session(), u32::MAX);
        assert_eq!(state.allocate_session(), 1);
    }

    #[test]
    fn data_manager_handler_lifecycle() {
        let dm = Arc::new(SimDataManager::new(None));
        let manager = CapsManager::new(dm.clone());
        assert_eq!(dm.handler_count(), 1);
        let other = manager.clone();
        assert_eq!(manager.ref_count(), 2);
        drop(other);
        drop(manager);
        assert_eq!(dm.handler_count(), 0);
    }

    #[test]
    fn settled_assignment_needs_no_transaction() {
        let dm = Arc::new(SimDataManager::new(Some(0)));
        let manager = CapsManager::new(dm);
        let _m0 = modem(&manager, 0, Some(full("modem0")));
        let _m1 = modem(&manager, 1, Some(reduced("modem1")));

        let events = manager.process_events();
        assert!(events.is_empty(), "{events:?}");
        assert_eq!(manager.holder_slot(), Some(0));
    }

    #[test]
    fn unknown_non_winner_is_left_alone() {
        let dm = Arc::new(SimDataManager::new(Some(0)));
        let manager = CapsManager::new(dm);
        let m0 = modem(&manager, 0, None);
        let m1 = modem(&manager, 1, None);

        manager.process_events();
        assert_eq!(manager.holder_slot(), Some(0));
        assert!(m1.channel.requests().is_empty());
        assert!(m1.caps.current().is_none());
        assert_eq!(
            m0.channel.sent_phases(),
            vec![Phase::Start, Phase::Apply, Phase::Finish]
        );
    }

    #[test]
    fn late_report_from_own_session_is_ignored() {
        let dm = Arc::new(SimDataManager::new(Some(0)));
        let manager = CapsManager::new(dm);
        let m0 = modem(&manager, 0, None);
        manager.process_events();
        let committed = m0.caps.current().unwrap();

        let stale = reduced("modem9").for_phase(committed.session_id, Phase::UnsolRsp, Status::Success);
        m0.channel.emit(crate::channel::UnsolEvent::RadioCapability(stale));
        manager.process_events();
        assert!(m0.caps.current().unwrap().same_binding(&committed));
    }

    #[test]
    fn spontaneous_second_holder_is_reduced() {
        let dm = Arc::new(SimDataManager::new(Some(1)));
        let manager = CapsManager::new(dm);
        let m0 = modem(&manager, 0, Some(reduced("modem0")));
        let m1 = modem(&manager, 1, Some(full("modem1")));
        assert!(manager.process_events().is_empty());

        m0.channel.emit(crate::channel::UnsolEvent::RadioCapability(full("modem0")));
        let events = manager.process_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SwitchEvent::Committed { holder: 1, .. })));

        let policy = manager.config().policy();
        assert!(!policy.holds_full(&m0.caps.current().unwrap()));
        assert!(policy.holds_full(&m1.caps.current().unwrap()));
        assert_eq!(manager.holder_slot(), Some(1));
    }

    #[test]
    fn concurrent_drivers_apply_events_in_order() {
        let dm = Arc::new(SimDataManager::new(Some(0)));
        let manager = CapsManager::new(dm);
        let waiter = {
            let manager = manager.clone();
            std::thread::spawn(move || manager.wait_events(Duration::from_secs(2)))
        };
        std::thread::sleep(Duration::from_millis(50));

        let _m0 = modem(&manager, 0, None);
        let mine = manager.process_events();
        let theirs = waiter.join().unwrap();

        // Whoever drained the queue did so alone, from the first event on.
        let all: Vec<_> = theirs.into_iter().chain(mine).collect();
        let states: Vec<_> = all
            .iter()
            .filter_map(|e| match e {
                SwitchEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                TxState::Starting,
                TxState::Applying,
                TxState::Finishing,
                TxState::Idle
            ]
        );
        assert!(matches!(all.last(), Some(SwitchEvent::Committed { holder: 0, .. })));
    }

    #[test]
    fn shutdown_detaches_agents() {
        let dm = Arc::new(SimDataManager::new(Some(0)));
        let manager = CapsManager::new(dm.clone());
        let m0 = modem(&manager, 0, None);
        assert_eq!(m0.channel.handler_count(), 1);

        manager.shutdown();
        manager.shutdown();
        assert_eq!(manager.agent_count(), 0);
        assert_eq!(m0.channel.handler_count(), 0);
        assert_eq!(dm.handler_count(), 0);
        assert!(manager.process_events().is_empty());
        assert!(m0.channel.requests().is_empty());
    }
}
