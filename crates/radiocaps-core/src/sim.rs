//! Simulated collaborators for tests and the scenario runner.
//!
//! [`SimChannel`] behaves like a modem that implements the radio capability
//! requests: it either answers immediately (auto mode) or parks requests
//! until the caller completes them by id (manual mode). Failure injection
//! is per phase.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::capability::{Phase, RadioCapability, Status};
use crate::channel::{
    HandlerId, RequestId, ResponseHandler, RilChannel, RilError, RilRequest, RilResult,
    UnsolEvent, UnsolHandler, UnsolKind,
};
use crate::device::{ChangeHandler, DataManager, NetworkState, RadioState, SlotIndex};

/// How a [`SimChannel`] answers requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimBehavior {
    /// Answer every request from inside `send`. When false, requests wait
    /// for [`SimChannel::complete`] or [`SimChannel::fail`].
    pub auto_reply: bool,
    /// When false every capability request fails with "request not supported".
    pub supports_caps: bool,
    /// SET_RADIO_CAPABILITY requests in this phase fail with a generic failure.
    pub fail_phase: Option<Phase>,
    /// Emit the unsolicited report after a successful APPLY.
    pub confirm_apply: bool,
}

impl Default for SimBehavior {
    fn default() -> Self {
        SimBehavior {
            auto_reply: true,
            supports_caps: true,
            fail_phase: None,
            confirm_apply: true,
        }
    }
}

impl SimBehavior {
    /// Parked requests, otherwise well-behaved.
    pub fn manual() -> Self {
        SimBehavior {
            auto_reply: false,
            ..Default::default()
        }
    }
}

struct PendingRequest {
    id: RequestId,
    request: RilRequest,
    handler: ResponseHandler,
}

struct SimInner {
    behavior: SimBehavior,
    capability: Option<RadioCapability>,
    next_request: u32,
    next_handler: u64,
    pending: Vec<PendingRequest>,
    handlers: Vec<(HandlerId, UnsolKind, UnsolHandler)>,
    log: Vec<RilRequest>,
    cancelled: Vec<RequestId>,
}

impl SimInner {
    /// Modem-side effect of a request: the response and an optional
    /// unsolicited report to emit afterwards.
    fn reply_for(&mut self, request: &RilRequest) -> (RilResult, Option<RadioCapability>) {
        if !self.behavior.supports_caps {
            return (Err(RilError::RequestNotSupported), None);
        }
        match request {
            RilRequest::GetRadioCapability => (Ok(self.capability.clone()), None),
            RilRequest::SetRadioCapability(cap) => {
                if self.behavior.fail_phase == Some(cap.phase) {
                    return (Err(RilError::GenericFailure), None);
                }
                let mut unsol = None;
                match cap.phase {
                    Phase::Apply if self.behavior.confirm_apply => {
                        self.capability = Some(RadioCapability::configured(
                            cap.rat,
                            cap.logical_modem_id.clone(),
                        ));
                        unsol = Some(cap.for_phase(
                            cap.session_id,
                            Phase::UnsolRsp,
                            Status::Success,
                        ));
                    }
                    Phase::Finish if cap.status == Status::Fail => {
                        self.capability = Some(RadioCapability::configured(
                            cap.rat,
                            cap.logical_modem_id.clone(),
                        ));
                    }
                    _ => {}
                }
                let echo = cap.for_phase(cap.session_id, cap.phase, Status::Success);
                (Ok(Some(echo)), unsol)
            }
        }
    }
}

/// In-memory modem channel.
pub struct SimChannel {
    name: String,
    inner: Mutex<SimInner>,
}

impl SimChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_behavior(name, SimBehavior::default())
    }

    pub fn with_behavior(name: impl Into<String>, behavior: SimBehavior) -> Self {
        SimChannel {
            name: name.into(),
            inner: Mutex::new(SimInner {
                behavior,
                capability: None,
                next_request: 0,
                next_handler: 0,
                pending: Vec::new(),
                handlers: Vec::new(),
                log: Vec::new(),
                cancelled: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn behavior(&self) -> SimBehavior {
        self.lock().behavior.clone()
    }

    pub fn set_behavior(&self, behavior: SimBehavior) {
        self.lock().behavior = behavior;
    }

    /// Capability the simulated modem currently runs with.
    pub fn modem_capability(&self) -> Option<RadioCapability> {
        self.lock().capability.clone()
    }

    pub fn set_modem_capability(&self, cap: Option<RadioCapability>) {
        self.lock().capability = cap;
    }

    /// Every request ever submitted, in order.
    pub fn requests(&self) -> Vec<RilRequest> {
        self.lock().log.clone()
    }

    /// SET_RADIO_CAPABILITY payloads, in order.
    pub fn sent_capabilities(&self) -> Vec<RadioCapability> {
        self.lock()
            .log
            .iter()
            .filter_map(|r| match r {
                RilRequest::SetRadioCapability(cap) => Some(cap.clone()),
                RilRequest::GetRadioCapability => None,
            })
            .collect()
    }

    /// Phases of the SET_RADIO_CAPABILITY requests, in order.
    pub fn sent_phases(&self) -> Vec<Phase> {
        self.sent_capabilities().iter().map(|c| c.phase).collect()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Requests parked in manual mode.
    pub fn pending(&self) -> Vec<(RequestId, RilRequest)> {
        self.lock()
            .pending
            .iter()
            .map(|p| (p.id, p.request.clone()))
            .collect()
    }

    /// Id of the parked SET_RADIO_CAPABILITY request for `phase`, if any.
    pub fn pending_phase(&self, phase: Phase) -> Option<RequestId> {
        self.lock().pending.iter().find_map(|p| match &p.request {
            RilRequest::SetRadioCapability(cap) if cap.phase == phase => Some(p.id),
            _ => None,
        })
    }

    pub fn cancelled(&self) -> Vec<RequestId> {
        self.lock().cancelled.clone()
    }

    pub fn handler_count(&self) -> usize {
        self.lock().handlers.len()
    }

    /// Answers a parked request the way auto mode would.
    pub fn complete(&self, id: RequestId) -> bool {
        let (handler, result, unsol) = {
            let mut inner = self.lock();
            let Some(pos) = inner.pending.iter().position(|p| p.id == id) else {
                return false;
            };
            let pending = inner.pending.remove(pos);
            let (result, unsol) = inner.reply_for(&pending.request);
            (pending.handler, result, unsol)
        };
        handler(result);
        if let Some(cap) = unsol {
            self.emit(UnsolEvent::RadioCapability(cap));
        }
        true
    }

    /// Answers a parked request with an explicit result, without side effects.
    pub fn respond(&self, id: RequestId, result: RilResult) -> bool {
        let handler = {
            let mut inner = self.lock();
            let Some(pos) = inner.pending.iter().position(|p| p.id == id) else {
                return false;
            };
            inner.pending.remove(pos).handler
        };
        handler(result);
        true
    }

    pub fn fail(&self, id: RequestId, error: RilError) -> bool {
        self.respond(id, Err(error))
    }

    /// Completes every parked request in submission order.
    pub fn complete_all(&self) -> usize {
        let ids: Vec<RequestId> = self.lock().pending.iter().map(|p| p.id).collect();
        ids.into_iter().filter(|id| self.complete(*id)).count()
    }

    /// Delivers an unsolicited notification to every matching handler.
    pub fn emit(&self, event: UnsolEvent) {
        let handlers: Vec<UnsolHandler> = self
            .lock()
            .handlers
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind())
            .map(|(_, _, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }
}

impl RilChannel for SimChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, request: RilRequest, on_response: ResponseHandler) -> RequestId {
        let (id, result, unsol) = {
            let mut inner = self.lock();
            inner.next_request += 1;
            let id = RequestId(inner.next_request);
            inner.log.push(request.clone());
            if !inner.behavior.auto_reply {
                inner.pending.push(PendingRequest {
                    id,
                    request,
                    handler: on_response,
                });
                return id;
            }
            let (result, unsol) = inner.reply_for(&request);
            (id, result, unsol)
        };
        on_response(result);
        if let Some(cap) = unsol {
            self.emit(UnsolEvent::RadioCapability(cap));
        }
        id
    }

    fn cancel(&self, id: RequestId) -> bool {
        let mut inner = self.lock();
        let Some(pos) = inner.pending.iter().position(|p| p.id == id) else {
            return false;
        };
        inner.pending.remove(pos);
        inner.cancelled.push(id);
        true
    }

    fn add_unsol_handler(&self, kind: UnsolKind, handler: UnsolHandler) -> HandlerId {
        let mut inner = self.lock();
        inner.next_handler += 1;
        let id = HandlerId(inner.next_handler);
        inner.handlers.push((id, kind, handler));
        id
    }

    fn remove_handler(&self, id: HandlerId) {
        self.lock().handlers.retain(|(h, _, _)| *h != id);
    }
}

// ─── Data manager / radio / network ────────────────────────────────────────

/// Data manager whose designated slot is set by the caller.
#[derive(Default)]
pub struct SimDataManager {
    slot: Mutex<Option<SlotIndex>>,
    handlers: Mutex<Vec<(HandlerId, Arc<ChangeHandler>)>>,
    next_handler: Mutex<u64>,
}

impl SimDataManager {
    pub fn new(slot: Option<SlotIndex>) -> Self {
        SimDataManager {
            slot: Mutex::new(slot),
            ..Default::default()
        }
    }

    /// Changes the designated slot and notifies handlers if it differs.
    pub fn set_data_slot(&self, slot: Option<SlotIndex>) {
        {
            let mut current = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            if *current == slot {
                return;
            }
            *current = slot;
        }
        self.notify();
    }

    /// Notifies handlers without changing the slot.
    pub fn notify(&self) {
        let handlers: Vec<Arc<ChangeHandler>> = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler();
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl DataManager for SimDataManager {
    fn data_slot(&self) -> Option<SlotIndex> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add_slot_changed_handler(&self, handler: ChangeHandler) -> HandlerId {
        let mut next = self.next_handler.lock().unwrap_or_else(|e| e.into_inner());
        *next += 1;
        let id = HandlerId(*next);
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(handler)));
        id
    }

    fn remove_handler(&self, id: HandlerId) {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(h, _)| *h != id);
    }
}

pub struct SimRadio {
    online: AtomicBool,
}

impl SimRadio {
    pub fn new(online: bool) -> Self {
        SimRadio {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RadioState for SimRadio {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct SimNetwork {
    busy: AtomicBool,
}

impl SimNetwork {
    pub fn new(busy: bool) -> Self {
        SimNetwork {
            busy: AtomicBool::new(busy),
        }
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Relaxed);
    }
}

impl NetworkState for SimNetwork {
    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::RatMask;

    fn recorder() -> (Arc<Mutex<Vec<RilResult>>>, ResponseHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Box::new(move |r: RilResult| sink.lock().unwrap().push(r)))
    }

    #[test]
    fn auto_apply_updates_modem_and_emits_report() {
        let ch = SimChannel::new("ril0");
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        ch.add_unsol_handler(
            UnsolKind::RadioCapability,
            Arc::new(move |ev: &UnsolEvent| sink.lock().unwrap().push(ev.clone())),
        );

        let cap = RadioCapability::configured(RatMask::FAMILY_LTE, "modem1")
            .for_phase(5, Phase::Apply, Status::Unknown);
        let (seen, handler) = recorder();
        ch.send(RilRequest::SetRadioCapability(cap), handler);

        assert!(matches!(seen.lock().unwrap()[0], Ok(Some(_))));
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        let UnsolEvent::RadioCapability(report) = &reports[0];
        assert_eq!(report.session_id, 5);
        assert_eq!(report.phase, Phase::UnsolRsp);
        assert_eq!(ch.modem_capability().unwrap().rat, RatMask::FAMILY_LTE);
    }

    #[test]
    fn injected_failure_for_phase() {
        let ch = SimChannel::with_behavior(
            "ril0",
            SimBehavior {
                fail_phase: Some(Phase::Start),
                ..Default::default()
            },
        );
        let cap = RadioCapability::configured(RatMask::GSM, "modem0")
            .for_phase(1, Phase::Start, Status::Unknown);
        let (seen, handler) = recorder();
        ch.send(RilRequest::SetRadioCapability(cap), handler);
        assert_eq!(seen.lock().unwrap()[0], Err(RilError::GenericFailure));
    }

    #[test]
    fn manual_requests_wait_and_cancel_drops_handler() {
        let ch = SimChannel::with_behavior("ril0", SimBehavior::manual());
        let (seen, handler) = recorder();
        let id = ch.send(RilRequest::GetRadioCapability, handler);
        assert_eq!(ch.pending().len(), 1);
        assert!(ch.cancel(id));
        assert!(!ch.complete(id));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(ch.cancelled(), vec![id]);
    }

    #[test]
    fn data_manager_notifies_only_on_change() {
        let dm = SimDataManager::new(Some(0));
        let hits = Arc::new(Mutex::new(0));
        let sink = hits.clone();
        let id = dm.add_slot_changed_handler(Box::new(move || *sink.lock().unwrap() += 1));

        dm.set_data_slot(Some(0));
        dm.set_data_slot(Some(1));
        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(dm.data_slot(), Some(1));

        dm.remove_handler(id);
        dm.set_data_slot(None);
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
