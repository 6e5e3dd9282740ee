//! Property-based tests for the switch transaction invariants.
//!
//! A three-modem device runs with auto-replying simulated channels while a
//! random sequence of preference changes, failure injections, readiness
//! flips, clock jumps, late registrations and spontaneous modem reports is
//! thrown at it. Ops are applied in small batches before the manager runs,
//! so later ops in a batch land while an earlier op's switch is in flight.
//! After every batch the settled assignment and the observed event stream
//! are checked.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use quanta::{Clock, Mock};
use radiocaps_core::channel::UnsolEvent;
use radiocaps_core::sim::{SimBehavior, SimChannel, SimDataManager, SimNetwork, SimRadio};
use radiocaps_core::{
    CapabilityPolicy, CapsManager, ManagerConfig, NetworkState, Phase, RadioCapability, RadioCaps,
    RatMask, SlotConfig, SlotIndex, SwitchEvent, TxState,
};

const MODEMS: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    DataSlot(Option<u32>),
    Behave {
        modem: usize,
        fail: Option<Phase>,
        confirm: bool,
    },
    Busy {
        modem: usize,
        busy: bool,
    },
    Advance,
    /// Another modem shows up, holding full capability or not.
    Register {
        full: bool,
    },
    /// The modem changes capability by itself and reports it.
    Spontaneous {
        modem: usize,
        full: bool,
    },
}

fn phase() -> impl Strategy<Value = Phase> {
    prop_oneof![Just(Phase::Start), Just(Phase::Apply), Just(Phase::Finish)]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => proptest::option::of(0..MODEMS as u32 + 1).prop_map(Op::DataSlot),
        2 => (0..MODEMS, proptest::option::of(phase()), any::<bool>())
            .prop_map(|(modem, fail, confirm)| Op::Behave { modem, fail, confirm }),
        1 => (0..MODEMS, any::<bool>()).prop_map(|(modem, busy)| Op::Busy { modem, busy }),
        2 => Just(Op::Advance),
        1 => any::<bool>().prop_map(|full| Op::Register { full }),
        2 => (0..MODEMS, any::<bool>()).prop_map(|(modem, full)| Op::Spontaneous { modem, full }),
    ]
}

fn batch() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(op(), 1..4)
}

// ─── Device under test ─────────────────────────────────────────────────────

struct Modem {
    channel: Arc<SimChannel>,
    network: Arc<SimNetwork>,
    caps: RadioCaps,
}

struct Device {
    dm: Arc<SimDataManager>,
    manager: CapsManager,
    mock: Arc<Mock>,
    full_rat: RatMask,
    modems: Vec<Modem>,
    /// Something outside the manager made a modem full.
    outside_full: bool,
    /// A failure, dropped confirmation or busy modem was ever injected.
    ever_unhealthy: bool,
}

impl Device {
    fn new() -> Self {
        let dm = Arc::new(SimDataManager::new(Some(0)));
        let (clock, mock) = Clock::mock();
        let config = ManagerConfig::default();
        let policy = Box::new(config.policy());
        let full_rat = config.full_rat;
        let manager = CapsManager::with_parts(dm.clone(), config, policy, clock);

        let mut dev = Device {
            dm,
            manager,
            mock,
            full_rat,
            modems: Vec::new(),
            outside_full: false,
            ever_unhealthy: false,
        };
        for slot in 0..MODEMS {
            dev.add_modem(slot == 0);
        }
        dev
    }

    fn capability(&self, slot: usize, full: bool) -> RadioCapability {
        let rat = if full { self.full_rat } else { RatMask::FAMILY_GSM };
        RadioCapability::configured(rat, format!("modem{slot}"))
    }

    fn add_modem(&mut self, full: bool) {
        let slot = self.modems.len();
        let initial = self.capability(slot, full);
        let channel = Arc::new(SimChannel::new(format!("ril{slot}")));
        channel.set_modem_capability(Some(initial.clone()));
        let network = Arc::new(SimNetwork::new(false));
        let caps = RadioCaps::new(
            &self.manager,
            &format!("[ril{slot}]"),
            channel.clone(),
            Arc::new(SimRadio::new(true)),
            network.clone(),
            SlotConfig::new(slot as SlotIndex, self.full_rat),
            Some(initial),
        );
        self.modems.push(Modem {
            channel,
            network,
            caps,
        });
    }

    fn apply(&mut self, op: &Op) {
        match op {
            Op::DataSlot(slot) => self.dm.set_data_slot(*slot),
            Op::Behave {
                modem,
                fail,
                confirm,
            } => {
                self.ever_unhealthy |= fail.is_some() || !confirm;
                self.modems[*modem].channel.set_behavior(SimBehavior {
                    fail_phase: *fail,
                    confirm_apply: *confirm,
                    ..Default::default()
                });
            }
            Op::Busy { modem, busy } => {
                self.ever_unhealthy |= *busy;
                self.modems[*modem].network.set_busy(*busy);
                self.modems[*modem].caps.notify_state_changed();
            }
            Op::Advance => {
                let timeout = self.manager.config().apply_timeout;
                self.mock.increment(timeout + Duration::from_millis(1));
            }
            Op::Register { full } => {
                self.outside_full |= *full;
                self.add_modem(*full);
            }
            Op::Spontaneous { modem, full } => {
                self.outside_full |= *full;
                let cap = self.capability(*modem, *full);
                let channel = &self.modems[*modem].channel;
                channel.set_modem_capability(Some(cap.clone()));
                channel.emit(UnsolEvent::RadioCapability(cap));
            }
        }
    }

    fn currents(&self) -> Vec<Option<RadioCapability>> {
        self.modems.iter().map(|m| m.caps.current()).collect()
    }

    fn healthy(&self) -> bool {
        self.modems
            .iter()
            .all(|m| m.channel.behavior() == SimBehavior::default() && !m.network.is_busy())
    }
}

// ─── Event stream tracker ───────────────────────────────────────────────────

struct Tracker {
    state: TxState,
    session: Option<u32>,
    last_session: u32,
}

impl Tracker {
    fn new() -> Self {
        Tracker {
            state: TxState::Idle,
            session: None,
            last_session: 0,
        }
    }

    fn observe(&mut self, events: &[SwitchEvent]) -> Result<(), TestCaseError> {
        for event in events {
            match event {
                SwitchEvent::StateChanged {
                    session_id,
                    from,
                    to,
                } => {
                    prop_assert_eq!(*from, self.state, "transition out of order: {:?}", event);
                    if *from == TxState::Idle {
                        prop_assert_eq!(*to, TxState::Starting);
                        prop_assert!(*session_id > self.last_session, "session reused");
                        self.session = Some(*session_id);
                        self.last_session = *session_id;
                    } else {
                        prop_assert_eq!(Some(*session_id), self.session, "interleaved sessions");
                    }
                    self.state = *to;
                }
                SwitchEvent::Committed { session_id, .. }
                | SwitchEvent::Aborted { session_id, .. } => {
                    prop_assert_eq!(self.state, TxState::Idle);
                    prop_assert_eq!(Some(*session_id), self.session);
                    self.session = None;
                }
                SwitchEvent::Queued { .. } => {
                    prop_assert_ne!(self.state, TxState::Idle, "queued while idle");
                }
                SwitchEvent::Deferred { .. } => {
                    prop_assert_eq!(self.state, TxState::Idle);
                }
            }
        }
        Ok(())
    }
}

fn full_holders(dev: &Device) -> usize {
    let policy = dev.manager.config().policy();
    dev.currents()
        .iter()
        .flatten()
        .filter(|c| policy.holds_full(c))
        .count()
}

fn check_settled(dev: &Device) -> Result<(), TestCaseError> {
    // Only the outside world can produce a second holder the manager has
    // not been able to reduce yet.
    if !dev.outside_full {
        let holders = full_holders(dev);
        prop_assert!(holders <= 1, "{} modems hold full capability", holders);
    }

    if dev.manager.state() == TxState::Idle {
        for m in &dev.modems {
            prop_assert!(m.caps.pending().is_none(), "pending left behind while idle");
        }
    }
    Ok(())
}

/// With every modem cooperating, one more evaluation always ends with a
/// single holder and the manager agreeing with every modem.
fn check_converges(dev: &Device, tracker: &mut Tracker) -> Result<(), TestCaseError> {
    if !dev.healthy() || dev.manager.state() != TxState::Idle {
        return Ok(());
    }
    dev.manager.trigger();
    tracker.observe(&dev.manager.process_events())?;
    prop_assert_eq!(dev.manager.state(), TxState::Idle);

    let holders = full_holders(dev);
    prop_assert!(holders <= 1, "{} modems hold full capability", holders);

    if !dev.ever_unhealthy {
        for (slot, m) in dev.modems.iter().enumerate() {
            let current = m.caps.current();
            let actual = m.channel.modem_capability();
            prop_assert!(
                current
                    .as_ref()
                    .zip(actual.as_ref())
                    .is_some_and(|(c, a)| c.same_binding(a)),
                "slot {} manager view {:?} but modem runs {:?}",
                slot,
                current,
                actual
            );
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn switch_invariants_hold(batches in proptest::collection::vec(batch(), 1..30)) {
        let mut dev = Device::new();
        let mut tracker = Tracker::new();
        tracker.observe(&dev.manager.process_events())?;
        check_settled(&dev)?;

        for ops in &batches {
            let before = dev.currents();
            for op in ops {
                dev.apply(op);
            }
            let events = dev.manager.process_events();
            tracker.observe(&events)?;
            check_settled(&dev)?;

            let committed: Vec<_> = events
                .iter()
                .filter_map(|e| match e {
                    SwitchEvent::Committed { holder, .. } => Some(*holder),
                    _ => None,
                })
                .collect();
            let spontaneous = ops.iter().any(|op| matches!(op, Op::Spontaneous { .. }));
            match committed.last() {
                // Nothing committed: aborted and deferred steps leave the
                // settled assignment of already known modems untouched.
                None if !spontaneous => {
                    let after = dev.currents();
                    prop_assert_eq!(&before[..], &after[..before.len()]);
                }
                None => {}
                Some(holder) => {
                    let current = dev.modems[*holder as usize].caps.current();
                    let policy = dev.manager.config().policy();
                    prop_assert!(current.is_some_and(|c| policy.holds_full(&c)));
                }
            }

            check_converges(&dev, &mut tracker)?;
        }

        prop_assert_eq!(tracker.state, dev.manager.state());
    }

    #[test]
    fn healthy_modems_always_reach_the_data_slot(slots in proptest::collection::vec(0..MODEMS as u32, 1..12)) {
        let dev = Device::new();
        dev.manager.process_events();

        for slot in slots {
            dev.dm.set_data_slot(Some(slot));
            let events = dev.manager.process_events();
            let no_aborts = events.iter().all(|e| !matches!(e, SwitchEvent::Aborted { .. }));
            prop_assert!(no_aborts);
            prop_assert_eq!(dev.manager.state(), TxState::Idle);
            prop_assert_eq!(dev.manager.holder_slot(), Some(slot));
        }
    }
}
