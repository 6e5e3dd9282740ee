//! TOML scenarios.
//!
//! A scenario file is a regular radiocaps config with simulation knobs
//! added to each `[[slots]]` entry and a list of `[[steps]]`:
//!
//! ```toml
//! name = "swap"
//! data_slot = 0
//!
//! [manager]
//! apply_timeout_ms = 2000
//!
//! [[slots]]
//! initial_rat = ["gsm", "wcdma", "lte"]
//!
//! [[slots]]
//! initial_rat = ["gsm"]
//! drop_apply_confirmation = true
//!
//! [[steps]]
//! data_slot = 1
//! ```
//!
//! The device config and the simulation knobs are parsed from the same
//! text, each side ignoring the other's fields.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context};
use quanta::{Clock, Mock};
use radiocaps_core::config::RadiocapsConfig;
use radiocaps_core::sim::{SimBehavior, SimChannel, SimDataManager, SimNetwork, SimRadio};
use radiocaps_core::{
    probe, CapabilityPolicy, CapsManager, DataManager, Phase, RadioCapability, RadioCaps,
    RatMask, SlotConfig, SlotIndex, SwapPolicy, SwitchEvent,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::report::{Report, SlotReport, StepReport};

/// Upper bound on process/advance rounds for one step.
const MAX_SETTLE_ROUNDS: usize = 64;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScenarioInput {
    name: Option<String>,
    data_slot: Option<SlotIndex>,
    slots: Vec<SimSlotInput>,
    steps: Vec<StepInput>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SimSlotInput {
    slot: Option<SlotIndex>,
    initial_rat: Option<Vec<String>>,
    fail_phase: Option<Phase>,
    drop_apply_confirmation: bool,
    supports_caps: Option<bool>,
    online: Option<bool>,
    busy: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StepInput {
    label: Option<String>,
    data_slot: Option<SlotIndex>,
    advance_ms: Option<u64>,
}

/// One simulated modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSlot {
    pub config: SlotConfig,
    /// Capability the modem starts with; `None` means nothing reported yet.
    pub initial: Option<RadioCapability>,
    pub behavior: SimBehavior,
    pub online: bool,
    pub busy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub label: Option<String>,
    /// New designated data slot; `None` leaves it unchanged.
    pub data_slot: Option<SlotIndex>,
    /// Simulated time to let pass before the change.
    pub advance: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Seed each agent from a capability probe instead of the scenario.
    pub probe: bool,
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub config: RadiocapsConfig,
    /// Data slot designated before the first step.
    pub data_slot: Option<SlotIndex>,
    pub slots: Vec<SimSlot>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        Self::parse(input, "scenario")
    }

    /// Reads a scenario file. The file stem names the scenario unless the
    /// file sets `name`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("scenario");
        Self::parse(&text, stem).with_context(|| format!("parsing scenario {}", path.display()))
    }

    fn parse(input: &str, default_name: &str) -> anyhow::Result<Self> {
        let config = RadiocapsConfig::from_toml_str(input).context("invalid device config")?;
        let parsed: ScenarioInput = toml::from_str(input).context("invalid scenario")?;
        if config.slots.is_empty() {
            bail!("scenario defines no slots");
        }

        let mut slots = Vec::with_capacity(config.slots.len());
        for slot_config in &config.slots {
            // Same slot numbering and first-wins rule as the device config.
            let Some(knobs) = parsed
                .slots
                .iter()
                .enumerate()
                .find(|(idx, s)| s.slot.unwrap_or(*idx as SlotIndex) == slot_config.slot)
                .map(|(_, s)| s)
            else {
                bail!("slot {} has no scenario entry", slot_config.slot);
            };

            let initial = match &knobs.initial_rat {
                Some(names) => {
                    let rat = RatMask::from_names(names)
                        .with_context(|| format!("slot {}: initial_rat", slot_config.slot))?;
                    Some(RadioCapability::configured(
                        rat,
                        slot_config.logical_modem_id.clone(),
                    ))
                }
                None => None,
            };

            slots.push(SimSlot {
                config: slot_config.clone(),
                initial,
                behavior: SimBehavior {
                    auto_reply: true,
                    supports_caps: knobs.supports_caps.unwrap_or(true),
                    fail_phase: knobs.fail_phase,
                    confirm_apply: !knobs.drop_apply_confirmation,
                },
                online: knobs.online.unwrap_or(true),
                busy: knobs.busy,
            });
        }

        let steps = parsed
            .steps
            .into_iter()
            .map(|s| Step {
                label: s.label,
                data_slot: s.data_slot,
                advance: Duration::from_millis(s.advance_ms.unwrap_or(0)),
            })
            .collect();

        Ok(Scenario {
            name: parsed.name.unwrap_or_else(|| default_name.to_string()),
            config,
            data_slot: parsed.data_slot,
            slots,
            steps,
        })
    }

    /// Runs every step to quiescence and reports what happened.
    pub fn run(&self, options: RunOptions) -> anyhow::Result<Report> {
        let dm = Arc::new(SimDataManager::new(self.data_slot));
        let (clock, mock) = Clock::mock();
        let policy = self.config.manager.policy();
        let manager = CapsManager::with_parts(
            dm.clone(),
            self.config.manager.clone(),
            Box::new(policy.clone()),
            clock,
        );

        let mut modems = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let name = format!("ril{}", slot.config.slot);
            let channel = Arc::new(SimChannel::with_behavior(name.clone(), slot.behavior.clone()));
            channel.set_modem_capability(slot.initial.clone());

            let probed = options.probe.then(|| probe_slot(&channel));
            let initial = match &probed {
                Some(cap) => cap.clone(),
                None => slot.initial.clone(),
            };

            let caps = RadioCaps::new(
                &manager,
                &format!("[{name}]"),
                channel.clone(),
                Arc::new(SimRadio::new(slot.online)),
                Arc::new(SimNetwork::new(slot.busy)),
                slot.config.clone(),
                initial,
            );
            modems.push(SimModem {
                channel,
                caps,
                probed,
            });
        }

        let mut runner = Runner {
            manager,
            mock,
            policy,
            modems,
            elapsed: Duration::ZERO,
        };

        let events = runner.settle()?;
        let initial = runner.report(0, None, dm.data_slot(), events);

        let mut steps = Vec::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            if !step.advance.is_zero() {
                runner.advance(step.advance);
            }
            if let Some(slot) = step.data_slot {
                dm.set_data_slot(Some(slot));
            }
            let events = runner.settle()?;
            let report = runner.report(i + 1, step.label.clone(), dm.data_slot(), events);
            info!(
                step = report.index,
                holder = ?report.holder,
                commits = report.committed(),
                aborts = report.aborted(),
                "step settled"
            );
            steps.push(report);
        }

        let holder = runner.manager.holder_slot();
        runner.manager.shutdown();

        let all = std::iter::once(&initial).chain(steps.iter());
        let (commits, aborts) = all.fold((0, 0), |(c, a), s| (c + s.committed(), a + s.aborted()));
        Ok(Report {
            name: self.name.clone(),
            initial,
            steps,
            holder,
            commits,
            aborts,
        })
    }
}

fn probe_slot(channel: &SimChannel) -> Option<RadioCapability> {
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    probe::check(channel, move |cap| {
        *sink.lock().unwrap_or_else(|e| e.into_inner()) = cap;
    });
    let cap = seen.lock().unwrap_or_else(|e| e.into_inner()).take();
    cap
}

// ─── Runner ─────────────────────────────────────────────────────────────────

struct SimModem {
    channel: Arc<SimChannel>,
    caps: RadioCaps,
    probed: Option<Option<RadioCapability>>,
}

struct Runner {
    manager: CapsManager,
    mock: Arc<Mock>,
    policy: SwapPolicy,
    modems: Vec<SimModem>,
    elapsed: Duration,
}

impl Runner {
    fn advance(&mut self, by: Duration) {
        self.mock.increment(by);
        self.elapsed += by;
    }

    /// Processes events until nothing is left to do, jumping the clock past
    /// the APPLY deadline whenever the engine waits on one.
    fn settle(&mut self) -> anyhow::Result<Vec<SwitchEvent>> {
        let mut events = Vec::new();
        for _ in 0..MAX_SETTLE_ROUNDS {
            events.extend(self.manager.process_events());
            match self.manager.next_deadline() {
                Some(left) => {
                    debug!(wait_ms = left.as_millis() as u64, "waiting out apply deadline");
                    self.advance(left + Duration::from_millis(1));
                }
                None => return Ok(events),
            }
        }
        bail!("engine did not settle after {MAX_SETTLE_ROUNDS} rounds");
    }

    fn report(
        &self,
        index: usize,
        label: Option<String>,
        data_slot: Option<SlotIndex>,
        events: Vec<SwitchEvent>,
    ) -> StepReport {
        let slots = self
            .modems
            .iter()
            .map(|m| {
                let current = m.caps.current();
                SlotReport {
                    slot: m.caps.slot(),
                    probed: m.probed.clone(),
                    full: current.as_ref().is_some_and(|c| self.policy.holds_full(c)),
                    current,
                    modem: m.channel.modem_capability(),
                }
            })
            .collect();

        StepReport {
            index,
            label,
            data_slot,
            elapsed_ms: self.elapsed.as_millis() as u64,
            events,
            holder: self.manager.holder_slot(),
            slots,
        }
    }
}
