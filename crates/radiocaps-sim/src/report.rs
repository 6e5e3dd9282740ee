use radiocaps_core::{RadioCapability, SlotIndex, SwitchEvent};
use serde::Serialize;

/// Capability one slot settled on after a step.
#[derive(Debug, Clone, Serialize)]
pub struct SlotReport {
    pub slot: SlotIndex,
    /// Result of the capability probe, when probing was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probed: Option<Option<RadioCapability>>,
    pub current: Option<RadioCapability>,
    /// What the simulated modem itself runs with.
    pub modem: Option<RadioCapability>,
    pub full: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub data_slot: Option<SlotIndex>,
    /// Simulated milliseconds elapsed since the scenario started.
    pub elapsed_ms: u64,
    pub events: Vec<SwitchEvent>,
    pub holder: Option<SlotIndex>,
    pub slots: Vec<SlotReport>,
}

impl StepReport {
    pub fn committed(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, SwitchEvent::Committed { .. }))
            .count()
    }

    pub fn aborted(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, SwitchEvent::Aborted { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub name: String,
    /// State after registration, before the first step.
    pub initial: StepReport,
    pub steps: Vec<StepReport>,
    pub holder: Option<SlotIndex>,
    pub commits: usize,
    pub aborts: usize,
}

impl Report {
    pub fn to_json(&self, pretty: bool) -> serde_json::Result<String> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }
}
