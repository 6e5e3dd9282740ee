//! # Capability Assignment Policy
//!
//! Decides what each registered modem should hold once a given modem owns
//! full capability. The manager only relies on the contract: after a plan
//! is applied, exactly the chosen modem holds full capability.
//!
//! The default [`SwapPolicy`] exchanges bindings between the old and the
//! new holder, so the physical radio resource serving full capability
//! moves with the data slot:
//!
//! ```text
//!   before                         after (data → slot 1)
//!   slot 0: modem0 [gsm|wcdma|lte] slot 0: modem1 [gsm]
//!   slot 1: modem1 [gsm]           slot 1: modem0 [gsm|wcdma|lte]
//! ```

use crate::capability::{LogicalModemId, RadioCapability, RatMask};
use crate::device::{SlotConfig, SlotIndex};

/// Read-only view of one registered modem handed to the policy.
#[derive(Debug, Clone, Copy)]
pub struct AgentView<'a> {
    pub config: &'a SlotConfig,
    pub current: Option<&'a RadioCapability>,
    pub online: bool,
}

impl AgentView<'_> {
    pub fn slot(&self) -> SlotIndex {
        self.config.slot
    }

    /// Logical modem the agent is bound to now, or its configured default.
    pub fn binding(&self) -> &LogicalModemId {
        self.current
            .map(|c| &c.logical_modem_id)
            .unwrap_or(&self.config.logical_modem_id)
    }
}

/// Capability a modem should end up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityTarget {
    pub rat: RatMask,
    pub logical_modem_id: LogicalModemId,
}

impl CapabilityTarget {
    /// True if `current` already satisfies this target.
    pub fn is_met_by(&self, current: Option<&RadioCapability>) -> bool {
        current.is_some_and(|c| c.rat == self.rat && c.logical_modem_id == self.logical_modem_id)
    }
}

pub trait CapabilityPolicy: Send + Sync {
    /// Whether `cap` counts as full capability.
    fn holds_full(&self, cap: &RadioCapability) -> bool;

    /// Whether an agent may receive full capability at all.
    fn eligible(&self, agent: &AgentView<'_>) -> bool;

    /// Targets for every agent (same order as `agents`) once `winner` holds
    /// full capability.
    fn plan(&self, agents: &[AgentView<'_>], winner: usize) -> Vec<CapabilityTarget>;
}

/// Default policy: one full RAT set, one reduced RAT set, bindings swapped
/// between the previous and the new holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapPolicy {
    pub full_rat: RatMask,
    pub reduced_rat: RatMask,
}

impl SwapPolicy {
    pub fn new(full_rat: RatMask, reduced_rat: RatMask) -> Self {
        SwapPolicy {
            full_rat,
            reduced_rat,
        }
    }

    /// First agent in registration order currently holding full capability.
    pub fn holder(&self, agents: &[AgentView<'_>]) -> Option<usize> {
        agents
            .iter()
            .position(|a| a.current.is_some_and(|c| self.holds_full(c)))
    }
}

impl Default for SwapPolicy {
    fn default() -> Self {
        SwapPolicy::new(
            RatMask::FAMILY_GSM | RatMask::FAMILY_WCDMA | RatMask::FAMILY_LTE,
            RatMask::FAMILY_GSM,
        )
    }
}

impl CapabilityPolicy for SwapPolicy {
    fn holds_full(&self, cap: &RadioCapability) -> bool {
        cap.rat.contains(self.full_rat)
    }

    fn eligible(&self, agent: &AgentView<'_>) -> bool {
        agent.online && agent.config.supported_rat.contains(self.full_rat)
    }

    fn plan(&self, agents: &[AgentView<'_>], winner: usize) -> Vec<CapabilityTarget> {
        let holder = self.holder(agents).filter(|&h| h != winner);

        agents
            .iter()
            .enumerate()
            .map(|(i, agent)| {
                if i == winner {
                    let binding = match holder {
                        Some(h) => agents[h].binding(),
                        None => agent.binding(),
                    };
                    CapabilityTarget {
                        rat: self.full_rat,
                        logical_modem_id: binding.clone(),
                    }
                } else if Some(i) == holder {
                    CapabilityTarget {
                        rat: self.reduced_rat,
                        logical_modem_id: agents[winner].binding().clone(),
                    }
                } else {
                    CapabilityTarget {
                        rat: self.reduced_rat,
                        logical_modem_id: agent.binding().clone(),
                    }
                }
            })
            .collect()
    }
}
