//! Scenario runner for the radio capability switch engine.
//!
//! Builds a simulated multi-SIM device from a TOML scenario, walks it
//! through a list of data-slot changes on a mocked clock and reports every
//! switch event together with the capability each slot settled on.

pub mod report;
pub mod scenario;

pub use report::{Report, SlotReport, StepReport};
pub use scenario::{RunOptions, Scenario, SimSlot, Step};
