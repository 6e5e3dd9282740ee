//! # radiocaps-core
//!
//! Radio capability negotiation for multi-SIM modems.
//!
//! Several modems (one per SIM slot) share one physical radio. Exactly one
//! of them may hold the full set of radio access technologies at a time;
//! the others run with a reduced set. This crate moves full capability
//! between modems with a multi-phase transaction (START, APPLY, FINISH)
//! that either commits on every modem or rolls back on every modem.
//!
//! ## Crate structure
//!
//! - [`capability`]: RAT bitmask, phases, status, `RadioCapability`
//! - [`channel`]: Request channel contract the modems are driven through
//! - [`device`]: Data manager, radio and network collaborators
//! - [`probe`]: One-shot capability support query
//! - [`policy`]: Who gets full capability, and what everyone else gets
//! - [`agent`]: Per-modem participant and the `RadioCaps` handle
//! - [`manager`]: Device-wide transaction engine
//! - [`runtime`]: Worker thread driving a manager
//! - [`config`]: TOML configuration
//! - [`sim`]: In-memory collaborators for tests and simulation

pub mod agent;
pub mod capability;
pub mod channel;
pub mod config;
pub mod device;
pub mod manager;
pub mod policy;
pub mod probe;
pub mod runtime;
pub mod sim;
pub mod transaction;

pub use agent::{AgentId, RadioCaps};
pub use capability::{LogicalModemId, Phase, RadioCapability, RatMask, Status};
pub use channel::{RequestId, RilChannel, RilError};
pub use config::{ConfigError, ManagerConfig, RadiocapsConfig};
pub use device::{DataManager, NetworkState, RadioState, SlotConfig, SlotIndex};
pub use manager::CapsManager;
pub use policy::{CapabilityPolicy, SwapPolicy};
pub use runtime::CapsRuntime;
pub use transaction::{AbortReason, SwitchEvent, TxState};
