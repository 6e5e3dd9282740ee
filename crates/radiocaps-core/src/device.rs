//! Device-level collaborators consulted by the capability manager.
//!
//! These are read-only views onto objects owned elsewhere in the modem
//! stack. All queries must answer synchronously.

use serde::{Deserialize, Serialize};

use crate::capability::{LogicalModemId, RatMask};
use crate::channel::HandlerId;

/// Index of a SIM slot on the device.
pub type SlotIndex = u32;

pub type ChangeHandler = Box<dyn Fn() + Send + Sync>;

/// Tracks which slot should carry the data session.
pub trait DataManager: Send + Sync {
    /// Slot that should currently hold full capability, if any.
    fn data_slot(&self) -> Option<SlotIndex>;

    /// Registers a handler called whenever [`DataManager::data_slot`] changes.
    fn add_slot_changed_handler(&self, handler: ChangeHandler) -> HandlerId;

    fn remove_handler(&self, id: HandlerId);
}

/// Power state of a modem's radio.
pub trait RadioState: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Registration/call state of a modem's network.
pub trait NetworkState: Send + Sync {
    /// True while the modem must not drop radio access technologies,
    /// e.g. during a voice call.
    fn is_busy(&self) -> bool;
}

/// Static per-slot configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub slot: SlotIndex,
    /// Logical modem this slot binds to when nothing else is known.
    pub logical_modem_id: LogicalModemId,
    /// Technologies the slot hardware and SIM can use at most.
    pub supported_rat: RatMask,
}

impl SlotConfig {
    pub fn new(slot: SlotIndex, supported_rat: RatMask) -> Self {
        SlotConfig {
            slot,
            logical_modem_id: default_logical_modem(slot),
            supported_rat,
        }
    }
}

pub fn default_logical_modem(slot: SlotIndex) -> LogicalModemId {
    LogicalModemId::new(format!("modem{slot}"))
}
