//! # RIL Channel Contract
//!
//! The subset of a modem request channel the capability subsystem needs:
//! fire-and-complete requests with cancellation by id, and unsolicited
//! notification handlers keyed by message type.
//!
//! Completion handlers run on whatever context the channel delivers
//! responses from. A cancelled request must drop its handler without
//! calling it.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::capability::RadioCapability;

pub const RIL_REQUEST_GET_RADIO_CAPABILITY: u32 = 130;
pub const RIL_REQUEST_SET_RADIO_CAPABILITY: u32 = 131;
pub const RIL_UNSOL_RADIO_CAPABILITY: u32 = 1042;

/// Identifier of a request submitted on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a registered notification handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

/// Requests issued by the capability subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RilRequest {
    GetRadioCapability,
    SetRadioCapability(RadioCapability),
}

impl RilRequest {
    pub fn code(&self) -> u32 {
        match self {
            RilRequest::GetRadioCapability => RIL_REQUEST_GET_RADIO_CAPABILITY,
            RilRequest::SetRadioCapability(_) => RIL_REQUEST_SET_RADIO_CAPABILITY,
        }
    }
}

/// Unsolicited message types the subsystem subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnsolKind {
    RadioCapability,
}

impl UnsolKind {
    pub fn code(self) -> u32 {
        match self {
            UnsolKind::RadioCapability => RIL_UNSOL_RADIO_CAPABILITY,
        }
    }
}

/// Decoded unsolicited notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsolEvent {
    RadioCapability(RadioCapability),
}

impl UnsolEvent {
    pub fn kind(&self) -> UnsolKind {
        match self {
            UnsolEvent::RadioCapability(_) => UnsolKind::RadioCapability,
        }
    }
}

/// Failure reported by the channel for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RilError {
    #[error("radio not available")]
    RadioNotAvailable,
    #[error("generic failure")]
    GenericFailure,
    #[error("request not supported")]
    RequestNotSupported,
    #[error("request timed out")]
    Timeout,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RilError {
    /// Maps a RIL error code onto the error vocabulary.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => RilError::RadioNotAvailable,
            2 => RilError::GenericFailure,
            6 => RilError::RequestNotSupported,
            code => RilError::InvalidResponse(format!("ril error {code}")),
        }
    }
}

/// Decoded result of a capability request. `Ok(None)` means the modem
/// answered without a capability payload.
pub type RilResult = Result<Option<RadioCapability>, RilError>;

pub type ResponseHandler = Box<dyn FnOnce(RilResult) + Send>;
pub type UnsolHandler = Arc<dyn Fn(&UnsolEvent) + Send + Sync>;

/// Request/response channel to a single modem.
pub trait RilChannel: Send + Sync {
    /// Human-readable channel name used in logs.
    fn name(&self) -> &str;

    /// Submits a request. `on_response` is called exactly once unless the
    /// request is cancelled first.
    fn send(&self, request: RilRequest, on_response: ResponseHandler) -> RequestId;

    /// Cancels an in-flight request. Returns false if it already completed.
    fn cancel(&self, id: RequestId) -> bool;

    fn add_unsol_handler(&self, kind: UnsolKind, handler: UnsolHandler) -> HandlerId;

    fn remove_handler(&self, id: HandlerId);
}
