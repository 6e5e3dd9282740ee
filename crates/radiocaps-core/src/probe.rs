//! One-shot radio capability probe.
//!
//! Asks a modem for its current radio capability. Absence of capability
//! reporting is the only thing callers learn from a failed probe: every
//! error collapses into `None`.

use tracing::{debug, warn};

use crate::capability::RadioCapability;
use crate::channel::{RequestId, RilChannel, RilError, RilRequest, RilResult};

/// Queries `channel` for radio capability support.
///
/// `callback` receives the reported capability, or `None` if the modem does
/// not implement capability reporting or the query failed. Cancelling the
/// returned request id with [`RilChannel::cancel`] guarantees `callback` is
/// never invoked.
pub fn check<F>(channel: &dyn RilChannel, callback: F) -> RequestId
where
    F: FnOnce(Option<RadioCapability>) + Send + 'static,
{
    let name = channel.name().to_string();
    channel.send(
        RilRequest::GetRadioCapability,
        Box::new(move |result: RilResult| callback(interpret(&name, result))),
    )
}

fn interpret(channel: &str, result: RilResult) -> Option<RadioCapability> {
    match result {
        Ok(Some(cap)) => {
            debug!(channel, capability = %cap, "radio capability reported");
            Some(cap)
        }
        Ok(None) => {
            debug!(channel, "empty radio capability response");
            None
        }
        Err(RilError::RequestNotSupported) => {
            debug!(channel, "radio capability not supported");
            None
        }
        Err(error) => {
            warn!(channel, %error, "radio capability query failed");
            None
        }
    }
}
