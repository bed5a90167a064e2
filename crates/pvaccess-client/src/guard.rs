use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::requester::{MessageType, Requester};

/// Runs a listener callback, converting a panic into a reported fatal message.
///
/// Returns false if the callback panicked.
pub(crate) fn invoke<R, F>(requester: &R, context: &str, callback: F) -> bool
where
    R: Requester + ?Sized,
    F: FnOnce(),
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            error!(context = %context, reason = %reason, "listener panicked");
            let text = format!("unexpected exception caught while calling a callback: {reason}");
            // the sink itself may panic too
            let _ = catch_unwind(AssertUnwindSafe(|| {
                requester.message(&text, MessageType::FatalError)
            }));
            false
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
