pub mod actor;
pub mod catalog;
pub mod command_queue;
pub mod driver;
pub mod effect;
pub mod error;
pub mod logic;
pub mod profiler;
pub mod registry;
pub mod runtime;
pub mod spatial;
#[cfg(test)]
pub(crate) mod testing;

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{error, warn};

pub use error::SceneError;

/// Authoritative scene time in milliseconds; 0 is the seed of every client window
pub type Timestamp = u64;

/// Identifies a connected client
pub type ClientId = uuid::Uuid;

/// Run one unit of per-tick work, containing both errors and panics.
///
/// Failures are logged against `unit` and reported as `Err` so the caller can
/// skip just this unit; nothing propagates to the rest of the tick.
pub(crate) fn contain<T>(
    unit: impl fmt::Display,
    work: impl FnOnce() -> Result<T, SceneError>,
) -> Result<T, SceneError> {
    match catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(unit = %unit, error = %e, "unit failed, skipped for this tick");
            Err(e)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(unit = %unit, panic = %message, "unit panicked, skipped for this tick");
            Err(SceneError::Panicked(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contain_passes_value_through() {
        assert_eq!(contain("ok", || Ok::<_, SceneError>(7)).unwrap(), 7);
    }

    #[test]
    fn test_contain_reports_error() {
        let result: Result<(), _> = contain("failing", || Err(SceneError::ShutDown));
        assert!(matches!(result, Err(SceneError::ShutDown)));
    }

    #[test]
    fn test_contain_catches_panic() {
        let result: Result<(), _> = contain("panicking", || panic!("boom"));
        match result {
            Err(SceneError::Panicked(message)) => assert_eq!(message, "boom"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
