//! Action executor port — delivery of alert notifications.

use std::future::Future;

use sensornet_domain::alert::{Action, AlertTransition};
use sensornet_domain::error::ActionExecutionError;

/// Carries out the external effect of an [`Action`] for a triggered alert.
///
/// `Delay` actions never reach the executor; the alert engine waits itself.
pub trait ActionExecutor: Send + Sync {
    fn execute(
        &self,
        action: &Action,
        transition: &AlertTransition,
    ) -> impl Future<Output = Result<(), ActionExecutionError>> + Send;
}

impl<T: ActionExecutor> ActionExecutor for std::sync::Arc<T> {
    fn execute(
        &self,
        action: &Action,
        transition: &AlertTransition,
    ) -> impl Future<Output = Result<(), ActionExecutionError>> + Send {
        (**self).execute(action, transition)
    }
}
