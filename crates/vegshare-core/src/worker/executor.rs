use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::action::ActionParams;
use crate::entities::OperationLog;
use crate::error::CoreError;

/// The physical side of an automatic action (open a valve, run a pump...).
///
/// Implementations may be slow. Return [`CoreError::ExecutionFailed`] with
/// `retryable: true` for failures worth a redelivery.
pub trait ActionExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        operation: &OperationLog,
        params: &ActionParams,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;
}

/// Stand-in executor that only takes time.
#[derive(Clone, Debug)]
pub struct SimulatedExecutor {
    work_duration: Duration,
}

impl SimulatedExecutor {
    pub fn new(work_duration: Duration) -> Self {
        Self { work_duration }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ActionExecutor for SimulatedExecutor {
    async fn execute(&self, operation: &OperationLog, params: &ActionParams) -> Result<(), CoreError> {
        debug!(
            operation_id = %operation.id,
            action = params.action_type(),
            duration_ms = self.work_duration.as_millis() as u64,
            "simulating action"
        );
        tokio::time::sleep(self.work_duration).await;
        Ok(())
    }
}
