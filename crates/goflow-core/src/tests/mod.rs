mod lifecycle;
mod scenarios;

use std::time::Duration;

use crate::{GoFlow, GoFlowError, TaskResult};

/// Poll `get_result` until the result shows up or `within` elapses.
pub(crate) async fn wait_for_result(
    flow: &GoFlow,
    task_id: &str,
    within: Duration,
) -> Result<Option<TaskResult>, GoFlowError> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if let Some(result) = flow.get_result(task_id).await? {
            return Ok(Some(result));
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
