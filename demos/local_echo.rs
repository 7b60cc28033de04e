//! Local mode end to end: one worker echoing its payload back.
//!
//! Run with: `cargo run --example local_echo`

use goflow::core::{with_report_time, with_timeout};
use goflow::{handler_fn, GoFlow, TaskResult};
use serde_json::json;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    goflow::init();

    let flow = GoFlow::local().num_workers(1).build()?;
    flow.register_handler(
        "echo",
        with_report_time(
            with_timeout(
                handler_fn(|payload| async move { TaskResult::ok(payload) }),
                Duration::from_secs(1),
            ),
            "echo",
        ),
    )
    .await;
    flow.start().await?;

    let id = flow.push("echo", json!("hi")).await?;
    tracing::info!(task_id = %id, "pushed");

    for _ in 0..50 {
        if let Some(result) = flow.get_result(&id).await? {
            tracing::info!(task_id = %result.task_id, payload = %result.payload, "got result");
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    flow.close().await?;
    Ok(())
}
