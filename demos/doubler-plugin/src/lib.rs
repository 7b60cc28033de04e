//! A handler plugin for tasks of type `doubler`.
//!
//! Build with `cargo build -p goflow-doubler-plugin --release` and copy
//! `libdoubler.so` into a worker's plugin directory as `doubler.so`.

use goflow_core::{Payload, TaskResult};
use serde_json::json;

/// Double an integer payload.
pub async fn double(payload: Payload) -> TaskResult {
    match payload.as_i64() {
        Some(n) => match n.checked_mul(2) {
            Some(doubled) => TaskResult::ok(json!(doubled)),
            None => TaskResult::err(format!("{n} overflows when doubled")),
        },
        None => TaskResult::err(format!("expected an integer, got {payload}")),
    }
}

goflow_core::export_handler!(goflow_core::handler_fn(double));

#[cfg(test)]
mod tests {
    use super::*;
    use goflow_core::Handler;

    #[tokio::test]
    async fn test_doubles_integers() {
        assert_eq!(double(json!(10)).await.payload, json!(20));
        assert!(double(json!("ten")).await.is_failure());
        assert!(double(json!(i64::MAX)).await.is_failure());
    }

    #[tokio::test]
    async fn test_exported_factory() {
        let handler = NewHandler();
        assert_eq!(handler.handle(json!(21)).await.payload, json!(42));
        assert_eq!(GOFLOW_PLUGIN_ABI_VERSION, goflow_core::plugin::PLUGIN_ABI_VERSION);
    }
}
