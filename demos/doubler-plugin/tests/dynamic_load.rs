//! Loads the built `doubler` shared object the way a worker does.

use goflow_core::{load_plugins_into, Handler, HandlerRegistry};
use serde_json::json;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};

/// The cdylib cargo built for this package, next to the test binary or one level up.
fn built_library() -> PathBuf {
    let exe = std::env::current_exe().unwrap();
    let deps = exe.parent().unwrap();
    let prefix = format!("{DLL_PREFIX}doubler");
    let found = [Some(deps), deps.parent()]
        .into_iter()
        .flatten()
        .filter_map(|dir| std::fs::read_dir(dir).ok())
        .flatten()
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|path| is_doubler_library(path, &prefix))
        .unwrap_or_else(|| panic!("no {prefix}*{DLL_SUFFIX} near {}", deps.display()));
    found
}

fn is_doubler_library(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix(prefix))
        .and_then(|rest| rest.strip_suffix(DLL_SUFFIX))
        .is_some_and(|hash| hash.is_empty() || hash.starts_with('-'))
}

#[tokio::test]
async fn test_loads_doubler_from_plugin_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::copy(built_library(), dir.path().join(format!("doubler{DLL_SUFFIX}"))).unwrap();

    let registry = HandlerRegistry::new();
    let count = load_plugins_into(dir.path(), &registry).await.unwrap();
    assert_eq!(count, 1);
    assert_eq!(registry.task_types().await, vec!["doubler".to_string()]);

    let handler = registry.get("doubler").await.expect("doubler registered");
    let result = handler.handle(json!(10)).await;
    assert_eq!(result.payload, json!(20));
    assert!(result.err_msg.is_none());

    let result = handler.handle(json!("ten")).await;
    assert!(result.is_failure());
}

#[tokio::test]
async fn test_plugin_key_follows_file_name() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::copy(built_library(), dir.path().join(format!("triple{DLL_SUFFIX}"))).unwrap();

    let registry = HandlerRegistry::new();
    load_plugins_into(dir.path(), &registry).await.unwrap();
    assert!(registry.get("doubler").await.is_none());
    let handler = registry.get("triple").await.expect("registered under file stem");
    assert_eq!(handler.handle(json!(4)).await.payload, json!(8));
}
