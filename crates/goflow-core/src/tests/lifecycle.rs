use serde_json::json;
use std::sync::Arc;

use crate::broker::{Broker, BrokerState, ChannelBroker, SharedBroker};
use crate::{GoFlow, GoFlowError, LifecycleState, Mode, Task, TaskResult};

#[tokio::test]
async fn test_operations_before_start_fail() {
    let flow = GoFlow::local().build().unwrap();
    assert_eq!(flow.state().await, LifecycleState::Built);
    assert!(matches!(
        flow.push("echo", json!(1)).await,
        Err(GoFlowError::NotStarted)
    ));
    assert!(matches!(
        flow.get_result("x").await,
        Err(GoFlowError::NotStarted)
    ));
    assert!(matches!(flow.close().await, Err(GoFlowError::NotStarted)));
}

#[tokio::test]
async fn test_start_twice_fails() {
    let flow = GoFlow::local().build().unwrap();
    flow.start().await.unwrap();
    assert!(matches!(
        flow.start().await,
        Err(GoFlowError::AlreadyStarted)
    ));
    flow.close().await.unwrap();
}

#[tokio::test]
async fn test_everything_fails_after_close() {
    let flow = GoFlow::local().build().unwrap();
    flow.start().await.unwrap();
    flow.close().await.unwrap();

    assert_eq!(flow.state().await, LifecycleState::Closed);
    assert!(matches!(flow.start().await, Err(GoFlowError::Closed)));
    assert!(matches!(
        flow.push("echo", json!(1)).await,
        Err(GoFlowError::Closed)
    ));
    assert!(matches!(flow.get_result("x").await, Err(GoFlowError::Closed)));
    assert!(matches!(flow.close().await, Err(GoFlowError::Closed)));
}

#[tokio::test]
async fn test_close_terminates_brokers() {
    let tasks = Arc::new(ChannelBroker::<Task>::new(4));
    let results = Arc::new(ChannelBroker::<TaskResult>::new(4));
    let flow = GoFlow::local()
        .task_broker(tasks.clone() as SharedBroker<Task>)
        .result_broker(results.clone() as SharedBroker<TaskResult>)
        .build()
        .unwrap();
    assert_eq!(tasks.state(), BrokerState::Created);

    flow.start().await.unwrap();
    assert_eq!(tasks.state(), BrokerState::Started);
    assert_eq!(results.state(), BrokerState::Started);

    flow.close().await.unwrap();
    assert_eq!(tasks.state(), BrokerState::Terminated);
    assert_eq!(results.state(), BrokerState::Terminated);
}

#[tokio::test]
async fn test_distributed_register_handler_is_noop() {
    let tasks: SharedBroker<Task> = Arc::new(ChannelBroker::new(1));
    let results: SharedBroker<TaskResult> = Arc::new(ChannelBroker::new(1));
    let flow = GoFlow::distributed(tasks, results).build().unwrap();
    assert_eq!(flow.mode(), Mode::Distributed);
    assert!(!flow.is_local());
    assert!(flow.registry().is_none());

    flow.register_handler("echo", crate::handler_fn(|p| async move { TaskResult::ok(p) }))
        .await;
    assert!(flow.registry().is_none());
}
