use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::wait_for_result;
use crate::{handler_fn, with_retry, with_timeout, GoFlow, GoFlowError, TaskResult, TIMED_OUT_MSG};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_local_echo() {
    let flow = GoFlow::local().num_workers(1).build().unwrap();
    flow.register_handler("echo", handler_fn(|p| async move { TaskResult::ok(p) }))
        .await;
    flow.start().await.unwrap();

    let id = flow.push("echo", json!("hi")).await.unwrap();
    let result = wait_for_result(&flow, &id, Duration::from_secs(1))
        .await
        .unwrap()
        .expect("echo result");
    assert_eq!(result.task_id, id);
    assert_eq!(result.payload, json!("hi"));
    assert!(result.err_msg.is_none());

    flow.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unhandled_task_never_gets_a_result() {
    let flow = GoFlow::local().num_workers(1).build().unwrap();
    flow.start().await.unwrap();

    let id = flow.push("nope", json!(null)).await.unwrap();
    let result = wait_for_result(&flow, &id, Duration::from_millis(200))
        .await
        .unwrap();
    assert!(result.is_none());

    flow.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_and_timed_out_results_are_stored() {
    let flow = GoFlow::local().num_workers(2).build().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    flow.register_handler(
        "flaky",
        with_retry(
            handler_fn(move |_| {
                let counted = Arc::clone(&counted);
                async move {
                    if counted.fetch_add(1, Ordering::SeqCst) < 2 {
                        TaskResult::err("e")
                    } else {
                        TaskResult::ok(json!(42))
                    }
                }
            }),
            3,
        ),
    )
    .await;
    flow.register_handler(
        "slow",
        with_timeout(
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                TaskResult::ok(json!("late"))
            }),
            Duration::from_millis(50),
        ),
    )
    .await;
    flow.start().await.unwrap();

    let flaky = flow.push("flaky", json!(null)).await.unwrap();
    let slow = flow.push("slow", json!(null)).await.unwrap();

    let r = wait_for_result(&flow, &flaky, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(r.payload, json!(42));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let r = wait_for_result(&flow, &slow, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(r.err_msg.as_deref(), Some(TIMED_OUT_MSG));

    flow.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_under_load() {
    let flow = Arc::new(
        GoFlow::local()
            .num_workers(5)
            .task_queue_buffer_size(10)
            .result_queue_buffer_size(10)
            .build()
            .unwrap(),
    );
    let handled = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&handled);
    flow.register_handler(
        "work",
        handler_fn(move |p| {
            let counted = Arc::clone(&counted);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counted.fetch_add(1, Ordering::SeqCst);
                TaskResult::ok(p)
            }
        }),
    )
    .await;
    flow.start().await.unwrap();

    let producer = {
        let flow = Arc::clone(&flow);
        tokio::spawn(async move {
            let mut pushed = 0;
            for n in 0..100 {
                match flow.push("work", json!(n)).await {
                    Ok(_) => pushed += 1,
                    Err(GoFlowError::Closed) | Err(GoFlowError::Broker(_)) => break,
                    Err(e) => panic!("unexpected push error: {e}"),
                }
            }
            pushed
        })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    timeout(Duration::from_secs(2), flow.close())
        .await
        .expect("close finishes under load")
        .unwrap();

    let pushed = producer.await.unwrap();
    assert!(pushed <= 100);
    let after_close = handled.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handled.load(Ordering::SeqCst), after_close);
    assert!(matches!(
        flow.push("work", json!(0)).await,
        Err(GoFlowError::Closed)
    ));
}
