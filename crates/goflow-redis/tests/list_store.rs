mod helpers;

use goflow_core::broker::ListStore;
use goflow_redis::RedisConfig;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_list_is_fifo() {
    helpers::init_tracing();
    let mut redis = helpers::TestRedis::start().await;
    let store = redis.store().await;

    store.push_left("tasks", b"a".to_vec()).await.unwrap();
    store.push_left("tasks", b"b".to_vec()).await.unwrap();
    assert_eq!(store.len("tasks").await.unwrap(), 2);

    let first = store
        .blocking_pop_right("tasks", Duration::from_secs(1))
        .await
        .unwrap();
    let second = store
        .blocking_pop_right("tasks", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(first.as_deref(), Some(&b"a"[..]));
    assert_eq!(second.as_deref(), Some(&b"b"[..]));
    redis.cleanup().await;
}

#[tokio::test]
async fn test_pop_times_out_on_empty_list() {
    helpers::init_tracing();
    let mut redis = helpers::TestRedis::start().await;
    let store = redis.store().await;

    let started = Instant::now();
    let popped = store
        .blocking_pop_right("results", Duration::from_millis(200))
        .await
        .unwrap();
    assert!(popped.is_none());
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(started.elapsed() < Duration::from_secs(2));
    redis.cleanup().await;
}

#[tokio::test]
async fn test_push_right_is_popped_next() {
    helpers::init_tracing();
    let mut redis = helpers::TestRedis::start().await;
    let store = redis.store().await;

    store.push_left("tasks", b"queued".to_vec()).await.unwrap();
    store.push_right("tasks", b"requeued".to_vec()).await.unwrap();
    let next = store
        .blocking_pop_right("tasks", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(next.as_deref(), Some(&b"requeued"[..]));
    redis.cleanup().await;
}

#[tokio::test]
async fn test_pop_does_not_stall_pushes() {
    helpers::init_tracing();
    let mut redis = helpers::TestRedis::start().await;
    let store = redis.store().await;

    let popper = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .blocking_pop_right("tasks", Duration::from_secs(5))
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    store.push_left("tasks", b"x".to_vec()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(popper.await.unwrap().as_deref(), Some(&b"x"[..]));
    redis.cleanup().await;
}

#[tokio::test]
async fn test_key_prefix_namespaces_lists() {
    helpers::init_tracing();
    let mut redis = helpers::TestRedis::start().await;
    let plain = redis.store().await;
    let staged = redis
        .store_with(RedisConfig::new(redis.redis_url()).with_key_prefix("staging:"))
        .await;

    staged.push_left("tasks", b"s".to_vec()).await.unwrap();
    assert_eq!(plain.len("tasks").await.unwrap(), 0);
    assert_eq!(plain.len("staging:tasks").await.unwrap(), 1);

    staged.clear("tasks").await.unwrap();
    assert_eq!(plain.len("staging:tasks").await.unwrap(), 0);
    redis.cleanup().await;
}
