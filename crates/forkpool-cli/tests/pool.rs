//! End-to-end tests forking real `forkpool-echo-worker` processes.

use std::time::Duration;

use forkpool_core::{TaskStatus, WorkerId};
use forkpool_manager::{Manager, ManagerError, PoolConfig, PoolEvent, WorkerError};
use serde_json::{json, Value};

const ECHO_WORKER: &str = env!("CARGO_BIN_EXE_forkpool-echo-worker");

fn echo_config(forks: usize) -> PoolConfig {
    PoolConfig::new(forks, ECHO_WORKER)
        .with_startup_timeout_ms(10_000)
        .with_log_level("warn")
}

/// Pump events until no task is pending or running.
async fn run_until_idle(manager: &mut Manager) -> Vec<PoolEvent> {
    let pump = async {
        let mut events = Vec::new();
        while !manager.is_idle() {
            match manager.next_event().await {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    };
    tokio::time::timeout(Duration::from_secs(30), pump)
        .await
        .expect("pool did not go idle")
}

/// Pump events until one matches.
async fn wait_for<F>(manager: &mut Manager, mut matches: F) -> Vec<PoolEvent>
where
    F: FnMut(&PoolEvent) -> bool,
{
    let pump = async {
        let mut events = Vec::new();
        while let Some(event) = manager.next_event().await {
            let done = matches(&event);
            events.push(event);
            if done {
                break;
            }
        }
        events
    };
    tokio::time::timeout(Duration::from_secs(30), pump)
        .await
        .expect("event never arrived")
}

#[tokio::test]
async fn test_drain_to_completion() {
    let mut manager = Manager::new(echo_config(3)).unwrap();
    assert_eq!(manager.up().await.unwrap(), 3);

    let mut ids = Vec::new();
    for i in 0..9 {
        let task = manager
            .add_task(json!({"type": "echo", "msg": format!("hi {}", i)}))
            .await;
        ids.push(task.id());
    }

    let events = run_until_idle(&mut manager).await;
    let finished = events
        .iter()
        .filter(|e| matches!(e, PoolEvent::TaskFinished { .. }))
        .count();
    assert_eq!(finished, 9);
    assert!(manager.tasks().is_queue_empty());

    for (i, id) in ids.iter().enumerate() {
        let task = manager.tasks().get(*id).unwrap();
        assert_eq!(task.status(), TaskStatus::Finished);
        assert_eq!(
            task.result(),
            Some(&json!({"echo": format!("ECHO hi {}", i)}))
        );
        assert!(task.exec_time().is_some());
    }

    let stats = manager.workers_stat();
    assert_eq!(stats.len(), 3);
    assert_eq!(stats.values().map(|s| s.finished).sum::<u64>(), 9);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_startup_timeout_fails_up() {
    let config = echo_config(2)
        .with_startup_timeout_ms(500)
        .with_env("FORKPOOL_ECHO_SILENT_ID", "1");
    let mut manager = Manager::new(config).unwrap();

    match manager.up().await {
        Err(ManagerError::Worker(WorkerError::StartupTimeout { id, timeout_ms })) => {
            assert_eq!(id, WorkerId::new(1));
            assert_eq!(timeout_ms, 500);
        }
        other => panic!("Expected startup timeout, got {:?}", other),
    }

    // The worker that did start is stopped; the silent one was killed.
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_error_isolation() {
    let mut manager = Manager::new(echo_config(1)).unwrap();
    manager.up().await.unwrap();

    let bad = manager.add_task(json!({"type": "fail"})).await;
    let events = run_until_idle(&mut manager).await;
    assert!(events.iter().any(|e| matches!(
        e,
        PoolEvent::TaskError { task_id, failure, .. }
            if *task_id == bad.id() && failure.code.as_deref() == Some("E_ECHO_FAIL")
    )));
    assert_eq!(
        manager.tasks().get(bad.id()).unwrap().status(),
        TaskStatus::Errored
    );

    // The same worker is free again and takes the next task.
    assert!(manager.workers().get(WorkerId::new(0)).unwrap().is_free());
    let good = manager.add_task(json!({"type": "echo", "msg": "after"})).await;
    run_until_idle(&mut manager).await;
    assert_eq!(
        manager.tasks().get(good.id()).unwrap().status(),
        TaskStatus::Finished
    );

    let stat = manager.workers_stat()[&WorkerId::new(0)];
    assert_eq!(stat.errored, 1);
    assert_eq!(stat.finished, 1);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_payload_round_trip() {
    let mut manager = Manager::new(echo_config(1)).unwrap();
    manager.up().await.unwrap();

    let payload = json!({
        "type": "mirror",
        "text": "ünïcode \"quoted\" \n newline",
        "numbers": [0, -1, 1.5, 1e300],
        "nested": {"null": null, "bool": true, "empty": {}}
    });
    let task = manager.add_task(payload.clone()).await;
    run_until_idle(&mut manager).await;

    let result: &Value = manager.tasks().get(task.id()).unwrap().result().unwrap();
    assert_eq!(result, &payload);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unexpected_exit_is_fatal() {
    let mut manager = Manager::new(echo_config(2)).unwrap();
    manager.up().await.unwrap();

    let task = manager.add_task(json!({"type": "exit", "code": 3})).await;
    let events = wait_for(&mut manager, |e| matches!(e, PoolEvent::Close { .. })).await;

    assert!(events.iter().any(|e| matches!(
        e,
        PoolEvent::TaskFatal { task_id, .. } if *task_id == task.id()
    )));
    assert!(events.iter().any(|e| matches!(e, PoolEvent::Fatal { .. })));
    assert_eq!(
        events.last(),
        Some(&PoolEvent::Close {
            worker_id: WorkerId::new(0),
            code: Some(3)
        })
    );
    assert_eq!(
        manager.tasks().get(task.id()).unwrap().status(),
        TaskStatus::Fatal
    );

    // The surviving worker still takes work.
    let next = manager.add_task(json!({"type": "echo", "msg": "still here"})).await;
    run_until_idle(&mut manager).await;
    assert_eq!(
        manager.tasks().get(next.id()).unwrap().status(),
        TaskStatus::Finished
    );

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let mut manager = Manager::new(echo_config(2)).unwrap();
    manager.up().await.unwrap();

    manager.shutdown().await.unwrap();
    manager.shutdown().await.unwrap();

    let events = wait_for(&mut manager, |_| false).await;
    assert!(events
        .iter()
        .all(|e| matches!(e, PoolEvent::Close { code: Some(0), .. })));
}
