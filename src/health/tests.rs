use super::*;
use crate::messenger::{ConnectionState, Messenger};
use crate::transport::MemoryBroker;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;

#[test]
fn test_no_checks_means_ready() {
    let monitor = HealthMonitor::new();
    assert!(monitor.is_ready());
    assert!(monitor.check_readiness().is_empty());
}

#[test]
fn test_failing_checks_are_reported_by_name() {
    let monitor = HealthMonitor::new();
    monitor.register_readiness_check("db", || Err("pool exhausted".to_string()));
    monitor.register_readiness_check("cache", || Ok(()));
    monitor.register_readiness_check("broker", || Err("not connected".to_string()));

    assert!(!monitor.is_ready());
    assert_eq!(
        monitor.check_readiness(),
        vec!["broker: not connected", "db: pool exhausted"]
    );
}

#[test]
fn test_register_replaces_and_unregister_removes() {
    let monitor = HealthMonitor::new();
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();

    monitor.register_readiness_check("svc", || Err("down".to_string()));
    monitor.register_readiness_check("svc", move || {
        if flag.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("starting".to_string())
        }
    });
    assert_eq!(monitor.check_readiness(), vec!["svc: starting"]);

    healthy.store(true, Ordering::SeqCst);
    assert!(monitor.is_ready());

    monitor.register_readiness_check("other", || Err("x".to_string()));
    assert!(monitor.unregister_readiness_check("other"));
    assert!(!monitor.unregister_readiness_check("other"));
    assert!(monitor.is_ready());
    assert!(format!("{monitor:?}").contains("svc"));
}

#[tokio::test]
async fn test_messenger_readiness_follows_connection() {
    let broker = MemoryBroker::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (messenger, handle) = Messenger::builder(broker.transport())
        .retry_interval(Duration::from_millis(10))
        .spawn(shutdown_rx);

    let monitor = HealthMonitor::new();
    monitor.register_readiness_check("messenger", messenger.readiness_check());

    let mut state = messenger.connection_state();
    tokio::time::timeout(
        Duration::from_secs(3),
        state.wait_for(|s| *s == ConnectionState::Running),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(monitor.is_ready());

    shutdown_tx.send_replace(true);
    handle.await.unwrap();
    assert_eq!(
        monitor.check_readiness(),
        vec!["messenger: broker connection is Closed"]
    );
}
