//! End-to-end checks through the facade crate.

use looptray::logging::init_test_logging;
use looptray::{BridgeError, LoopScheduler, SchedulerConfig};
use std::time::Duration;

fn scheduler(timeout_secs: f64) -> LoopScheduler {
    init_test_logging();
    let config = SchedulerConfig::builder()
        .task_timeout_secs(timeout_secs)
        .build()
        .unwrap();
    LoopScheduler::new(config).unwrap()
}

#[test]
fn test_round_trip_through_facade() {
    let scheduler = scheduler(1.0);
    let guard = scheduler.enter().unwrap();

    assert_eq!(guard.run(|| Ok(42)).unwrap(), 42);
    let slept = guard
        .await_value(
            || async {
                looptray::time::sleep(Duration::from_millis(5)).await;
                anyhow::Ok("awake")
            },
            Some("nap"),
        )
        .unwrap();
    assert_eq!(slept, "awake");
}

#[test]
fn test_slow_work_times_out_through_facade() {
    let scheduler = scheduler(0.05);
    let err = scheduler
        .run(|| {
            std::thread::sleep(Duration::from_millis(250));
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { .. }));
}

#[test]
fn test_config_errors_surface_as_bridge_errors() {
    let config = SchedulerConfig {
        name: String::new(),
        ..SchedulerConfig::default()
    };
    let runtime = looptray::runtime::new_loop_runtime().unwrap();
    assert!(matches!(
        LoopScheduler::with_runtime(runtime, config),
        Err(BridgeError::Config(_))
    ));
}

#[test]
fn test_external_runtime_drives_work_across_restarts() {
    init_test_logging();
    let config = SchedulerConfig::builder().name("external").build().unwrap();
    let runtime = looptray::runtime::new_loop_runtime().unwrap();
    let scheduler = LoopScheduler::with_runtime(runtime, config).unwrap();

    let first = scheduler
        .await_value(
            || async {
                looptray::task::yield_now().await;
                anyhow::Ok(5)
            },
            None,
        )
        .unwrap();
    assert_eq!(first, 5);

    scheduler.stop().unwrap();
    assert_eq!(scheduler.run(|| Ok(6)).unwrap(), 6);
    scheduler.close().unwrap();
}
