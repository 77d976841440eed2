//! Integration tests for the loop scheduler.
//!
//! Every test drives a real worker thread; timeouts are kept short so that
//! the failure cases finish quickly.

use core_async::{task, time};
use core_bridge::{
    to_cooperative, BlockingFuture, BridgeError, CooperativeFuture, LoopScheduler, LoopValue,
    SchedulerState, ThreadValue,
};
use core_runtime::config::SchedulerConfig;
use core_runtime::logging::init_test_logging;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

fn scheduler_with_timeout(secs: f64) -> LoopScheduler {
    init_test_logging();
    let config = SchedulerConfig::builder()
        .name("scheduler-tests")
        .task_timeout_secs(secs)
        .build()
        .unwrap();
    LoopScheduler::new(config).unwrap()
}

fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_run_returns_value() {
    let scheduler = scheduler_with_timeout(1.0);
    let guard = scheduler.enter().unwrap();
    assert_eq!(guard.run(|| Ok(42)).unwrap(), 42);
}

#[test]
fn test_run_times_out_on_slow_work() {
    let scheduler = scheduler_with_timeout(0.1);
    let err = scheduler
        .run(|| {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(
        err,
        BridgeError::Timeout { name: None, timeout } if timeout == Duration::from_millis(100)
    ));
    scheduler.stop().unwrap();
}

#[test]
fn test_await_value_runs_cooperative_unit() {
    let scheduler = scheduler_with_timeout(1.0);
    let value = scheduler
        .await_value(
            || async {
                time::sleep(Duration::from_millis(10)).await;
                anyhow::Ok("slept")
            },
            None,
        )
        .unwrap();
    assert_eq!(value, "slept");
}

#[test]
fn test_await_value_timeout_carries_name() {
    let scheduler = scheduler_with_timeout(0.05);
    let err = scheduler
        .await_value(
            || async {
                time::sleep(Duration::from_secs(5)).await;
                anyhow::Ok(())
            },
            Some("fetch_profile"),
        )
        .unwrap_err();

    assert_eq!(err.to_string(), "fetch_profile after 0.05 seconds");
}

#[test]
fn test_await_value_timeout_defaults_to_unit_name() {
    let scheduler = scheduler_with_timeout(0.05);
    let err = scheduler
        .await_value(
            || async {
                time::sleep(Duration::from_secs(5)).await;
                anyhow::Ok(())
            },
            None,
        )
        .unwrap_err();

    match err {
        BridgeError::Timeout { name: Some(name), .. } => assert!(!name.is_empty()),
        other => panic!("expected a named timeout, got {other:?}"),
    }
}

#[test]
fn test_errors_are_reraised_to_caller() {
    #[derive(thiserror::Error, Debug)]
    #[error("quota exceeded: {0}")]
    struct QuotaError(u32);

    let scheduler = scheduler_with_timeout(1.0);
    let err = scheduler
        .run(|| -> anyhow::Result<()> { Err(QuotaError(3).into()) })
        .unwrap_err();

    let task_error = err.task_error().unwrap();
    assert!(matches!(task_error.downcast_ref::<QuotaError>(), Some(QuotaError(3))));
}

#[test]
fn test_panic_is_captured_and_loop_survives() {
    let scheduler = scheduler_with_timeout(1.0);
    let err = scheduler
        .run(|| -> anyhow::Result<u8> { panic!("work blew up") })
        .unwrap_err();

    assert!(err.task_error().unwrap().is_panic());
    assert!(err.to_string().contains("work blew up"));
    assert_eq!(scheduler.run(|| Ok(7)).unwrap(), 7);
}

#[test]
fn test_cancel_before_run_prevents_side_effects() {
    let scheduler = scheduler_with_timeout(1.0);
    let (release, gate) = mpsc::channel::<()>();
    let ran = Arc::new(AtomicBool::new(false));

    let blocker = scheduler
        .submit(move || {
            gate.recv()?;
            Ok(())
        })
        .unwrap();

    let flag = ran.clone();
    let victim = scheduler
        .submit(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert!(victim.cancel());
    release.send(()).unwrap();
    blocker.result(Some(Duration::from_secs(1))).unwrap();

    // Round trip so everything queued behind the victim has run
    scheduler.run(|| Ok(())).unwrap();
    assert!(!ran.load(Ordering::SeqCst));
    assert!(victim.result(None).unwrap_err().is_cancelled());
}

#[test]
fn test_running_work_cannot_be_cancelled() {
    let scheduler = scheduler_with_timeout(1.0);
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (release, gate) = mpsc::channel::<()>();

    let future = scheduler
        .submit(move || {
            started_tx.send(())?;
            gate.recv()?;
            Ok("finished")
        })
        .unwrap();

    started_rx.recv().unwrap();
    assert!(future.running());
    assert!(!future.cancel());
    release.send(()).unwrap();
    assert_eq!(future.result(Some(Duration::from_secs(1))).unwrap(), "finished");
}

#[test]
fn test_cancelling_cooperative_unit_aborts_it() {
    struct DropFlag(Arc<AtomicBool>);
    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    let scheduler = scheduler_with_timeout(1.0);
    let dropped = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));

    let flag = DropFlag(dropped.clone());
    let done = finished.clone();
    let future = scheduler
        .await_submit(move || async move {
            let _flag = flag;
            time::sleep(Duration::from_secs(10)).await;
            done.store(true, Ordering::SeqCst);
            anyhow::Ok(())
        })
        .unwrap();

    // Let the unit reach its sleep
    scheduler.run(|| Ok(())).unwrap();
    assert!(future.cancel());

    assert!(wait_for(|| dropped.load(Ordering::SeqCst)));
    assert!(!finished.load(Ordering::SeqCst));
}

#[test]
fn test_stop_and_restart() {
    let scheduler = scheduler_with_timeout(1.0);
    assert_eq!(scheduler.state(), SchedulerState::Pending);

    scheduler.start().unwrap();
    let first = scheduler.run(|| Ok(thread::current().id())).unwrap();
    scheduler.stop().unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert!(scheduler.handle().is_none());

    scheduler.start().unwrap();
    let second = scheduler.run(|| Ok(thread::current().id())).unwrap();
    assert_ne!(first, second);
    assert_eq!(scheduler.run(|| Ok(1 + 1)).unwrap(), 2);
    scheduler.stop().unwrap();
}

#[test]
fn test_submission_restarts_stopped_scheduler() {
    let scheduler = scheduler_with_timeout(1.0);
    scheduler.start().unwrap();
    scheduler.stop().unwrap();

    assert_eq!(scheduler.run(|| Ok("again")).unwrap(), "again");
    assert!(scheduler.is_running());
}

#[test]
fn test_close_then_start_fails() {
    let scheduler = scheduler_with_timeout(1.0);
    scheduler.start().unwrap();
    scheduler.close().unwrap();

    assert!(matches!(scheduler.start(), Err(BridgeError::Closed)));
    assert!(matches!(
        scheduler.submit(|| Ok(())),
        Err(BridgeError::Closed)
    ));
    scheduler.close().unwrap();
}

#[test]
fn test_guard_stops_on_drop() {
    let scheduler = scheduler_with_timeout(1.0);
    {
        let guard = scheduler.enter().unwrap();
        assert!(guard.is_running());
    }
    assert!(!scheduler.is_running());
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[test]
fn test_guard_stops_when_scope_panics() {
    let scheduler = scheduler_with_timeout(1.0);
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _guard = scheduler.enter().unwrap();
        panic!("scope failed");
    }));

    assert!(outcome.is_err());
    assert!(!scheduler.is_running());
}

#[test]
fn test_multiple_schedulers_side_by_side() {
    let left = scheduler_with_timeout(1.0);
    let right = scheduler_with_timeout(1.0);

    let left_thread = left.run(|| Ok(thread::current().id())).unwrap();
    let right_thread = right.run(|| Ok(thread::current().id())).unwrap();

    assert_ne!(left_thread, right_thread);
    assert!(left.is_running() && right.is_running());

    left.stop().unwrap();
    assert_eq!(right.run(|| Ok(5)).unwrap(), 5);
}

#[test]
fn test_submit_from_many_threads() {
    let scheduler = Arc::new(scheduler_with_timeout(2.0));
    let counter = Arc::new(AtomicUsize::new(0));

    let callers: Vec<_> = (0..8)
        .map(|i| {
            let scheduler = scheduler.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                scheduler
                    .run(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(i * 2)
                    })
                    .unwrap()
            })
        })
        .collect();

    let mut results: Vec<_> = callers.into_iter().map(|c| c.join().unwrap()).collect();
    results.sort_unstable();
    assert_eq!(results, (0..8).map(|i| i * 2).collect::<Vec<_>>());
    assert_eq!(counter.load(Ordering::SeqCst), 8);
}

#[test]
fn test_work_is_fifo() {
    let scheduler = scheduler_with_timeout(1.0);
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let futures: Vec<_> = (0..10)
        .map(|i| {
            let order = order.clone();
            scheduler
                .submit(move || {
                    order.lock().push(i);
                    Ok(())
                })
                .unwrap()
        })
        .collect();

    for future in futures {
        future.result(Some(Duration::from_secs(1))).unwrap();
    }
    assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_chained_submit_resolves_inner_loop_future() {
    let scheduler = scheduler_with_timeout(1.0);
    let future = scheduler
        .submit_chained(|| {
            let inner = CooperativeFuture::new();
            let setter = inner.clone();
            task::spawn_local(async move {
                time::sleep(Duration::from_millis(20)).await;
                setter.set_result(LoopValue::Ready(99)).unwrap();
            });
            Ok(LoopValue::Deferred(inner))
        })
        .unwrap();

    match future.result(Some(Duration::from_secs(1))).unwrap() {
        ThreadValue::Deferred(inner) => {
            assert_eq!(inner.resolve(Some(Duration::from_secs(1))).unwrap(), 99)
        }
        ThreadValue::Ready(_) => panic!("inner future should have been bridged"),
    }
}

#[test]
fn test_chained_unit_resolves_nested_futures() {
    let scheduler = scheduler_with_timeout(1.0);
    let future = scheduler
        .await_submit_chained(|| async {
            let outer = CooperativeFuture::new();
            let inner = CooperativeFuture::new();
            outer.set_result(LoopValue::Deferred(inner.clone())).unwrap();

            task::spawn_local(async move {
                task::yield_now().await;
                inner.set_result(LoopValue::Ready("innermost")).unwrap();
            });
            anyhow::Ok(LoopValue::Deferred(outer))
        })
        .unwrap();

    assert_eq!(future.resolve(Some(Duration::from_secs(1))).unwrap(), "innermost");
}

#[test]
fn test_chained_failure_reaches_caller() {
    let scheduler = scheduler_with_timeout(1.0);
    let future = scheduler
        .submit_chained(|| {
            let inner = CooperativeFuture::<LoopValue<u8>>::new();
            inner
                .set_exception(anyhow::anyhow!("inner loop failure"))
                .unwrap();
            Ok(LoopValue::Deferred(inner))
        })
        .unwrap();

    let err = future.resolve(Some(Duration::from_secs(1))).unwrap_err();
    assert_eq!(err.to_string(), "inner loop failure");
}

#[test]
fn test_loop_awaits_blocking_future_settled_elsewhere() {
    let scheduler = scheduler_with_timeout(1.0);
    let source = BlockingFuture::new();

    let awaited = source.clone();
    let result = scheduler
        .await_submit(move || async move {
            let bridged = to_cooperative(&awaited)?;
            anyhow::Ok(bridged.resolve().await?)
        })
        .unwrap();

    thread::sleep(Duration::from_millis(20));
    source.set_result(ThreadValue::Ready(String::from("from caller"))).unwrap();
    assert_eq!(
        result.result(Some(Duration::from_secs(1))).unwrap(),
        "from caller"
    );
}

#[test]
fn test_queued_work_cancelled_when_scheduler_closes() {
    let scheduler = scheduler_with_timeout(1.0);
    let (started_tx, started_rx) = mpsc::channel::<()>();

    let pending = scheduler
        .await_submit(move || async move {
            started_tx.send(())?;
            time::sleep(Duration::from_secs(10)).await;
            anyhow::Ok(())
        })
        .unwrap();

    started_rx.recv().unwrap();
    scheduler.close().unwrap();
    assert!(pending.result(Some(Duration::from_secs(1))).unwrap_err().is_cancelled());
}

#[test]
fn test_submissions_survive_concurrent_restarts() {
    let scheduler = Arc::new(scheduler_with_timeout(2.0));
    scheduler.start().unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let submitter = {
        let scheduler = scheduler.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut completed = 0usize;
            while !done.load(Ordering::SeqCst) {
                let outcome = scheduler
                    .submit(|| Ok(1))
                    .and_then(|future| future.result(Some(Duration::from_secs(2))));
                match outcome {
                    Ok(value) => {
                        assert_eq!(value, 1);
                        completed += 1;
                    }
                    // Queued behind a stop signal and dropped with the loop
                    Err(BridgeError::Cancelled) => {}
                    Err(err) => panic!("submission failed during restart: {err}"),
                }
            }
            completed
        })
    };

    for _ in 0..50 {
        scheduler.stop().unwrap();
        match scheduler.start() {
            Ok(()) | Err(BridgeError::AlreadyRunning) => {}
            Err(err) => panic!("restart failed: {err}"),
        }
    }

    done.store(true, Ordering::SeqCst);
    assert!(submitter.join().unwrap() > 0);
    assert_eq!(scheduler.run(|| Ok("still serving")).unwrap(), "still serving");
}

#[test]
fn test_scheduler_dropped_inside_async_context() {
    core_async::runtime::block_on(async {
        let scheduler = scheduler_with_timeout(1.0);
        assert_eq!(scheduler.run(|| Ok(1)).unwrap(), 1);
        drop(scheduler);

        let never_started = scheduler_with_timeout(1.0);
        drop(never_started);
    });
}

#[test]
fn test_scheduler_closed_inside_async_context() {
    core_async::runtime::block_on(async {
        let scheduler = scheduler_with_timeout(1.0);
        assert_eq!(scheduler.run(|| Ok(2)).unwrap(), 2);
        scheduler.close().unwrap();
        assert!(scheduler.is_closed());
    });
}
