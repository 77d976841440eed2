//! Loop scheduler demonstration
//!
//! Starts a scheduler, runs blocking and cooperative work on it from several
//! caller threads, iterates a loop-side stream and shuts down.
//!
//! Run with:
//! ```bash
//! cargo run -p core-bridge --example scheduler_demo
//!
//! # JSON logs, with a longer default timeout
//! # (LOOPTRAY_LOG_FORMAT=json works too)
//! LOOPTRAY_TASK_TIMEOUT_SECS=10 cargo run -p core-bridge --example scheduler_demo -- json
//! ```

use core_async::time;
use core_bridge::{CooperativeFuture, LoopScheduler, LoopValue};
use core_runtime::config::SchedulerConfig;
use core_runtime::logging::{init_logging, LogLevel, LoggingConfig};
use futures::stream::{self, StreamExt};
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let mut logging = LoggingConfig::from_env()?.with_level(LogLevel::Debug);
    if let Some(format) = env::args().nth(1) {
        logging = logging.with_format(format.parse()?);
    }
    init_logging(logging)?;

    let scheduler = Arc::new(LoopScheduler::new(SchedulerConfig::from_env()?)?);
    scheduler.start()?;

    let answer = scheduler.run(|| Ok(6 * 7))?;
    info!(answer, "Blocking work finished");

    let callers: Vec<_> = (0..4)
        .map(|caller| {
            let scheduler = scheduler.clone();
            thread::spawn(move || {
                scheduler.await_value(
                    move || async move {
                        time::sleep(Duration::from_millis(10 * caller)).await;
                        anyhow::Ok(caller * caller)
                    },
                    Some("square"),
                )
            })
        })
        .collect();
    for caller in callers {
        let squared = caller
            .join()
            .map_err(|_| anyhow::anyhow!("caller thread panicked"))??;
        info!(squared, "Cooperative work finished");
    }

    let chained = scheduler.submit_chained(|| {
        let later = CooperativeFuture::new();
        let setter = later.clone();
        core_async::spawn_local(async move {
            time::sleep(Duration::from_millis(20)).await;
            let _ = setter.set_result(LoopValue::Ready("resolved on the loop"));
        });
        Ok(LoopValue::Deferred(later))
    })?;
    let resolved = chained.resolve(Some(scheduler.timeout()))?;
    info!(resolved, "Chained future resolved");

    for item in scheduler.async_iter(|| stream::iter(1..=3).map(anyhow::Ok)) {
        let item = item?;
        info!(item, "Stream item");
    }

    scheduler.close()?;
    info!("Scheduler closed");
    Ok(())
}
