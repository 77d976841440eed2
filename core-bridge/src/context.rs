//! Per-thread loop context.
//!
//! The worker thread installs its loop's handle and stop signal here for as
//! long as it drives the loop. Code running on the loop finds "its" loop
//! through [`current_handle`] instead of having it passed down, and values
//! that must never leave the loop thread are parked in a thread-local slot map
//! behind a [`LoopLocal`] token.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use core_async::dispatch::LoopHandle;
use tracing::{debug, trace};

use crate::blocking::BlockingFuture;
use crate::cooperative::CooperativeFuture;
use crate::error::{BridgeError, Result};

struct LoopContext {
    handle: LoopHandle,
    stop_signal: Option<CooperativeFuture<BlockingFuture<()>>>,
}

thread_local! {
    /// The loop driven by the current thread, if any.
    static CURRENT_LOOP: RefCell<Option<LoopContext>> = const { RefCell::new(None) };

    /// Values parked on this thread by [`LoopLocal`] tokens.
    static SLOTS: RefCell<HashMap<u64, Box<dyn Any>>> = RefCell::new(HashMap::new());
}

static NEXT_SLOT: AtomicU64 = AtomicU64::new(1);

/// Binds `handle` as the current thread's loop for the duration of `f`.
///
/// Parked values left behind when `f` returns are dropped here, on the loop
/// thread, before the previous context is restored.
pub(crate) fn enter_loop<R>(handle: LoopHandle, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_LOOP.with(|current| {
        current.replace(Some(LoopContext {
            handle,
            stop_signal: None,
        }))
    });

    let out = f();

    let leftovers = SLOTS.with(|slots| std::mem::take(&mut *slots.borrow_mut()));
    if !leftovers.is_empty() {
        debug!(count = leftovers.len(), "Dropping loop-local values at loop exit");
    }
    drop(leftovers);

    CURRENT_LOOP.with(|current| current.replace(previous));
    out
}

/// Handle of the loop driven by the current thread.
pub fn current_handle() -> Option<LoopHandle> {
    CURRENT_LOOP.with(|current| current.borrow().as_ref().map(|cx| cx.handle.clone()))
}

/// Returns `true` when called on a thread that is driving a loop.
pub fn on_loop_thread() -> bool {
    CURRENT_LOOP.with(|current| current.borrow().is_some())
}

pub(crate) fn install_stop_signal(signal: CooperativeFuture<BlockingFuture<()>>) {
    CURRENT_LOOP.with(|current| {
        if let Some(cx) = current.borrow_mut().as_mut() {
            cx.stop_signal = Some(signal);
        }
    });
}

/// Asks the current loop to finish; `ack` settles once it has.
pub(crate) fn signal_stop(ack: BlockingFuture<()>) {
    let signal = CURRENT_LOOP.with(|current| {
        current
            .borrow()
            .as_ref()
            .and_then(|cx| cx.stop_signal.clone())
    });

    match signal {
        Some(signal) => {
            if signal.set_result(ack.clone()).is_err() {
                trace!("Stop already requested");
                let _ = ack.set_result(());
            }
        }
        None => {
            let _ = ack.set_exception(BridgeError::NoLoop);
        }
    }
}

/// A thread-safe token for a value that stays on its loop thread.
///
/// The token can travel to any thread, but the value can only be reached on
/// the loop thread that created it. Dropping the token elsewhere posts the
/// value's removal back to that loop.
pub struct LoopLocal<T> {
    slot: Option<u64>,
    owner: ThreadId,
    handle: LoopHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T> LoopLocal<T> {
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn check_owner(&self) -> Result<u64> {
        if !self.is_owner_thread() {
            return Err(BridgeError::WrongThread);
        }
        self.slot.ok_or(BridgeError::NotRunning)
    }
}

impl<T: 'static> LoopLocal<T> {
    /// Parks `value` on the current loop thread.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NoLoop`] when the current thread drives no loop.
    pub fn new(value: T) -> Result<Self> {
        let handle = current_handle().ok_or(BridgeError::NoLoop)?;
        let slot = NEXT_SLOT.fetch_add(1, Ordering::Relaxed);
        SLOTS.with(|slots| slots.borrow_mut().insert(slot, Box::new(value)));

        Ok(Self {
            slot: Some(slot),
            owner: thread::current().id(),
            handle,
            _marker: PhantomData,
        })
    }

    /// Removes the parked value and returns it.
    pub fn take(mut self) -> Result<T> {
        let slot = self.check_owner()?;
        self.slot = None;
        SLOTS
            .with(|slots| slots.borrow_mut().remove(&slot))
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
            .ok_or(BridgeError::NotRunning)
    }
}

impl<T: Clone + 'static> LoopLocal<T> {
    /// Returns a clone of the parked value.
    pub fn get(&self) -> Result<T> {
        let slot = self.check_owner()?;
        SLOTS
            .with(|slots| {
                slots
                    .borrow()
                    .get(&slot)
                    .and_then(|value| value.downcast_ref::<T>())
                    .cloned()
            })
            .ok_or(BridgeError::NotRunning)
    }
}

fn remove_slot(slot: u64) {
    let removed = SLOTS.with(|slots| slots.borrow_mut().remove(&slot));
    drop(removed);
}

impl<T> Drop for LoopLocal<T> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        if self.is_owner_thread() {
            remove_slot(slot);
        } else if self.handle.post(move || remove_slot(slot)).is_err() {
            trace!(slot, "Loop already gone; parked value went with it");
        }
    }
}

impl<T> fmt::Debug for LoopLocal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopLocal")
            .field("slot", &self.slot)
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_async::{dispatch, runtime, task};
    use std::rc::Rc;
    use std::sync::Arc;

    #[test]
    fn test_no_loop_outside_context() {
        assert!(current_handle().is_none());
        assert!(!on_loop_thread());
        assert!(matches!(LoopLocal::new(1u8), Err(BridgeError::NoLoop)));
    }

    #[test]
    fn test_context_is_restored_after_loop() {
        let (handle, _queue) = dispatch::channel();
        let inside = enter_loop(handle, on_loop_thread);
        assert!(inside);
        assert!(!on_loop_thread());
    }

    #[test]
    fn test_loop_local_round_trip_on_owner() {
        let (handle, _queue) = dispatch::channel();
        enter_loop(handle, || {
            let local = LoopLocal::new(Rc::new(5)).unwrap();
            assert_eq!(*local.get().unwrap(), 5);
            assert_eq!(*local.take().unwrap(), 5);
        });
    }

    #[test]
    fn test_loop_local_rejects_foreign_thread() {
        let (handle, _queue) = dispatch::channel();
        let local = enter_loop(handle, || Arc::new(LoopLocal::new(Rc::new(1)).unwrap()));

        let remote = local.clone();
        let seen = thread::spawn(move || matches!(remote.get(), Err(BridgeError::WrongThread)))
            .join()
            .unwrap();
        assert!(seen);
    }

    #[test]
    fn test_owner_drop_removes_value() {
        let value = Rc::new(());
        let (handle, _queue) = dispatch::channel();
        enter_loop(handle, || {
            let local = LoopLocal::new(value.clone()).unwrap();
            assert!(local.is_owner_thread());
            assert_eq!(Rc::strong_count(&value), 2);
            drop(local);
            assert_eq!(Rc::strong_count(&value), 1);
            assert!(SLOTS.with(|slots| slots.borrow().is_empty()));
        });
    }

    #[test]
    fn test_values_dropped_when_loop_exits() {
        let dropped = Rc::new(());
        let (handle, _queue) = dispatch::channel();
        let token = enter_loop(handle, || LoopLocal::new(dropped.clone()).unwrap());

        assert_eq!(Rc::strong_count(&dropped), 1);
        assert!(matches!(token.get(), Err(BridgeError::NotRunning)));
    }

    #[test]
    fn test_foreign_drop_posts_removal() {
        let (handle, queue) = dispatch::channel();
        let rt = runtime::new_loop_runtime().unwrap();

        enter_loop(handle.clone(), || {
            runtime::run_local(&rt, async move {
                task::spawn_local(queue.run());
                let local = LoopLocal::new(Rc::new(7)).unwrap();

                let (tx, rx) = core_async::sync::oneshot::channel();
                thread::spawn(move || {
                    drop(local);
                    let _ = tx.send(());
                });
                rx.await.unwrap();
                for _ in 0..100 {
                    if SLOTS.with(|slots| slots.borrow().is_empty()) {
                        break;
                    }
                    task::yield_now().await;
                }

                assert!(SLOTS.with(|slots| slots.borrow().is_empty()));
            });
        });
        drop(handle);
    }

    #[test]
    fn test_stop_signal_without_loop_fails_ack() {
        let ack = BlockingFuture::new();
        signal_stop(ack.clone());
        assert!(matches!(
            ack.result(None).unwrap_err(),
            BridgeError::Task(_)
        ));
    }
}
