//! Single-consumer delivery of finished loads to their display targets.
//!
//! Workers push [`LoadResult`]s through a [`ResultSender`]. One delivery
//! thread owns the [`ResultDispatcher`] and applies each result only while
//! the target's tag still names the result's URL.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, trace, warn};

use crate::domain::entities::LoadResult;
use crate::domain::errors::{CacheError, CacheResult};

/// Name given to the thread started by [`ResultDispatcher::spawn`].
pub const DELIVERY_THREAD_NAME: &str = "image-delivery";

#[derive(Debug, Default)]
struct Shared {
    delivery_thread: OnceLock<ThreadId>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Creates a connected sender/dispatcher pair.
#[must_use]
pub fn channel() -> (ResultSender, ResultDispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());
    (
        ResultSender {
            tx,
            shared: Arc::clone(&shared),
        },
        ResultDispatcher { rx, shared },
    )
}

/// Outcome of applying one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The bitmap was set on the target.
    Applied,
    /// The target had moved on to another URL.
    Stale,
}

/// Producer half, cloned into every worker.
#[derive(Debug, Clone)]
pub struct ResultSender {
    tx: mpsc::UnboundedSender<LoadResult>,
    shared: Arc<Shared>,
}

impl ResultSender {
    /// Queues a result for delivery. Results sent after the dispatcher is gone are discarded.
    pub fn send(&self, result: LoadResult) {
        if let Err(err) = self.tx.send(result) {
            warn!(url = %err.0.url, "Result dispatcher is gone, discarding image");
        }
    }

    /// Returns true when called on the registered delivery thread.
    #[must_use]
    pub fn is_delivery_thread(&self) -> bool {
        self.shared
            .delivery_thread
            .get()
            .is_some_and(|id| *id == thread::current().id())
    }
}

/// Applies `result` to its target unless the target has been reassigned.
pub fn deliver(result: LoadResult) -> Delivery {
    let LoadResult {
        url,
        bitmap,
        target,
    } = result;

    match target.tag() {
        Some(tag) if tag != url => {
            debug!(url = %url, current = %tag, "Dropping stale image result");
            Delivery::Stale
        }
        _ => {
            trace!(url = %url, "Delivering image to target");
            target.set_image(bitmap);
            Delivery::Applied
        }
    }
}

/// Consumer half. Exactly one thread drains it.
#[derive(Debug)]
pub struct ResultDispatcher {
    rx: mpsc::UnboundedReceiver<LoadResult>,
    shared: Arc<Shared>,
}

impl ResultDispatcher {
    /// Registers the calling thread as the delivery thread.
    ///
    /// # Errors
    /// Returns `CacheError::Configuration` if another thread is already registered.
    pub fn attach_current_thread(&self) -> CacheResult<()> {
        let current = thread::current().id();
        let registered = *self.shared.delivery_thread.get_or_init(|| current);
        if registered == current {
            Ok(())
        } else {
            Err(CacheError::configuration(
                "Result dispatcher is already bound to another thread",
            ))
        }
    }

    /// Delivers every result queued so far without blocking.
    ///
    /// Returns the number of results applied. Meant for callers that own an
    /// event loop and poll between frames.
    ///
    /// # Errors
    /// Returns `CacheError::Configuration` when called off the delivery thread.
    pub fn drain_pending(&mut self) -> CacheResult<usize> {
        self.attach_current_thread()?;
        let mut applied = 0;
        loop {
            match self.rx.try_recv() {
                Ok(result) => {
                    if self.dispatch(result) == Delivery::Applied {
                        applied += 1;
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        Ok(applied)
    }

    /// Blocks the calling thread, delivering results until every sender is dropped.
    ///
    /// # Errors
    /// Returns `CacheError::Configuration` when called off the delivery thread.
    ///
    /// # Panics
    /// Panics if called from within an async execution context.
    pub fn run(mut self) -> CacheResult<()> {
        self.attach_current_thread()?;
        while let Some(result) = self.rx.blocking_recv() {
            self.dispatch(result);
        }
        debug!("Result dispatcher stopped");
        Ok(())
    }

    /// Starts a dedicated delivery thread running [`ResultDispatcher::run`].
    ///
    /// # Errors
    /// Returns error if the thread cannot be spawned.
    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(DELIVERY_THREAD_NAME.to_string())
            .spawn(move || {
                if let Err(e) = self.run() {
                    error!(error = %e, "Result dispatcher failed");
                }
            })
    }

    /// Results applied so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Stale results dropped so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    fn dispatch(&self, result: LoadResult) -> Delivery {
        let outcome = deliver(result);
        let counter = match outcome {
            Delivery::Applied => &self.shared.delivered,
            Delivery::Stale => &self.shared.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Bitmap;
    use crate::domain::ports::DisplayTarget;
    use crate::domain::ports::mocks::RecordingTarget;

    fn bitmap(width: u32) -> Bitmap {
        Arc::new(image::DynamicImage::new_rgb8(width, width))
    }

    fn result_for(url: &str, target: &Arc<RecordingTarget>, width: u32) -> LoadResult {
        LoadResult {
            url: url.to_string(),
            bitmap: bitmap(width),
            target: Arc::clone(target) as Arc<dyn DisplayTarget>,
        }
    }

    #[test]
    fn test_stale_result_is_dropped_then_current_applied() {
        let target = Arc::new(RecordingTarget::new(100, 100));
        target.set_tag("urlA");

        assert_eq!(deliver(result_for("urlB", &target, 5)), Delivery::Stale);
        assert!(target.images().is_empty());

        assert_eq!(deliver(result_for("urlA", &target, 7)), Delivery::Applied);
        assert_eq!(target.images(), vec![7]);
    }

    #[test]
    fn test_untagged_target_accepts_any_result() {
        let target = Arc::new(RecordingTarget::new(10, 10));
        assert_eq!(deliver(result_for("anything", &target, 3)), Delivery::Applied);
        assert_eq!(target.images(), vec![3]);
    }

    #[test]
    fn test_drain_pending_counts() {
        let (sender, mut dispatcher) = channel();
        let target = Arc::new(RecordingTarget::new(10, 10));
        target.set_tag("keep");

        sender.send(result_for("drop", &target, 1));
        sender.send(result_for("keep", &target, 2));

        assert_eq!(dispatcher.drain_pending().unwrap(), 1);
        assert_eq!(dispatcher.delivered(), 1);
        assert_eq!(dispatcher.dropped(), 1);
        assert!(sender.is_delivery_thread());
        assert_eq!(dispatcher.drain_pending().unwrap(), 0);
    }

    #[test]
    fn test_delivery_thread_is_fixed() {
        let (sender, mut dispatcher) = channel();
        dispatcher.drain_pending().unwrap();

        let err = thread::spawn(move || {
            assert!(!sender.is_delivery_thread());
            dispatcher.drain_pending()
        })
        .join()
        .unwrap();
        assert!(matches!(err, Err(CacheError::Configuration { .. })));
    }

    #[test]
    fn test_spawned_thread_delivers_until_senders_drop() {
        let (sender, dispatcher) = channel();
        let target = Arc::new(RecordingTarget::new(10, 10));
        target.set_tag("url");

        let handle = dispatcher.spawn().unwrap();
        sender.send(result_for("url", &target, 4));
        drop(sender);
        handle.join().unwrap();

        assert_eq!(target.images(), vec![4]);
    }

    #[test]
    fn test_send_after_dispatcher_dropped_is_harmless() {
        let (sender, dispatcher) = channel();
        drop(dispatcher);
        let target = Arc::new(RecordingTarget::new(1, 1));
        sender.send(result_for("late", &target, 1));
        assert!(target.images().is_empty());
    }
}
