//! Progress notifications.
//!
//! A [`ProgressHub`] delivers [`ProgressEvent`]s synchronously to its
//! subscribers. A hub derived with [`ProgressHub::scoped_child_range`] also
//! forwards its `Progress` events to the parent hub, rescaled into a
//! sub-interval, which is how a child job's progress appears as a slice of its
//! parent's.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Started,
    Progress,
    Finished,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub fraction: f64,
    pub message: String,
}

impl ProgressEvent {
    pub fn started(message: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Started,
            fraction: 0.0,
            message: message.into(),
        }
    }

    pub fn progress(fraction: f64, message: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Progress,
            fraction,
            message: message.into(),
        }
    }

    pub fn finished(message: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Finished,
            fraction: 1.0,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Error,
            fraction: 1.0,
            message: message.into(),
        }
    }
}

/// Receives every event published on the hub it is subscribed to.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &ProgressEvent) -> anyhow::Result<()>;
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) -> anyhow::Result<()> {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Forward {
    parent: Arc<ProgressHub>,
    start: f64,
    end: f64,
}

#[derive(Default)]
pub struct ProgressHub {
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn ProgressObserver>)>>,
    next_id: AtomicU64,
    forward: Option<Forward>,
}

impl ProgressHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A hub whose `Progress` events are republished on `parent` mapped into
    /// `[start, end]`.
    pub fn scoped_child_range(parent: &Arc<ProgressHub>, start: f64, end: f64) -> Arc<Self> {
        Arc::new(Self {
            forward: Some(Forward {
                parent: Arc::clone(parent),
                start,
                end,
            }),
            ..Self::default()
        })
    }

    /// Linear map of `fraction` into `[start, end]`, clamped to that range.
    pub fn rescale(start: f64, end: f64, fraction: f64) -> f64 {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        start + fraction * (end - start)
    }

    pub fn subscribe(&self, observer: impl ProgressObserver + 'static) -> SubscriptionId {
        self.subscribe_shared(Arc::new(observer))
    }

    pub fn subscribe_shared(&self, observer: Arc<dyn ProgressObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, observer));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Delivers to every subscriber in subscription order. A failing or
    /// panicking observer is logged and skipped.
    pub fn publish(&self, event: &ProgressEvent) {
        let subscribers: Vec<Arc<dyn ProgressObserver>> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        for observer in subscribers {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, phase = ?event.phase, "progress observer failed"),
                Err(_) => warn!(phase = ?event.phase, "progress observer panicked"),
            }
        }

        if let Some(forward) = &self.forward
            && event.phase == ProgressPhase::Progress
        {
            let scaled = ProgressEvent::progress(
                Self::rescale(forward.start, forward.end, event.fraction),
                event.message.clone(),
            );
            forward.parent.publish(&scaled);
        }
    }

    pub fn report(&self, fraction: f64, message: impl Into<String>) {
        self.publish(&ProgressEvent::progress(fraction, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(hub: &ProgressHub) -> Arc<Mutex<Vec<ProgressEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hub.subscribe(move |e: &ProgressEvent| -> anyhow::Result<()> {
            sink.lock().push(e.clone());
            Ok(())
        });
        seen
    }

    #[test]
    fn delivers_in_subscription_order() {
        let hub = ProgressHub::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            hub.subscribe(move |_: &ProgressEvent| -> anyhow::Result<()> {
                order.lock().push(tag);
                Ok(())
            });
        }
        hub.report(0.5, "half");
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn failing_observer_does_not_block_others() {
        let hub = ProgressHub::new();
        hub.subscribe(|_: &ProgressEvent| -> anyhow::Result<()> { Err(anyhow::anyhow!("boom")) });
        hub.subscribe(|_: &ProgressEvent| -> anyhow::Result<()> { panic!("observer bug") });
        let seen = recorder(&hub);

        hub.publish(&ProgressEvent::started("go"));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = ProgressHub::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let id = hub.subscribe(move |_: &ProgressEvent| -> anyhow::Result<()> {
            *counter.lock() += 1;
            Ok(())
        });
        hub.report(0.1, "");
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.report(0.2, "");
        assert_eq!(*seen.lock(), 1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn child_range_rescales_and_clamps() {
        let parent = ProgressHub::new();
        let seen = recorder(&parent);
        let child = ProgressHub::scoped_child_range(&parent, 0.25, 0.75);

        child.report(0.5, "mid");
        child.report(1.5, "overshoot");
        child.report(-1.0, "undershoot");
        child.publish(&ProgressEvent::finished("done"));

        let fractions: Vec<f64> = seen.lock().iter().map(|e| e.fraction).collect();
        assert_eq!(fractions, vec![0.5, 0.75, 0.25]);
        assert_eq!(seen.lock()[0].message, "mid");
    }

    #[test]
    fn nested_ranges_compose() {
        let root = ProgressHub::new();
        let seen = recorder(&root);
        let mid = ProgressHub::scoped_child_range(&root, 0.5, 1.0);
        let leaf = ProgressHub::scoped_child_range(&mid, 0.0, 0.5);

        leaf.report(0.5, "deep");
        assert_eq!(seen.lock()[0].fraction, 0.625);
    }
}
