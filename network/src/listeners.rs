//! Listener traits and the registry that fans events out to them.
//!
//! Every registered listener gets its own worker task, started on first
//! delivery and fed through an unbounded queue. Events therefore reach a
//! listener in the order they were dispatched, a slow listener delays only
//! itself, and dispatching never waits on listener code. Once a listener is
//! removed (or the registry cleared) events still queued for it are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use harbor_messages::Message;
use tokio::sync::mpsc;

use crate::Connection;

/// Receives every authorized message arriving on any connection of a node.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: &Message, connection: &Arc<Connection>, node_id: &str);
}

/// Observes connections joining and leaving a node.
pub trait ConnectionListener: Send + Sync {
    fn on_connection(&self, connection: &Arc<Connection>);
    fn on_disconnect(&self, connection: &Arc<Connection>);
}

/// Receives authorized messages arriving on one connection.
pub trait ConnectionMessageListener: Send + Sync {
    fn on_message(&self, message: &Message);
}

type Job<L> = Box<dyn FnOnce(&L) + Send>;

struct Subscriber<L: ?Sized> {
    listener: Arc<L>,
    /// Cleared on removal; the worker checks it before every job.
    active: Arc<AtomicBool>,
    queue: OnceLock<mpsc::UnboundedSender<Job<L>>>,
}

impl<L> Subscriber<L>
where
    L: ?Sized + Send + Sync + 'static,
{
    fn new(listener: Arc<L>) -> Self {
        Self {
            listener,
            active: Arc::new(AtomicBool::new(true)),
            queue: OnceLock::new(),
        }
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn deliver(&self, job: Job<L>) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        // Outside a runtime (e.g. during drop in a sync test) run inline.
        if tokio::runtime::Handle::try_current().is_err() {
            job(&*self.listener);
            return;
        }
        let queue = self.queue.get_or_init(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<Job<L>>();
            let listener = Arc::clone(&self.listener);
            let active = Arc::clone(&self.active);
            tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    if !active.load(Ordering::SeqCst) {
                        break;
                    }
                    job(&*listener);
                }
            });
            tx
        });
        if queue.send(job).is_err() {
            tracing::warn!("listener worker has stopped, event dropped");
        }
    }
}

/// Copy-on-write set of listeners. Registration swaps in a new snapshot;
/// dispatch iterates whatever snapshot was current when it started.
pub struct ListenerRegistry<L: ?Sized> {
    subscribers: RwLock<Arc<Vec<Arc<Subscriber<L>>>>>,
}

fn same<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl<L> ListenerRegistry<L>
where
    L: ?Sized + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Register `listener`. Returns `false` if it was already registered.
    pub fn add(&self, listener: Arc<L>) -> bool {
        let mut guard = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.iter().any(|s| same(&s.listener, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(Arc::new(Subscriber::new(listener)));
        *guard = Arc::new(next);
        true
    }

    /// Unregister `listener`. Returns `false` if it was not registered.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut guard = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let (removed, kept): (Vec<_>, Vec<_>) = guard
            .iter()
            .cloned()
            .partition(|s| same(&s.listener, listener));
        if removed.is_empty() {
            return false;
        }
        removed.iter().for_each(|s| s.deactivate());
        *guard = Arc::new(kept);
        true
    }

    /// Remove every listener. Events already queued are not delivered.
    pub fn clear(&self) {
        let mut guard = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard.iter().for_each(|s| s.deactivate());
        *guard = Arc::new(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `event` for every registered listener.
    pub fn dispatch<F>(&self, event: F)
    where
        F: Fn(&L) + Clone + Send + 'static,
    {
        for subscriber in self.snapshot().iter() {
            let event = event.clone();
            subscriber.deliver(Box::new(move |listener: &L| event(listener)));
        }
    }

    fn snapshot(&self) -> Arc<Vec<Arc<Subscriber<L>>>> {
        Arc::clone(
            &self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl<L> Default for ListenerRegistry<L>
where
    L: ?Sized + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_messages::Ping;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
        notify: Notify,
    }

    impl ConnectionMessageListener for Recorder {
        fn on_message(&self, message: &Message) {
            if let Message::Ping(ping) = message {
                self.seen.lock().unwrap().push(ping.nonce);
                self.notify.notify_one();
            }
        }
    }

    fn ping(nonce: u32) -> Message {
        Message::from(Ping { nonce })
    }

    async fn wait_for(recorder: &Recorder, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while recorder.seen.lock().unwrap().len() < count {
                recorder.notify.notified().await;
            }
        })
        .await
        .expect("listener did not receive events in time");
    }

    #[tokio::test]
    async fn delivery_preserves_order() {
        let registry: ListenerRegistry<dyn ConnectionMessageListener> = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add(recorder.clone());
        for nonce in 0..50 {
            let message = Arc::new(ping(nonce));
            registry.dispatch(move |l| l.on_message(&message));
        }
        wait_for(&recorder, 50).await;
        assert_eq!(*recorder.seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn duplicate_add_and_remove() {
        let registry: ListenerRegistry<dyn ConnectionMessageListener> = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let as_dyn: Arc<dyn ConnectionMessageListener> = recorder.clone();
        assert!(registry.add(as_dyn.clone()));
        assert!(!registry.add(as_dyn.clone()));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&as_dyn));
        assert!(!registry.remove(&as_dyn));
        assert!(registry.is_empty());

        registry.dispatch(|l| l.on_message(&ping(1)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn dispatch_without_runtime_runs_inline() {
        let registry: ListenerRegistry<dyn ConnectionMessageListener> = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add(recorder.clone());
        registry.dispatch(|l| l.on_message(&ping(9)));
        assert_eq!(*recorder.seen.lock().unwrap(), vec![9]);
    }

    /// Blocks inside its first event until released.
    struct Gated {
        seen: Mutex<Vec<u32>>,
        entered: Notify,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl ConnectionMessageListener for Gated {
        fn on_message(&self, message: &Message) {
            if let Message::Ping(ping) = message {
                self.seen.lock().unwrap().push(ping.nonce);
                self.entered.notify_one();
                let _ = self.release.lock().unwrap().recv();
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cleared_listener_skips_queued_events() {
        let registry: ListenerRegistry<dyn ConnectionMessageListener> = ListenerRegistry::new();
        let (release, gate) = std::sync::mpsc::channel();
        let gated = Arc::new(Gated {
            seen: Mutex::new(Vec::new()),
            entered: Notify::new(),
            release: Mutex::new(gate),
        });
        registry.add(gated.clone());
        for nonce in 0..3 {
            let message = Arc::new(ping(nonce));
            registry.dispatch(move |l| l.on_message(&message));
        }
        tokio::time::timeout(Duration::from_secs(2), gated.entered.notified())
            .await
            .expect("first event delivered");

        registry.clear();
        drop(release);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*gated.seen.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn clear_drops_everyone() {
        let registry: ListenerRegistry<dyn ConnectionMessageListener> = ListenerRegistry::new();
        registry.add(Arc::new(Recorder::default()));
        registry.add(Arc::new(Recorder::default()));
        assert_eq!(registry.len(), 2);
        registry.clear();
        assert!(registry.is_empty());
    }
}
