//! Event dispatcher
//!
//! Routes translated events to the handlers registered for their name. Handlers of one
//! event run in registration order, one at a time, on a task spawned per event; events
//! of a shard are handed over in the order they were translated. A failing or panicking
//! handler is logged and never stops delivery to the others.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chorus_cache::Cache;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{Event, EventName};
use crate::coordinator::ShardHandle;

/// Whether a handler stays registered after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerFlow {
    Continue,
    /// Unregister this handler
    Stop,
}

/// What a handler sees besides the event itself
#[derive(Clone)]
pub struct EventContext {
    pub shard_id: u32,
    pub shard_count: u32,
    pub name: EventName,
    pub cache: Arc<Cache>,
    /// Send on any shard's connection
    pub shard: ShardHandle,
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("shard_id", &self.shard_id)
            .field("shard_count", &self.shard_count)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Event handler
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: EventContext, event: Arc<Event>) -> anyhow::Result<ListenerFlow>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(EventContext, Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ListenerFlow>> + Send + 'static,
{
    async fn handle(&self, ctx: EventContext, event: Arc<Event>) -> anyhow::Result<ListenerFlow> {
        (self)(ctx, event).await
    }
}

/// Registration handle, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone)]
struct HandlerEntry {
    id: HandlerId,
    handler: Arc<dyn EventHandler>,
}

/// Handler registry keyed by event name
#[derive(Default)]
pub struct Dispatcher {
    handlers: DashMap<EventName, Vec<HandlerEntry>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async closure
    pub fn register<F, Fut>(&self, name: EventName, handler: F) -> HandlerId
    where
        F: Fn(EventContext, Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ListenerFlow>> + Send + 'static,
    {
        self.register_arc(name, Arc::new(handler))
    }

    pub fn register_handler(&self, name: EventName, handler: impl EventHandler) -> HandlerId {
        self.register_arc(name, Arc::new(handler))
    }

    pub fn register_arc(&self, name: EventName, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(name)
            .or_default()
            .push(HandlerEntry { id, handler });
        debug!(event = %name, handler = id.0, "Handler registered");
        id
    }

    /// Returns `false` if the handler was already gone
    pub fn unregister(&self, name: EventName, id: HandlerId) -> bool {
        let Some(mut entries) = self.handlers.get_mut(&name) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        before != entries.len()
    }

    pub fn handler_count(&self, name: EventName) -> usize {
        self.handlers.get(&name).map_or(0, |entries| entries.len())
    }

    /// Deliver an event to its handlers, in registration order
    ///
    /// The handlers run on a task of their own and the returned handle resolves once
    /// they all finished. The caller never waits on a handler, so a handler may sleep or
    /// await [`Dispatcher::wait_for`] without holding up later events.
    pub fn dispatch(self: &Arc<Self>, ctx: EventContext, event: Arc<Event>) -> JoinHandle<()> {
        // snapshot now so handlers registered afterwards only see later events
        let entries = match self.handlers.get(&ctx.name) {
            Some(entries) => entries.clone(),
            None => Vec::new(),
        };
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.run_handlers(entries, ctx, event).await })
    }

    async fn run_handlers(&self, entries: Vec<HandlerEntry>, ctx: EventContext, event: Arc<Event>) {
        let name = ctx.name;
        for entry in entries {
            let handler = Arc::clone(&entry.handler);
            let ctx = ctx.clone();
            let event = Arc::clone(&event);

            match tokio::spawn(async move { handler.handle(ctx, event).await }).await {
                Ok(Ok(ListenerFlow::Continue)) => {}
                Ok(Ok(ListenerFlow::Stop)) => {
                    self.unregister(name, entry.id);
                }
                Ok(Err(e)) => {
                    error!(event = %name, handler = entry.id.0, error = %e, "Event handler failed");
                }
                Err(e) => {
                    error!(event = %name, handler = entry.id.0, error = %e, "Event handler panicked");
                }
            }
        }
    }

    /// Resolve with the next event of `name` accepted by `predicate`
    ///
    /// The handler is registered before this returns, so no event dispatched afterwards
    /// can be missed. Resolves to `None` if the dispatcher is dropped first.
    pub fn wait_for<P>(&self, name: EventName, predicate: P) -> WaitFor
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.register(name, move |_ctx, event: Arc<Event>| {
            let flow = if predicate(&event) {
                if let Some(tx) = tx.lock().take() {
                    // the waiter may have been dropped
                    let _ = tx.send(event);
                }
                ListenerFlow::Stop
            } else {
                ListenerFlow::Continue
            };
            async move { anyhow::Ok(flow) }
        });
        WaitFor { rx }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("events", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`Dispatcher::wait_for`]
#[derive(Debug)]
pub struct WaitFor {
    rx: oneshot::Receiver<Arc<Event>>,
}

impl Future for WaitFor {
    type Output = Option<Arc<Event>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use chorus_cache::CacheConfig;

    use super::*;

    fn context(name: EventName) -> EventContext {
        EventContext {
            shard_id: 0,
            shard_count: 1,
            name,
            cache: Arc::new(Cache::new(CacheConfig {
                max_messages: 10,
                user_account: false,
            })),
            shard: ShardHandle::detached(1),
        }
    }

    fn ready() -> Arc<Event> {
        Arc::new(Event::Ready { shard_id: 0 })
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let dispatcher = Arc::new(Dispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            dispatcher.register(EventName::Ready, move |_ctx, _event| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(tag);
                    anyhow::Ok(ListenerFlow::Continue)
                }
            });
        }

        dispatcher.dispatch(context(EventName::Ready), ready()).await.unwrap();
        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_stop_unregisters() {
        let dispatcher = Arc::new(Dispatcher::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        dispatcher.register(EventName::Ready, move |_ctx, _event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(ListenerFlow::Stop)
            }
        });

        dispatcher.dispatch(context(EventName::Ready), ready()).await.unwrap();
        dispatcher.dispatch(context(EventName::Ready), ready()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.handler_count(EventName::Ready), 0);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_others() {
        let dispatcher = Arc::new(Dispatcher::new());
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.register(EventName::Ready, |_ctx, _event| async {
            Err::<ListenerFlow, _>(anyhow::anyhow!("boom"))
        });
        dispatcher.register(EventName::Ready, |_ctx, event: Arc<Event>| async move {
            assert!(!matches!(*event, Event::Ready { .. }), "handler panic");
            anyhow::Ok(ListenerFlow::Continue)
        });
        let counter = Arc::clone(&calls);
        dispatcher.register(EventName::Ready, move |_ctx, _event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(ListenerFlow::Continue)
            }
        });

        dispatcher.dispatch(context(EventName::Ready), ready()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.handler_count(EventName::Ready), 3);
    }

    #[tokio::test]
    async fn test_unregister() {
        let dispatcher = Arc::new(Dispatcher::new());
        let id = dispatcher.register(EventName::Connect, |_ctx, _event| async {
            anyhow::Ok(ListenerFlow::Continue)
        });
        assert!(dispatcher.unregister(EventName::Connect, id));
        assert!(!dispatcher.unregister(EventName::Connect, id));
    }

    #[tokio::test]
    async fn test_wait_for_matching_event() {
        let dispatcher = Arc::new(Dispatcher::new());
        let waiter = dispatcher.wait_for(EventName::Ready, |event| {
            matches!(event, Event::Ready { shard_id: 1 })
        });

        dispatcher.dispatch(context(EventName::Ready), ready()).await.unwrap();
        dispatcher
            .dispatch(context(EventName::Ready), Arc::new(Event::Ready { shard_id: 1 }))
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*event, Event::Ready { shard_id: 1 });
        assert_eq!(dispatcher.handler_count(EventName::Ready), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_does_not_wait_for_slow_handlers() {
        let dispatcher = Arc::new(Dispatcher::new());
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&finished);
        dispatcher.register(EventName::Ready, move |_ctx, _event| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(Duration::from_secs(100)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(ListenerFlow::Continue)
            }
        });

        let started = tokio::time::Instant::now();
        let first = dispatcher.dispatch(context(EventName::Ready), ready());
        let second = dispatcher.dispatch(context(EventName::Ready), ready());
        assert_eq!(started.elapsed(), Duration::ZERO);

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 2);
        // both ran side by side
        assert!(started.elapsed() < Duration::from_secs(150));
    }

    #[tokio::test]
    async fn test_handler_can_wait_for_a_later_event() {
        let dispatcher = Arc::new(Dispatcher::new());
        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = Mutex::new(Some(done_tx));

        let inner = Arc::clone(&dispatcher);
        dispatcher.register(EventName::Connect, move |_ctx, _event| {
            let waiter = inner.wait_for(EventName::Ready, |_| true);
            let done = done_tx.lock().take();
            async move {
                let event = waiter.await;
                if let Some(done) = done {
                    let _ = done.send(event);
                }
                anyhow::Ok(ListenerFlow::Stop)
            }
        });

        let connect = Arc::new(Event::Connect { shard_id: 0 });
        let pending = dispatcher.dispatch(context(EventName::Connect), connect);
        // let the Connect handler register its waiter
        while dispatcher.handler_count(EventName::Ready) == 0 {
            tokio::task::yield_now().await;
        }
        dispatcher.dispatch(context(EventName::Ready), ready()).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.as_deref(), Some(&Event::Ready { shard_id: 0 }));
        pending.await.unwrap();
        assert_eq!(dispatcher.handler_count(EventName::Connect), 0);
    }

    #[tokio::test]
    async fn test_wait_for_resolves_none_when_dropped() {
        let dispatcher = Arc::new(Dispatcher::new());
        let waiter = dispatcher.wait_for(EventName::Ready, |_| true);
        drop(dispatcher);
        assert!(waiter.await.is_none());
    }
}
