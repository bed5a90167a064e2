//! Client context: channel registry, request-id map, id generation and timers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::{ClientConfig, PRIORITY_MAX, PRIORITY_MIN};
use crate::error::{ClientError, Result};
use crate::pvdata::lock;
use crate::request::Request;
use crate::requester::ChannelRequester;
use crate::search::SearchManager;
use crate::transport::{Transport, TransportClient, TransportProvider};

/// Services a channel needs from its owning context.
pub trait ClientContext: Send + Sync {
    /// Active configuration.
    fn config(&self) -> &ClientConfig;

    /// Name resolution service.
    fn search_manager(&self) -> Arc<dyn SearchManager>;

    /// Acquires a transport from the pool.
    fn get_transport(
        &self,
        client: Arc<dyn TransportClient>,
        address: SocketAddr,
        minor_revision: u8,
        priority: i16,
    ) -> Result<Arc<dyn Transport>>;

    /// Forgets the channel with client id `channel_id`.
    fn unregister_channel(&self, channel_id: u32);

    /// Returns a request id that is not currently registered.
    fn generate_ioid(&self) -> u32;

    /// Makes `request` reachable by its id for response dispatch.
    fn register_response_request(&self, request: Arc<Request>);

    /// Removes the request with id `ioid` from response dispatch.
    fn unregister_response_request(&self, ioid: u32);

    /// Runs `task` once after `delay` unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> TimerHandle;
}

/// Handle to a scheduled task.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TimerHandle {
    /// Prevents the task from running. No effect once it has run.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Returns true once [`TimerHandle::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Default [`ClientContext`] implementation.
pub struct Context {
    config: ClientConfig,
    transports: Arc<dyn TransportProvider>,
    search: Arc<dyn SearchManager>,
    channels: Mutex<HashMap<u32, Arc<Channel>>>,
    requests: Mutex<HashMap<u32, Arc<Request>>>,
    last_cid: AtomicU32,
    last_ioid: AtomicU32,
    destroyed: AtomicBool,
}

impl Context {
    /// Creates a context.
    ///
    /// # Arguments
    /// * `config` - Validated client configuration.
    /// * `transports` - Transport pool used to reach servers.
    /// * `search` - Name resolution service.
    pub fn new(
        config: ClientConfig,
        transports: Arc<dyn TransportProvider>,
        search: Arc<dyn SearchManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            transports,
            search,
            channels: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            last_cid: AtomicU32::new(0),
            last_ioid: AtomicU32::new(0),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Creates a channel and starts connecting it.
    ///
    /// # Arguments
    /// * `name` - Channel name to resolve.
    /// * `requester` - Receives connection state changes and messages.
    /// * `priority` - Transport priority, or the configured default.
    /// * `addresses` - Fixed server addresses. When empty the name is searched for.
    ///
    /// # Returns
    /// The new channel, or an error if the arguments are invalid or the context is
    /// destroyed.
    pub fn create_channel(
        self: &Arc<Self>,
        name: &str,
        requester: Arc<dyn ChannelRequester>,
        priority: Option<i16>,
        addresses: Vec<SocketAddr>,
    ) -> Result<Arc<Channel>> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ClientError::ContextGone);
        }
        if name.is_empty() {
            return Err(ClientError::InvalidRequest {
                request: name.to_string(),
                reason: "empty channel name".to_string(),
            });
        }
        let priority = priority.unwrap_or(self.config.default_priority);
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
            return Err(ClientError::Config {
                reason: format!("priority {priority} outside {PRIORITY_MIN}..={PRIORITY_MAX}"),
            });
        }

        let context: Weak<dyn ClientContext> = Arc::downgrade(self) as Weak<dyn ClientContext>;
        let channel = {
            let mut channels = lock(&self.channels);
            let cid = next_free_id(&self.last_cid, |id| channels.contains_key(&id));
            let channel = Channel::new(context, cid, name, requester, priority, addresses);
            channels.insert(cid, Arc::clone(&channel));
            channel
        };
        debug!(channel = %name, cid = channel.id(), priority, "channel created");
        channel.connect()?;
        Ok(channel)
    }

    /// Looks up a channel by client id.
    pub fn channel(&self, cid: u32) -> Option<Arc<Channel>> {
        lock(&self.channels).get(&cid).cloned()
    }

    /// Looks up a registered request by id.
    pub fn response_request(&self, ioid: u32) -> Option<Arc<Request>> {
        lock(&self.requests).get(&ioid).cloned()
    }

    /// Number of live channels.
    pub fn channel_count(&self) -> usize {
        lock(&self.channels).len()
    }

    /// Number of requests reachable for response dispatch.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Returns true once [`Context::destroy`] was called.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Force-destroys every channel. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let channels: Vec<Arc<Channel>> = lock(&self.channels).values().cloned().collect();
        info!(channels = channels.len(), "destroying client context");
        for channel in channels {
            if let Err(e) = channel.destroy(true) {
                debug!(channel = %channel.name(), error = %e, "channel already gone");
            }
        }
    }
}

impl ClientContext for Context {
    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn search_manager(&self) -> Arc<dyn SearchManager> {
        Arc::clone(&self.search)
    }

    fn get_transport(
        &self,
        client: Arc<dyn TransportClient>,
        address: SocketAddr,
        minor_revision: u8,
        priority: i16,
    ) -> Result<Arc<dyn Transport>> {
        self.transports
            .get_transport(client, address, minor_revision, priority)
    }

    fn unregister_channel(&self, channel_id: u32) {
        lock(&self.channels).remove(&channel_id);
    }

    fn generate_ioid(&self) -> u32 {
        let requests = lock(&self.requests);
        next_free_id(&self.last_ioid, |id| requests.contains_key(&id))
    }

    fn register_response_request(&self, request: Arc<Request>) {
        lock(&self.requests).insert(request.ioid(), request);
    }

    fn unregister_response_request(&self, ioid: u32) {
        lock(&self.requests).remove(&ioid);
    }

    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let run = move || {
            if !flag.load(Ordering::Acquire) {
                task();
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let task = runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    run();
                });
                TimerHandle {
                    cancelled,
                    task: Some(task),
                }
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("pva-timer".to_string())
                    .spawn(move || {
                        std::thread::sleep(delay);
                        run();
                    });
                if let Err(e) = spawned {
                    warn!(error = %e, "failed to start timer thread");
                }
                TimerHandle {
                    cancelled,
                    task: None,
                }
            }
        }
    }
}

/// Advances `counter` to the next id for which `taken` is false. Zero is skipped.
fn next_free_id(counter: &AtomicU32, taken: impl Fn(u32) -> bool) -> u32 {
    loop {
        let id = counter.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        if id != 0 && !taken(id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_next_free_id_skips_taken_and_zero() {
        let counter = AtomicU32::new(u32::MAX - 1);
        let id = next_free_id(&counter, |id| id == u32::MAX);
        assert_eq!(id, 1);
        assert_eq!(next_free_id(&counter, |_| false), 2);
    }

    struct NoTransports;

    impl TransportProvider for NoTransports {
        fn get_transport(
            &self,
            _client: Arc<dyn TransportClient>,
            _address: SocketAddr,
            _minor_revision: u8,
            _priority: i16,
        ) -> Result<Arc<dyn Transport>> {
            Err(ClientError::Transport {
                reason: "no transports".into(),
            })
        }
    }

    struct NoSearch;

    impl SearchManager for NoSearch {
        fn register(&self, _channel: Arc<Channel>) {}
        fn unregister(&self, _channel_id: u32) {}
    }

    fn context() -> Arc<Context> {
        Context::new(
            ClientConfig::default(),
            Arc::new(NoTransports),
            Arc::new(NoSearch),
        )
    }

    #[test]
    fn test_schedule_without_runtime_runs_on_thread() {
        let ctx = context();
        let (tx, rx) = mpsc::channel();
        ctx.schedule(
            Duration::from_millis(1),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_cancelled_task_does_not_run() {
        let ctx = context();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = ctx.schedule(
            Duration::from_millis(50),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_on_runtime_uses_tokio_timer() {
        let ctx = context();
        let (tx, rx) = mpsc::channel();
        ctx.schedule(
            Duration::from_secs(30),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_generate_ioid_is_unique_while_registered() {
        let ctx = context();
        let a = ctx.generate_ioid();
        let b = ctx.generate_ioid();
        assert_ne!(a, b);
    }

    #[test]
    fn test_create_channel_validates_arguments() {
        struct Quiet;
        impl crate::requester::Requester for Quiet {
            fn requester_name(&self) -> String {
                "quiet".into()
            }
            fn message(&self, _message: &str, _kind: crate::requester::MessageType) {}
        }
        impl ChannelRequester for Quiet {
            fn channel_state_change(&self, _channel: &Channel, _state: crate::ConnectionState) {}
        }

        let ctx = context();
        assert!(matches!(
            ctx.create_channel("", Arc::new(Quiet), None, Vec::new()),
            Err(ClientError::InvalidRequest { .. })
        ));
        assert!(matches!(
            ctx.create_channel("foo", Arc::new(Quiet), Some(100), Vec::new()),
            Err(ClientError::Config { .. })
        ));
        let channel = ctx.create_channel("foo", Arc::new(Quiet), None, Vec::new()).unwrap();
        assert_eq!(ctx.channel(channel.id()).map(|c| c.id()), Some(channel.id()));

        ctx.destroy();
        assert_eq!(ctx.channel_count(), 0);
        assert!(matches!(
            ctx.create_channel("bar", Arc::new(Quiet), None, Vec::new()),
            Err(ClientError::ContextGone)
        ));
    }
}
