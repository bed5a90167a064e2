//! Client-side channel: a named remote record and the requests multiplexed on it.
//!
//! All decisions are taken by [`ChannelState`] under the channel lock. The
//! resulting effects are carried out here after the lock is released, so no
//! listener, transport or search manager call ever runs while the channel is
//! locked.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use bytes::BufMut;
use tracing::{debug, error, trace, warn};

use crate::channel_state::{ChannelState, ConnectionState, Effect, OwnerCount, SearchDecision};
use crate::context::{ClientContext, TimerHandle};
use crate::error::{ClientError, Result};
use crate::guard;
use crate::protocol::{write_string, Command, MessageWriter};
use crate::pvdata::{lock, PvRequest};
use crate::registry::RequestRegistry;
use crate::request::{
    ArrayOps, ChannelArray, ChannelGet, ChannelGetField, ChannelMonitor, ChannelProcess,
    ChannelPut, ChannelPutGet, ChannelRpc, GetFieldOps, GetOps, Kind, MonitorOps, ProcessOps,
    PutGetOps, PutOps, Request, RpcOps,
};
use crate::requester::{
    ChannelArrayRequester, ChannelGetRequester, ChannelProcessRequester, ChannelPutGetRequester,
    ChannelPutRequester, ChannelRequester, ChannelRpcRequester, GetFieldRequester, MessageType,
    MonitorRequester,
};
use crate::status::Status;
use crate::transport::{Transport, TransportClient, TransportSender};

/// A named remote record.
pub struct Channel {
    id: u32,
    name: String,
    addresses: Vec<SocketAddr>,
    priority: i16,
    requester: Arc<dyn ChannelRequester>,
    context: Weak<dyn ClientContext>,
    self_ref: Weak<Channel>,
    state: Mutex<ChannelState>,
    requests: RequestRegistry,
    owners: OwnerCount,
    create_timer: Mutex<Option<TimerHandle>>,
    search_timer: Mutex<Option<TimerHandle>>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.connection_state())
            .field("requests", &self.requests.len())
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(
        context: Weak<dyn ClientContext>,
        id: u32,
        name: &str,
        requester: Arc<dyn ChannelRequester>,
        priority: i16,
        addresses: Vec<SocketAddr>,
    ) -> Arc<Self> {
        let fixed = addresses.first().copied();
        Arc::new_cyclic(|self_ref| Self {
            id,
            name: name.to_string(),
            addresses,
            priority,
            requester,
            context,
            self_ref: self_ref.clone(),
            state: Mutex::new(ChannelState::new(name, fixed)),
            requests: RequestRegistry::new(),
            owners: OwnerCount::new(),
            create_timer: Mutex::new(None),
            search_timer: Mutex::new(None),
        })
    }

    /// Client-assigned channel id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fixed server addresses, empty when the name is searched for.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// Transport priority.
    pub fn priority(&self) -> i16 {
        self.priority
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.state).connection_state()
    }

    /// Returns true while connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Server-assigned id, meaningful only while connected.
    pub fn server_channel_id(&self) -> u32 {
        lock(&self.state).server_channel_id()
    }

    /// Currently bound transport, if any.
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        lock(&self.state).transport()
    }

    /// Address of the bound server.
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.transport().map(|t| t.remote_address())
    }

    /// Transport to send on, or an error naming why the channel cannot send.
    pub fn check_and_get_transport(&self) -> Result<Arc<dyn Transport>> {
        lock(&self.state).check_and_get_transport()
    }

    /// Number of registered requests.
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Number of owners sharing the channel.
    pub fn owner_count(&self) -> usize {
        self.owners.count()
    }

    /// (Re)starts connecting. A connected channel is left alone.
    pub fn connect(&self) -> Result<()> {
        let effects = lock(&self.state).connect()?;
        self.apply(effects);
        Ok(())
    }

    /// Drops the server-side channel and stops searching. Requests stay
    /// registered and are re-initialised by a later [`Channel::connect`].
    pub fn disconnect(&self) -> Result<()> {
        let effects = lock(&self.state).disconnect()?;
        debug!(channel = %self.name, cid = self.id, "disconnecting");
        self.apply(effects);
        Ok(())
    }

    /// Adds an owner. Each owner must call [`Channel::destroy`] once.
    pub fn acquire(&self) {
        self.owners.acquire();
    }

    /// Releases one owner and destroys the channel once none is left, or
    /// immediately when `force` is set.
    ///
    /// # Errors
    /// [`crate::ClientError::AlreadyDestroyed`] if the channel is already destroyed.
    pub fn destroy(&self, force: bool) -> Result<()> {
        if self.connection_state() == ConnectionState::Destroyed {
            return Err(ClientError::AlreadyDestroyed {
                name: self.name.clone(),
            });
        }
        if !self.owners.release() && !force {
            debug!(channel = %self.name, owners = self.owners.count(), "channel still shared");
            return Ok(());
        }
        let effects = lock(&self.state).destroy()?;
        debug!(channel = %self.name, cid = self.id, requests = self.requests.len(), "destroying channel");
        self.apply(effects);
        Ok(())
    }

    /// A server at `address` answered the search for this channel.
    pub fn search_response(&self, minor_revision: u8, address: SocketAddr) {
        let decision = lock(&self.state).search_response(address);
        match decision {
            SearchDecision::Ignore => {
                trace!(channel = %self.name, addr = %address, "search response ignored");
            }
            SearchDecision::Collision(effects) => self.apply(effects),
            SearchDecision::Acquire => self.acquire_transport(minor_revision, address),
        }
    }

    fn acquire_transport(&self, minor_revision: u8, address: SocketAddr) {
        let (Some(context), Some(me)) = (self.context.upgrade(), self.self_ref.upgrade()) else {
            return;
        };
        let client: Arc<dyn TransportClient> = me;
        match context.get_transport(client, address, minor_revision, self.priority) {
            Ok(transport) => {
                debug!(channel = %self.name, addr = %address, "transport acquired");
                let effects = lock(&self.state).create_channel(transport);
                self.apply(effects);
            }
            Err(e) => {
                warn!(channel = %self.name, addr = %address, error = %e, "failed to acquire transport");
                self.create_channel_failed();
            }
        }
    }

    /// The server confirmed the channel under server id `sid`.
    pub fn connection_completed(&self, sid: u32) {
        let effects = lock(&self.state).connection_completed(sid);
        debug!(channel = %self.name, cid = self.id, sid, "connection completed");
        self.apply(effects);
    }

    /// Creating the channel failed or timed out. Retries per the configured policy.
    pub fn create_channel_failed(&self) {
        let Some(context) = self.context.upgrade() else {
            return;
        };
        let effects = lock(&self.state).create_channel_failed(&context.config().search_retry);
        if !effects.is_empty() {
            warn!(channel = %self.name, cid = self.id, "create channel failed");
        }
        self.apply(effects);
    }

    fn retry_search(&self) {
        lock(&self.search_timer).take();
        let effects = lock(&self.state).retry_search();
        self.apply(effects);
    }

    /// Creates a get request.
    pub fn create_channel_get(
        &self,
        requester: Arc<dyn ChannelGetRequester>,
        pv_request: PvRequest,
    ) -> ChannelGet {
        self.create_request(pv_request, Kind::Get(GetOps::new(requester)), ChannelGet::new)
    }

    /// Creates a monitor. Updates flow only after [`ChannelMonitor::start`].
    pub fn create_monitor(
        &self,
        requester: Arc<dyn MonitorRequester>,
        pv_request: PvRequest,
    ) -> ChannelMonitor {
        self.create_request(
            pv_request,
            Kind::Monitor(MonitorOps::new(requester)),
            ChannelMonitor::new,
        )
    }

    /// Asks the server for the type of `sub_field`, or of the whole channel when
    /// `sub_field` is empty.
    pub fn get_field(
        &self,
        requester: Arc<dyn GetFieldRequester>,
        sub_field: &str,
    ) -> ChannelGetField {
        self.create_request(
            PvRequest::all(),
            Kind::GetField(GetFieldOps::new(requester, sub_field)),
            ChannelGetField::new,
        )
    }

    /// Creates a put request.
    pub fn create_channel_put(
        &self,
        requester: Arc<dyn ChannelPutRequester>,
        pv_request: PvRequest,
    ) -> ChannelPut {
        self.create_request(pv_request, Kind::Put(PutOps::new(requester)), ChannelPut::new)
    }

    /// Creates an array request.
    pub fn create_channel_array(
        &self,
        requester: Arc<dyn ChannelArrayRequester>,
        pv_request: PvRequest,
    ) -> ChannelArray {
        self.create_request(pv_request, Kind::Array(ArrayOps::new(requester)), ChannelArray::new)
    }

    /// Creates a put-get request.
    pub fn create_channel_put_get(
        &self,
        requester: Arc<dyn ChannelPutGetRequester>,
        pv_request: PvRequest,
    ) -> ChannelPutGet {
        self.create_request(
            pv_request,
            Kind::PutGet(PutGetOps::new(requester)),
            ChannelPutGet::new,
        )
    }

    /// Creates a process request.
    pub fn create_channel_process(
        &self,
        requester: Arc<dyn ChannelProcessRequester>,
        pv_request: PvRequest,
    ) -> ChannelProcess {
        self.create_request(
            pv_request,
            Kind::Process(ProcessOps::new(requester)),
            ChannelProcess::new,
        )
    }

    /// Creates an RPC request.
    pub fn create_channel_rpc(
        &self,
        requester: Arc<dyn ChannelRpcRequester>,
        pv_request: PvRequest,
    ) -> ChannelRpc {
        self.create_request(pv_request, Kind::Rpc(RpcOps::new(requester)), ChannelRpc::new)
    }

    fn create_request<H>(
        &self,
        pv_request: PvRequest,
        kind: Kind,
        handle: impl FnOnce(Arc<Request>) -> H,
    ) -> H {
        let context = self.context.upgrade();
        let ioid = context.as_ref().map_or(0, |c| c.generate_ioid());
        let request = Arc::new(Request::new(ioid, self.self_ref.clone(), pv_request, kind));
        let result = handle(Arc::clone(&request));

        let Some(context) = context else {
            request.abandon(&Status::error("client context destroyed"));
            return result;
        };
        let registered = {
            // a destroy either sees the request in its broadcast or rejects it here
            let state = lock(&self.state);
            if state.connection_state() == ConnectionState::Destroyed {
                false
            } else {
                self.requests.register(Arc::clone(&request));
                context.register_response_request(Arc::clone(&request));
                true
            }
        };
        if registered {
            debug!(channel = %self.name, ioid, kind = request.kind_name(), "request created");
            request.start_init();
        } else {
            request.abandon(&Status::channel_destroyed());
        }
        result
    }

    pub(crate) fn unregister_request(&self, ioid: u32) {
        self.requests.unregister(ioid);
        if let Some(context) = self.context.upgrade() {
            context.unregister_response_request(ioid);
        }
    }

    fn report(&self, text: &str, kind: MessageType) {
        match kind {
            MessageType::Info => debug!(channel = %self.name, "{text}"),
            MessageType::Warning => warn!(channel = %self.name, "{text}"),
            MessageType::Error | MessageType::FatalError => error!(channel = %self.name, "{text}"),
        }
        guard::invoke(&*self.requester, "message", || self.requester.message(text, kind));
    }

    pub(crate) fn report_create_failure(&self, status: &Status) {
        self.report(
            &format!("failed to create channel '{}': {}", self.name, status),
            MessageType::from(status.kind),
        );
    }

    fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            trace!(channel = %self.name, effect = ?effect, "applying");
            self.apply_one(effect);
        }
    }

    fn apply_one(&self, effect: Effect) {
        match effect {
            Effect::NotifyState(state) => {
                debug!(channel = %self.name, cid = self.id, state = %state, "state change");
                guard::invoke(&*self.requester, "channel_state_change", || {
                    self.requester.channel_state_change(self, state)
                });
            }
            Effect::FailPendingIo { status, destroy } => {
                if !destroy {
                    self.requests.mark_needs_update();
                }
                for request in self.requests.snapshot() {
                    request.report_status(&status, destroy);
                }
            }
            Effect::Resubscribe(transport) => {
                if !self.requests.take_needs_update() {
                    trace!(channel = %self.name, "no resubscription owed");
                    return;
                }
                for request in self.requests.snapshot() {
                    request.resubscribe(&transport);
                }
            }
            Effect::MarkResubscribe => self.requests.mark_needs_update(),
            Effect::EnqueueCreate(transport) => {
                let sender = Arc::new(ChannelSender::Create {
                    channel: self.self_ref.clone(),
                });
                if let Err(e) = transport.enqueue_send_request(sender) {
                    warn!(channel = %self.name, error = %e, "create channel not sent");
                    self.create_channel_failed();
                }
            }
            Effect::EnqueueDestroy(transport, sid) => {
                let sender = Arc::new(ChannelSender::Destroy { cid: self.id, sid });
                if let Err(e) = transport.enqueue_send_request(sender) {
                    debug!(channel = %self.name, error = %e, "destroy channel not sent");
                }
            }
            Effect::Release(transport) => transport.release(self.id),
            Effect::RegisterSearch => {
                if let (Some(context), Some(me)) = (self.context.upgrade(), self.self_ref.upgrade()) {
                    context.search_manager().register(me);
                }
            }
            Effect::UnregisterSearch => {
                if let Some(context) = self.context.upgrade() {
                    context.search_manager().unregister(self.id);
                }
            }
            Effect::SearchFixed(address) => {
                let minor = self
                    .context
                    .upgrade()
                    .map_or(0, |c| c.config().protocol_minor_revision);
                self.search_response(minor, address);
            }
            Effect::ArmCreateTimer => self.arm_create_timer(),
            Effect::CancelCreateTimer => cancel(&self.create_timer),
            Effect::ScheduleSearch(delay) => {
                let Some(context) = self.context.upgrade() else {
                    return;
                };
                debug!(channel = %self.name, delay_ms = delay.as_millis() as u64, "search retry scheduled");
                let channel = self.self_ref.clone();
                let handle = context.schedule(
                    delay,
                    Box::new(move || {
                        if let Some(channel) = channel.upgrade() {
                            channel.retry_search();
                        }
                    }),
                );
                replace(&self.search_timer, handle);
            }
            Effect::CancelSearchTimer => cancel(&self.search_timer),
            Effect::Message(text, kind) => self.report(&text, kind),
            Effect::UnregisterContext => {
                if let Some(context) = self.context.upgrade() {
                    context.unregister_channel(self.id);
                }
            }
        }
    }

    fn arm_create_timer(&self) {
        let Some(context) = self.context.upgrade() else {
            return;
        };
        let Some(timeout) = context.config().create_channel_timeout() else {
            return;
        };
        let channel = self.self_ref.clone();
        let handle = context.schedule(
            timeout,
            Box::new(move || {
                if let Some(channel) = channel.upgrade() {
                    warn!(channel = %channel.name, "create channel timed out");
                    lock(&channel.create_timer).take();
                    channel.create_channel_failed();
                }
            }),
        );
        replace(&self.create_timer, handle);
    }
}

fn cancel(slot: &Mutex<Option<TimerHandle>>) {
    if let Some(timer) = lock(slot).take() {
        timer.cancel();
    }
}

fn replace(slot: &Mutex<Option<TimerHandle>>, handle: TimerHandle) {
    if let Some(previous) = lock(slot).replace(handle) {
        previous.cancel();
    }
}

impl TransportClient for Channel {
    fn client_id(&self) -> u32 {
        self.id
    }

    fn transport_closed(&self) {
        let effects = lock(&self.state).transport_closed();
        debug!(channel = %self.name, cid = self.id, "transport closed");
        self.apply(effects);
    }

    fn transport_changed(&self) {
        debug!(channel = %self.name, cid = self.id, "transport changed");
    }

    fn transport_responsive(&self, transport: &Arc<dyn Transport>) {
        let effects = lock(&self.state).transport_responsive(transport);
        self.apply(effects);
    }

    fn transport_unresponsive(&self) {
        let effects = lock(&self.state).transport_unresponsive();
        if !effects.is_empty() {
            debug!(channel = %self.name, cid = self.id, "transport unresponsive");
        }
        self.apply(effects);
    }
}

/// Frames the channel's own create and destroy messages.
enum ChannelSender {
    Create { channel: Weak<Channel> },
    Destroy { cid: u32, sid: u32 },
}

impl TransportSender for ChannelSender {
    fn send(&self, control: &mut MessageWriter) {
        match self {
            ChannelSender::Create { channel } => {
                let Some(channel) = channel.upgrade() else {
                    return;
                };
                if channel.connection_state() == ConnectionState::Destroyed {
                    trace!(channel = %channel.name, "destroyed before create was framed");
                    return;
                }
                control.start_message(Command::CreateChannel);
                let buffer = control.buffer();
                buffer.put_u16(1);
                buffer.put_u32(channel.id);
                write_string(buffer, &channel.name);
            }
            ChannelSender::Destroy { cid, sid } => {
                control.start_message(Command::DestroyChannel);
                let buffer = control.buffer();
                buffer.put_u32(*sid);
                buffer.put_u32(*cid);
            }
        }
    }
}
