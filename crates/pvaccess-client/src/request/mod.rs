//! Request life cycle shared by every operation kind.
//!
//! A [`Request`] is created by a channel, registered under its request id, and
//! immediately issues its INIT message. After the INIT response it accepts one
//! operation at a time: an operation call records the QoS of the next message, the
//! transport frames it, and the response is routed back by request id. A
//! disconnect leaves requests registered; the next connection re-issues INIT with
//! the same id. A get-field query is the exception: it is answered once and
//! dropped, never re-issued.
//!
//! Kind-specific behaviour lives behind [`Kind`], one variant per operation kind.

mod array;
mod get;
mod get_field;
mod monitor;
mod process;
mod put;
mod put_get;
mod rpc;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, error, trace};

use crate::channel::Channel;
use crate::error::Result;
use crate::guard;
use crate::protocol::{get_u8, Command, MessageWriter, RequestHeader};
use crate::pvdata::{lock, IntrospectionRegistry, PvRequest};
use crate::qos::QoS;
use crate::requester::MessageType;
use crate::status::Status;
use crate::transport::{Transport, TransportSender};

pub use array::ChannelArray;
pub use get::ChannelGet;
pub use get_field::ChannelGetField;
pub use monitor::ChannelMonitor;
pub use process::ChannelProcess;
pub use put::ChannelPut;
pub use put_get::ChannelPutGet;
pub use rpc::ChannelRpc;

pub(crate) use array::ArrayOps;
pub(crate) use get::GetOps;
pub(crate) use get_field::GetFieldOps;
pub(crate) use monitor::MonitorOps;
pub(crate) use process::ProcessOps;
pub(crate) use put::PutOps;
pub(crate) use put_get::PutGetOps;
pub(crate) use rpc::RpcOps;

/// Message the request owes the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pending {
    Idle,
    Operation(QoS),
    /// Release the server-side request.
    Destroy,
}

#[derive(Debug)]
struct RequestState {
    pending: Pending,
    /// Sent and not yet answered.
    in_flight: Option<QoS>,
    destroyed: bool,
    initialized: bool,
}

/// Layout of a request's messages after the command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// Channel id, request id and QoS byte; INIT carries the pvRequest.
    Qos,
    /// Channel id and request id only; answered once, without a QoS byte.
    Plain,
}

/// Behaviour that differs between operation kinds.
pub(crate) trait RequestOps: Send + Sync {
    fn command(&self) -> Command;

    fn kind_name(&self) -> &'static str;

    fn framing(&self) -> Framing {
        Framing::Qos
    }

    /// Whether a response to `qos` starts with a status.
    fn response_has_status(&self, _qos: QoS) -> bool {
        true
    }

    /// Appends the payload of a non-INIT message, or of every message under
    /// [`Framing::Plain`].
    fn write_operation(&self, qos: QoS, buf: &mut BytesMut, registry: &dyn IntrospectionRegistry);

    /// Handles the INIT response. Must call [`Request::mark_initialized`] before
    /// notifying the listener of success.
    fn init_response(
        &self,
        request: &Arc<Request>,
        registry: &dyn IntrospectionRegistry,
        payload: &mut Bytes,
        status: &Status,
    ) -> Result<()>;

    /// Handles an operation response, including the data part of a DESTROY reply.
    fn normal_response(
        &self,
        request: &Arc<Request>,
        qos: QoS,
        registry: &dyn IntrospectionRegistry,
        payload: &mut Bytes,
        status: &Status,
    ) -> Result<()>;

    /// Reports `status` on the callback that completes the message `qos`.
    fn fail(&self, request: &Arc<Request>, qos: QoS, status: &Status);

    fn status_reported(&self, status: &Status);

    fn message(&self, text: &str, kind: MessageType);
}

/// Operation kind of a request.
pub(crate) enum Kind {
    Get(GetOps),
    GetField(GetFieldOps),
    Monitor(MonitorOps),
    Put(PutOps),
    Array(ArrayOps),
    PutGet(PutGetOps),
    Process(ProcessOps),
    Rpc(RpcOps),
}

impl Kind {
    fn ops(&self) -> &dyn RequestOps {
        match self {
            Kind::Get(ops) => ops,
            Kind::GetField(ops) => ops,
            Kind::Monitor(ops) => ops,
            Kind::Put(ops) => ops,
            Kind::Array(ops) => ops,
            Kind::PutGet(ops) => ops,
            Kind::Process(ops) => ops,
            Kind::Rpc(ops) => ops,
        }
    }
}

/// One request object multiplexed over its channel.
pub struct Request {
    ioid: u32,
    channel: Weak<Channel>,
    pv_request: PvRequest,
    state: Mutex<RequestState>,
    kind: Kind,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("ioid", &self.ioid)
            .field("kind", &self.kind.ops().kind_name())
            .field("state", &*self.lock_state())
            .finish()
    }
}

impl Request {
    pub(crate) fn new(ioid: u32, channel: Weak<Channel>, pv_request: PvRequest, kind: Kind) -> Self {
        Self {
            ioid,
            channel,
            pv_request,
            state: Mutex::new(RequestState {
                pending: Pending::Idle,
                in_flight: None,
                destroyed: false,
                initialized: false,
            }),
            kind,
        }
    }

    /// Request id.
    pub fn ioid(&self) -> u32 {
        self.ioid
    }

    /// Operation kind name.
    pub fn kind_name(&self) -> &'static str {
        self.kind.ops().kind_name()
    }

    /// Returns true once the request has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.lock_state().destroyed
    }

    /// Returns true once the INIT round trip has completed on the current
    /// connection.
    pub fn is_initialized(&self) -> bool {
        self.lock_state().initialized
    }

    /// Owning channel, if it still exists.
    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.upgrade()
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.kind
    }

    fn lock_state(&self) -> MutexGuard<'_, RequestState> {
        lock(&self.state)
    }

    /// Single-flight gate: records `qos` as the next message unless one is
    /// already owed or the request is destroyed.
    pub(crate) fn start_request(&self, qos: QoS) -> bool {
        let mut state = self.lock_state();
        if state.destroyed || state.pending != Pending::Idle {
            return false;
        }
        if qos.is_set(QoS::INIT) {
            state.initialized = false;
        }
        state.pending = Pending::Operation(qos);
        true
    }

    /// Clears an operation that was recorded but never framed.
    pub(crate) fn stop_request(&self) {
        let mut state = self.lock_state();
        if matches!(state.pending, Pending::Operation(_)) {
            state.pending = Pending::Idle;
        }
    }

    pub(crate) fn mark_initialized(&self) {
        self.lock_state().initialized = true;
    }

    /// Starts an application operation. On failure the returned status must be
    /// reported on the operation's completion callback.
    pub(crate) fn issue<F>(self: &Arc<Self>, qos: QoS, prepare: F) -> std::result::Result<(), Status>
    where
        F: FnOnce(),
    {
        let initialized = {
            let state = self.lock_state();
            if state.destroyed {
                return Err(Status::request_destroyed());
            }
            state.initialized
        };
        if !initialized {
            return Err(self.uninitialized_status());
        }
        {
            let mut state = self.lock_state();
            if state.destroyed {
                return Err(Status::request_destroyed());
            }
            if !state.initialized {
                drop(state);
                return Err(self.uninitialized_status());
            }
            if state.pending != Pending::Idle {
                return Err(Status::other_request_pending());
            }
            state.pending = Pending::Operation(qos);
        }
        prepare();

        let transport = match self.channel.upgrade().map(|c| c.check_and_get_transport()) {
            Some(Ok(transport)) => transport,
            _ => {
                self.stop_request();
                return Err(Status::channel_not_connected());
            }
        };
        debug!(ioid = self.ioid, qos = ?qos, kind = self.kind_name(), "issuing request");
        if let Err(e) = transport.enqueue_send_request(Arc::clone(self) as Arc<dyn TransportSender>) {
            debug!(ioid = self.ioid, error = %e, "enqueue failed");
            self.stop_request();
            return Err(Status::send_failed());
        }
        Ok(())
    }

    /// A request without a completed INIT is waiting for its channel when the
    /// channel has no connection. Never called with the request lock held.
    fn uninitialized_status(&self) -> Status {
        match self.channel.upgrade().map(|c| c.is_connected()) {
            Some(true) => Status::not_initialized(),
            _ => Status::channel_not_connected(),
        }
    }

    /// Issues the INIT message for a freshly created request. A request created
    /// while its channel is not connected reports that on its connect callback
    /// and waits for the next resubscription.
    pub(crate) fn start_init(self: &Arc<Self>) {
        let transport = match self.channel.upgrade().map(|c| c.check_and_get_transport()) {
            Some(Ok(transport)) => transport,
            _ => {
                self.fail(QoS::INIT, &Status::channel_not_connected());
                return;
            }
        };
        self.resubscribe(&transport);
    }

    /// Re-issues INIT on `transport`, keeping the request id.
    pub(crate) fn resubscribe(self: &Arc<Self>, transport: &Arc<dyn Transport>) {
        if !self.start_request(QoS::INIT) {
            trace!(ioid = self.ioid, "INIT skipped, request busy or destroyed");
            return;
        }
        debug!(ioid = self.ioid, kind = self.kind_name(), "sending INIT");
        if let Err(e) = transport.enqueue_send_request(Arc::clone(self) as Arc<dyn TransportSender>) {
            debug!(ioid = self.ioid, error = %e, "INIT enqueue failed");
            self.stop_request();
            self.fail(QoS::INIT, &Status::send_failed());
        }
    }

    /// Marks the request destroyed without a server round trip and reports
    /// `status` on the connect callback.
    pub(crate) fn abandon(self: &Arc<Self>, status: &Status) {
        {
            let mut state = self.lock_state();
            state.destroyed = true;
            state.pending = Pending::Idle;
        }
        self.fail(QoS::INIT, status);
    }

    pub(crate) fn fail(self: &Arc<Self>, qos: QoS, status: &Status) {
        self.kind.ops().fail(self, qos, status);
    }

    /// Broadcast from the channel: the connection was lost (`destroy == false`) or
    /// the channel is going away (`destroy == true`). Exactly one listener call is
    /// made per request.
    pub(crate) fn report_status(self: &Arc<Self>, status: &Status, destroy: bool) {
        let outstanding = {
            let mut state = self.lock_state();
            if state.destroyed {
                return;
            }
            let outstanding = match state.pending {
                Pending::Operation(qos) => Some(qos),
                _ => state.in_flight,
            };
            state.pending = Pending::Idle;
            state.in_flight = None;
            state.initialized = false;
            if destroy {
                state.destroyed = true;
            }
            outstanding
        };
        if destroy {
            self.unregister();
        }
        match outstanding {
            Some(qos) => self.fail(qos, status),
            None => {
                let ops = self.kind.ops();
                guard::invoke(&OpsSink(ops), "status_reported", || ops.status_reported(status));
            }
        }
    }

    /// Destroys the request. Idempotent. An initialised request on a connected
    /// channel also asks the server to release its state.
    pub fn destroy(self: &Arc<Self>) {
        let (outstanding, release_remote) = {
            let mut state = self.lock_state();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            let outstanding = match state.pending {
                Pending::Operation(qos) => Some(qos),
                _ => state.in_flight,
            };
            state.in_flight = None;
            let release_remote = state.initialized;
            state.pending = if release_remote {
                Pending::Destroy
            } else {
                Pending::Idle
            };
            (outstanding, release_remote)
        };
        debug!(ioid = self.ioid, kind = self.kind_name(), "destroying request");
        self.unregister();

        if release_remote {
            if let Some(Ok(transport)) = self.channel.upgrade().map(|c| c.check_and_get_transport()) {
                if let Err(e) = transport.enqueue_send_request(Arc::clone(self) as Arc<dyn TransportSender>) {
                    debug!(ioid = self.ioid, error = %e, "destroy request not sent");
                }
            }
        }
        if let Some(qos) = outstanding {
            self.fail(qos, &Status::request_destroyed());
        }
    }

    fn unregister(&self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.unregister_request(self.ioid);
        }
    }

    /// Handles a response addressed to this request. The payload starts after the
    /// request id. Malformed payloads and panicking listeners are reported through
    /// the listener's message sink and the response is dropped.
    pub(crate) fn response(self: &Arc<Self>, transport: &Arc<dyn Transport>, payload: &mut Bytes) {
        let ops = self.kind.ops();
        let mut outcome = Ok(());
        let completed = guard::invoke(&OpsSink(ops), "response", || {
            outcome = self.handle_response(transport, payload);
        });
        if !completed {
            return;
        }
        if let Err(e) = outcome {
            error!(ioid = self.ioid, kind = self.kind_name(), error = %e, "dropping response");
            let text = format!("failed to process {} response: {e}", self.kind_name());
            guard::invoke(&OpsSink(ops), "message", || {
                ops.message(&text, MessageType::FatalError)
            });
        }
    }

    fn handle_response(self: &Arc<Self>, transport: &Arc<dyn Transport>, payload: &mut Bytes) -> Result<()> {
        let ops = self.kind.ops();
        let qos = match ops.framing() {
            Framing::Qos => QoS::from_bits(get_u8(payload)?),
            Framing::Plain => QoS::INIT,
        };
        let status = if ops.response_has_status(qos) {
            Status::deserialize(payload)?
        } else {
            Status::ok()
        };
        {
            let mut state = self.lock_state();
            if state.destroyed {
                debug!(ioid = self.ioid, qos = ?qos, "response for destroyed request");
                return Ok(());
            }
            state.in_flight = None;
        }
        trace!(ioid = self.ioid, qos = ?qos, status = %status, "response");

        let registry = transport.introspection();
        if qos.is_set(QoS::INIT) {
            ops.init_response(self, registry.as_ref(), payload, &status)
        } else if qos.is_set(QoS::DESTROY) {
            let result = ops.normal_response(self, qos, registry.as_ref(), payload, &status);
            self.release_local();
            result
        } else {
            ops.normal_response(self, qos, registry.as_ref(), payload, &status)
        }
    }

    /// Drops the request without a callback or a server message, for requests
    /// the server holds no state for.
    fn release_local(&self) {
        {
            let mut state = self.lock_state();
            state.destroyed = true;
            state.pending = Pending::Idle;
        }
        self.unregister();
    }
}

impl TransportSender for Request {
    fn send(&self, control: &mut MessageWriter) {
        let pending = self.lock_state().pending;
        let Some(channel) = self.channel.upgrade() else {
            trace!(ioid = self.ioid, "channel gone, nothing sent");
            return;
        };
        match pending {
            Pending::Idle => trace!(ioid = self.ioid, "nothing pending"),
            Pending::Destroy => {
                control.start_message(Command::DestroyRequest);
                control.buffer().put_u32(channel.server_channel_id());
                control.buffer().put_u32(self.ioid);
                let mut state = self.lock_state();
                if state.pending == Pending::Destroy {
                    state.pending = Pending::Idle;
                }
            }
            Pending::Operation(qos) => {
                let Some(transport) = channel.transport() else {
                    debug!(ioid = self.ioid, "channel lost its transport before send");
                    self.stop_request();
                    return;
                };
                let registry = transport.introspection();
                let ops = self.kind.ops();
                control.start_message(ops.command());
                match ops.framing() {
                    Framing::Qos => {
                        RequestHeader {
                            server_channel_id: channel.server_channel_id(),
                            ioid: self.ioid,
                            qos,
                        }
                        .write(control.buffer());
                        if qos.is_set(QoS::INIT) {
                            registry.serialize_request(control.buffer(), &self.pv_request);
                        } else {
                            ops.write_operation(qos, control.buffer(), registry.as_ref());
                        }
                    }
                    Framing::Plain => {
                        control.buffer().put_u32(channel.server_channel_id());
                        control.buffer().put_u32(self.ioid);
                        ops.write_operation(qos, control.buffer(), registry.as_ref());
                    }
                }
                trace!(ioid = self.ioid, qos = ?qos, "framed");

                let mut state = self.lock_state();
                if state.pending == pending {
                    state.pending = Pending::Idle;
                    state.in_flight = Some(qos);
                }
            }
        }
    }
}

/// Adapts a kind's message sink to the [`crate::Requester`] interface used by the
/// panic guard.
struct OpsSink<'a>(&'a dyn RequestOps);

impl crate::requester::Requester for OpsSink<'_> {
    fn requester_name(&self) -> String {
        self.0.kind_name().to_string()
    }

    fn message(&self, message: &str, kind: MessageType) {
        self.0.message(message, kind);
    }
}

/// Runs `callback` on a listener under the panic guard.
pub(crate) fn notify<R, F>(requester: &R, what: &str, callback: F)
where
    R: crate::requester::Requester + ?Sized,
    F: FnOnce(&R),
{
    guard::invoke(requester, what, || callback(requester));
}
