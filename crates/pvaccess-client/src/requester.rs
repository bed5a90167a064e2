//! Application listener interfaces.
//!
//! Every callback runs on the transport's I/O thread or on the calling application
//! thread, never while the client holds one of its own locks. Listeners may call
//! back into the channel or request that invoked them. A panic inside a listener is
//! caught and reported through [`Requester::message`].

use std::sync::Arc;

use crate::bitset::BitSet;
use crate::channel::Channel;
use crate::channel_state::ConnectionState;
use crate::pvdata::{ArrayHandle, FieldDesc, PvStructure, StructureHandle};
use crate::request::{
    ChannelArray, ChannelGet, ChannelMonitor, ChannelProcess, ChannelPut, ChannelPutGet,
    ChannelRpc,
};
use crate::status::{Status, StatusType};

/// Severity of a free-form message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Informational.
    Info,
    /// Warning.
    Warning,
    /// Error.
    Error,
    /// Fatal error.
    FatalError,
}

impl From<StatusType> for MessageType {
    fn from(kind: StatusType) -> Self {
        match kind {
            StatusType::Ok => MessageType::Info,
            StatusType::Warning => MessageType::Warning,
            StatusType::Error => MessageType::Error,
            StatusType::Fatal => MessageType::FatalError,
        }
    }
}

/// Base of every listener.
pub trait Requester: Send + Sync {
    /// Name used in diagnostics.
    fn requester_name(&self) -> String;

    /// Free-form message sink.
    fn message(&self, message: &str, kind: MessageType);

    /// A status that is not tied to an outstanding operation, such as a disconnect
    /// seen by an idle request.
    fn status_reported(&self, status: &Status) {
        self.message(&status.message, status.kind.into());
    }
}

/// Listener for channel connection state.
pub trait ChannelRequester: Requester {
    /// The channel entered `state`.
    fn channel_state_change(&self, channel: &Channel, state: ConnectionState);
}

/// Listener for a [`ChannelGet`].
pub trait ChannelGetRequester: Requester {
    /// INIT finished. On success `structure` receives every later get.
    fn channel_get_connect(
        &self,
        status: &Status,
        get: &ChannelGet,
        structure: Option<StructureHandle>,
    );

    /// A get finished.
    fn get_done(&self, status: &Status, get: &ChannelGet);
}

/// Listener for a [`ChannelPut`].
pub trait ChannelPutRequester: Requester {
    /// INIT finished. Mark changed fields in the structure's bitmap before `put`.
    fn channel_put_connect(
        &self,
        status: &Status,
        put: &ChannelPut,
        structure: Option<StructureHandle>,
    );

    /// A put finished.
    fn put_done(&self, status: &Status, put: &ChannelPut);

    /// A read-back finished.
    fn get_done(&self, status: &Status, put: &ChannelPut);
}

/// Listener for a [`ChannelArray`].
pub trait ChannelArrayRequester: Requester {
    /// INIT finished.
    fn channel_array_connect(
        &self,
        status: &Status,
        array: &ChannelArray,
        value: Option<ArrayHandle>,
    );

    /// An array get finished.
    fn get_array_done(&self, status: &Status, array: &ChannelArray);

    /// An array put finished.
    fn put_array_done(&self, status: &Status, array: &ChannelArray);

    /// A resize finished.
    fn set_length_done(&self, status: &Status, array: &ChannelArray);
}

/// Listener for a [`ChannelPutGet`].
pub trait ChannelPutGetRequester: Requester {
    /// INIT finished with the put and get structures.
    fn channel_put_get_connect(
        &self,
        status: &Status,
        put_get: &ChannelPutGet,
        put: Option<StructureHandle>,
        get: Option<StructureHandle>,
    );

    /// A put followed by a get finished.
    fn put_get_done(&self, status: &Status, put_get: &ChannelPutGet);

    /// The put structure was fetched.
    fn get_put_done(&self, status: &Status, put_get: &ChannelPutGet);

    /// The get structure was fetched.
    fn get_get_done(&self, status: &Status, put_get: &ChannelPutGet);
}

/// Listener for a [`ChannelProcess`].
pub trait ChannelProcessRequester: Requester {
    /// INIT finished.
    fn channel_process_connect(&self, status: &Status, process: &ChannelProcess);

    /// A process request finished.
    fn process_done(&self, status: &Status, process: &ChannelProcess);
}

/// Listener for a [`ChannelRpc`].
pub trait ChannelRpcRequester: Requester {
    /// INIT finished.
    fn channel_rpc_connect(&self, status: &Status, rpc: &ChannelRpc);

    /// A call finished. `response` is `None` on failure.
    fn request_done(&self, status: &Status, rpc: &ChannelRpc, response: Option<Box<dyn PvStructure>>);
}

/// Listener for a [`ChannelMonitor`].
pub trait MonitorRequester: Requester {
    /// INIT finished. On success `structure` receives every update.
    fn monitor_connect(
        &self,
        status: &Status,
        monitor: &ChannelMonitor,
        structure: Option<StructureHandle>,
    );

    /// An update was written into the structure. Its bitmap marks the changed
    /// fields; `overrun` marks fields that changed more than once since the
    /// previous update.
    fn monitor_event(&self, monitor: &ChannelMonitor, overrun: &BitSet);

    /// The server ended the subscription.
    fn unlisten(&self, monitor: &ChannelMonitor);
}

/// Listener for a get-field query.
pub trait GetFieldRequester: Requester {
    /// The query finished. `field` is `None` on failure.
    fn get_done(&self, status: &Status, field: Option<Arc<dyn FieldDesc>>);
}
