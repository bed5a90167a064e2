#![warn(missing_docs)]

//! pvAccess client core: channel connection state machine, request life cycle and
//! request/transport multiplexing.
//!
//! A [`Context`] owns channels. A [`Channel`] searches for its server, binds a shared
//! [`Transport`], and multiplexes any number of requests (get, put, array, put-get,
//! process, RPC, monitor, get-field) over it. Every request is demultiplexed by its
//! request id and survives transport loss through resubscription.

pub mod bitset;
pub mod channel;
pub mod channel_state;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod pvdata;
pub mod qos;
pub mod registry;
pub mod request;
pub mod requester;
pub mod retry;
pub mod search;
pub mod status;
pub mod transport;

mod guard;

pub use bitset::BitSet;
pub use channel::Channel;
pub use channel_state::ConnectionState;
pub use config::ClientConfig;
pub use context::{ClientContext, Context, TimerHandle};
pub use dispatch::ResponseDispatcher;
pub use error::{ClientError, Result};
pub use protocol::{Command, MessageHeader, MessageReader, MessageWriter};
pub use pvdata::{
    ArrayHandle, FieldDesc, IntrospectionRegistry, PvArray, PvRequest, PvStructure,
    StructureData, StructureHandle,
};
pub use qos::QoS;
pub use request::{
    ChannelArray, ChannelGet, ChannelGetField, ChannelMonitor, ChannelProcess, ChannelPut,
    ChannelPutGet, ChannelRpc,
};
pub use requester::{
    ChannelArrayRequester, ChannelGetRequester, ChannelProcessRequester, ChannelPutGetRequester,
    ChannelPutRequester, ChannelRequester, ChannelRpcRequester, GetFieldRequester, MessageType,
    MonitorRequester, Requester,
};
pub use retry::RetryPolicy;
pub use search::SearchManager;
pub use status::{Status, StatusType};
pub use transport::{Transport, TransportClient, TransportProvider, TransportSender};
