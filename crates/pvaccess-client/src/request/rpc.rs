use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use super::{notify, Request, RequestOps};
use crate::error::Result;
use crate::protocol::Command;
use crate::pvdata::{lock, IntrospectionRegistry, PvStructure};
use crate::qos::QoS;
use crate::requester::{ChannelRpcRequester, MessageType};
use crate::status::Status;

/// Remote procedure call: sends an argument structure, receives a result
/// structure whose type is only known on arrival.
#[derive(Clone)]
pub struct ChannelRpc {
    request: Arc<Request>,
}

impl ChannelRpc {
    pub(crate) fn new(request: Arc<Request>) -> Self {
        Self { request }
    }

    /// Sends `argument` with its full type description.
    pub fn request(&self, argument: Box<dyn PvStructure>, last: bool) {
        let qos = QoS::DEFAULT.with_if(last, QoS::DESTROY);
        let result = self.request.issue(qos, || {
            if let super::Kind::Rpc(ops) = self.request.kind() {
                *lock(&ops.argument) = Some(argument);
            }
        });
        if let Err(status) = result {
            self.request.fail(qos, &status);
        }
    }

    /// Destroys the request.
    pub fn destroy(&self) {
        self.request.destroy();
    }

    /// The underlying request. The other handles call this `request()`; here
    /// that name belongs to the RPC operation itself.
    pub fn inner(&self) -> &Arc<Request> {
        &self.request
    }
}

pub(crate) struct RpcOps {
    requester: Arc<dyn ChannelRpcRequester>,
    argument: Mutex<Option<Box<dyn PvStructure>>>,
}

impl RpcOps {
    pub(crate) fn new(requester: Arc<dyn ChannelRpcRequester>) -> Self {
        Self {
            requester,
            argument: Mutex::new(None),
        }
    }

    fn done(&self, request: &Arc<Request>, status: &Status, response: Option<Box<dyn PvStructure>>) {
        let handle = ChannelRpc::new(Arc::clone(request));
        notify(&*self.requester, "request_done", |r| {
            r.request_done(status, &handle, response)
        });
    }
}

impl RequestOps for RpcOps {
    fn command(&self) -> Command {
        Command::Rpc
    }

    fn kind_name(&self) -> &'static str {
        "rpc"
    }

    fn write_operation(&self, _qos: QoS, buf: &mut BytesMut, registry: &dyn IntrospectionRegistry) {
        if let Some(argument) = lock(&self.argument).take() {
            registry.serialize_structure_full(buf, argument.as_ref());
        }
    }

    fn init_response(
        &self,
        request: &Arc<Request>,
        _registry: &dyn IntrospectionRegistry,
        _payload: &mut Bytes,
        status: &Status,
    ) -> Result<()> {
        if status.is_success() {
            request.mark_initialized();
        }
        let handle = ChannelRpc::new(Arc::clone(request));
        notify(&*self.requester, "channel_rpc_connect", |r| {
            r.channel_rpc_connect(status, &handle)
        });
        Ok(())
    }

    fn normal_response(
        &self,
        request: &Arc<Request>,
        _qos: QoS,
        registry: &dyn IntrospectionRegistry,
        payload: &mut Bytes,
        status: &Status,
    ) -> Result<()> {
        let response = if status.is_success() {
            Some(registry.deserialize_structure_full(payload)?)
        } else {
            None
        };
        self.done(request, status, response);
        Ok(())
    }

    fn fail(&self, request: &Arc<Request>, qos: QoS, status: &Status) {
        if qos.is_set(QoS::INIT) {
            let handle = ChannelRpc::new(Arc::clone(request));
            notify(&*self.requester, "channel_rpc_connect", |r| {
                r.channel_rpc_connect(status, &handle)
            });
        } else {
            self.done(request, status, None);
        }
    }

    fn status_reported(&self, status: &Status) {
        self.requester.status_reported(status);
    }

    fn message(&self, text: &str, kind: MessageType) {
        self.requester.message(text, kind);
    }
}
