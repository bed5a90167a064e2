use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use super::{notify, Request, RequestOps};
use crate::error::Result;
use crate::protocol::Command;
use crate::pvdata::IntrospectionRegistry;
use crate::qos::QoS;
use crate::requester::{ChannelProcessRequester, MessageType};
use crate::status::Status;

/// Asks the server to process the record behind the channel.
#[derive(Clone)]
pub struct ChannelProcess {
    request: Arc<Request>,
}

impl ChannelProcess {
    pub(crate) fn new(request: Arc<Request>) -> Self {
        Self { request }
    }

    /// Processes the record once. `last` also releases the request.
    pub fn process(&self, last: bool) {
        let qos = QoS::DEFAULT.with_if(last, QoS::DESTROY);
        if let Err(status) = self.request.issue(qos, || {}) {
            self.request.fail(qos, &status);
        }
    }

    /// Destroys the request.
    pub fn destroy(&self) {
        self.request.destroy();
    }

    /// The underlying request.
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }
}

pub(crate) struct ProcessOps {
    requester: Arc<dyn ChannelProcessRequester>,
}

impl ProcessOps {
    pub(crate) fn new(requester: Arc<dyn ChannelProcessRequester>) -> Self {
        Self { requester }
    }

    fn connect(&self, request: &Arc<Request>, status: &Status) {
        let handle = ChannelProcess::new(Arc::clone(request));
        notify(&*self.requester, "channel_process_connect", |r| {
            r.channel_process_connect(status, &handle)
        });
    }

    fn done(&self, request: &Arc<Request>, status: &Status) {
        let handle = ChannelProcess::new(Arc::clone(request));
        notify(&*self.requester, "process_done", |r| r.process_done(status, &handle));
    }
}

impl RequestOps for ProcessOps {
    fn command(&self) -> Command {
        Command::Process
    }

    fn kind_name(&self) -> &'static str {
        "process"
    }

    fn write_operation(&self, _qos: QoS, _buf: &mut BytesMut, _registry: &dyn IntrospectionRegistry) {}

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
        self.connect(request, status);
        Ok(())
    }

    fn normal_response(
        &self,
        request: &Arc<Request>,
        _qos: QoS,
        _registry: &dyn IntrospectionRegistry,
        _payload: &mut Bytes,
        status: &Status,
    ) -> Result<()> {
        self.done(request, status);
        Ok(())
    }

    fn fail(&self, request: &Arc<Request>, qos: QoS, status: &Status) {
        if qos.is_set(QoS::INIT) {
            self.connect(request, status);
        } else {
            self.done(request, status);
        }
    }

    fn status_reported(&self, status: &Status) {
        self.requester.status_reported(status);
    }

    fn message(&self, text: &str, kind: MessageType) {
        self.requester.message(text, kind);
    }
}
