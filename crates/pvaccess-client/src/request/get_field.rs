use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::warn;

use super::{notify, Framing, Request, RequestOps};
use crate::error::Result;
use crate::protocol::{write_string, Command};
use crate::pvdata::IntrospectionRegistry;
use crate::qos::QoS;
use crate::requester::{GetFieldRequester, MessageType};
use crate::status::Status;

/// One-shot query for the type of a channel field. The request is sent on
/// creation and released once [`GetFieldRequester::get_done`] has run; it is
/// not re-issued after a reconnect.
#[derive(Clone)]
pub struct ChannelGetField {
    request: Arc<Request>,
}

impl ChannelGetField {
    pub(crate) fn new(request: Arc<Request>) -> Self {
        Self { request }
    }

    /// Abandons the query. A pending answer is reported as destroyed.
    pub fn destroy(&self) {
        self.request.destroy();
    }

    /// The underlying request.
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }
}

pub(crate) struct GetFieldOps {
    requester: Arc<dyn GetFieldRequester>,
    sub_field: String,
}

impl GetFieldOps {
    /// An empty `sub_field` asks for the whole channel type.
    pub(crate) fn new(requester: Arc<dyn GetFieldRequester>, sub_field: impl Into<String>) -> Self {
        Self {
            requester,
            sub_field: sub_field.into(),
        }
    }
}

impl RequestOps for GetFieldOps {
    fn command(&self) -> Command {
        Command::GetField
    }

    fn kind_name(&self) -> &'static str {
        "get_field"
    }

    fn framing(&self) -> Framing {
        Framing::Plain
    }

    fn write_operation(&self, _qos: QoS, buf: &mut BytesMut, _registry: &dyn IntrospectionRegistry) {
        write_string(buf, &self.sub_field);
    }

    fn init_response(
        &self,
        request: &Arc<Request>,
        registry: &dyn IntrospectionRegistry,
        payload: &mut Bytes,
        status: &Status,
    ) -> Result<()> {
        request.release_local();
        if !status.is_success() {
            notify(&*self.requester, "get_done", |r| r.get_done(status, None));
            return Ok(());
        }
        match registry.deserialize_field(payload) {
            Ok(field) => notify(&*self.requester, "get_done", |r| r.get_done(status, Some(field))),
            Err(e) => {
                warn!(ioid = request.ioid(), field = %self.sub_field, error = %e, "undecodable field");
                let failed = Status::error(format!("failed to decode field '{}': {e}", self.sub_field));
                notify(&*self.requester, "get_done", |r| r.get_done(&failed, None));
            }
        }
        Ok(())
    }

    // never sent: the only message is the query itself
    fn normal_response(
        &self,
        _request: &Arc<Request>,
        _qos: QoS,
        _registry: &dyn IntrospectionRegistry,
        _payload: &mut Bytes,
        _status: &Status,
    ) -> Result<()> {
        Ok(())
    }

    fn fail(&self, request: &Arc<Request>, _qos: QoS, status: &Status) {
        request.release_local();
        notify(&*self.requester, "get_done", |r| r.get_done(status, None));
    }

    fn status_reported(&self, status: &Status) {
        self.requester.status_reported(status);
    }

    fn message(&self, text: &str, kind: MessageType) {
        self.requester.message(text, kind);
    }
}
