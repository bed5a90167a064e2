use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use super::{notify, Request, RequestOps};
use crate::error::{ClientError, Result};
use crate::protocol::Command;
use crate::pvdata::{install_structure, lock, IntrospectionRegistry, StructureData, StructureHandle};
use crate::qos::QoS;
use crate::requester::{ChannelGetRequester, MessageType};
use crate::status::Status;

/// Reads a structure, transferring only the fields the server marks as changed.
#[derive(Clone)]
pub struct ChannelGet {
    request: Arc<Request>,
}

impl ChannelGet {
    pub(crate) fn new(request: Arc<Request>) -> Self {
        Self { request }
    }

    /// Fetches the current value. `last` also releases the request once the value
    /// has been delivered.
    pub fn get(&self, last: bool) {
        let qos = if last {
            QoS::DESTROY | QoS::GET
        } else {
            QoS::DEFAULT
        };
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

pub(crate) struct GetOps {
    requester: Arc<dyn ChannelGetRequester>,
    data: Mutex<Option<StructureHandle>>,
}

impl GetOps {
    pub(crate) fn new(requester: Arc<dyn ChannelGetRequester>) -> Self {
        Self {
            requester,
            data: Mutex::new(None),
        }
    }
}

impl RequestOps for GetOps {
    fn command(&self) -> Command {
        Command::Get
    }

    fn kind_name(&self) -> &'static str {
        "get"
    }

    fn write_operation(&self, _qos: QoS, _buf: &mut BytesMut, _registry: &dyn IntrospectionRegistry) {}

    fn init_response(
        &self,
        request: &Arc<Request>,
        registry: &dyn IntrospectionRegistry,
        payload: &mut Bytes,
        status: &Status,
    ) -> Result<()> {
        let handle = ChannelGet::new(Arc::clone(request));
        if !status.is_success() {
            notify(&*self.requester, "channel_get_connect", |r| {
                r.channel_get_connect(status, &handle, None)
            });
            return Ok(());
        }
        let value = registry.deserialize_structure(payload)?;
        let structure = install_structure(&mut lock(&self.data), value);
        request.mark_initialized();
        notify(&*self.requester, "channel_get_connect", |r| {
            r.channel_get_connect(status, &handle, Some(structure))
        });
        Ok(())
    }

    fn normal_response(
        &self,
        request: &Arc<Request>,
        _qos: QoS,
        _registry: &dyn IntrospectionRegistry,
        payload: &mut Bytes,
        status: &Status,
    ) -> Result<()> {
        let handle = ChannelGet::new(Arc::clone(request));
        if status.is_success() {
            let structure = lock(&self.data)
                .clone()
                .ok_or(ClientError::NotInitialized {
                    ioid: request.ioid(),
                })?;
            let mut data = lock(&structure);
            let StructureData { value, changed } = &mut *data;
            changed.deserialize(payload)?;
            value.deserialize_fields(payload, changed)?;
        }
        notify(&*self.requester, "get_done", |r| r.get_done(status, &handle));
        Ok(())
    }

    fn fail(&self, request: &Arc<Request>, qos: QoS, status: &Status) {
        let handle = ChannelGet::new(Arc::clone(request));
        if qos.is_set(QoS::INIT) {
            notify(&*self.requester, "channel_get_connect", |r| {
                r.channel_get_connect(status, &handle, None)
            });
        } else {
            notify(&*self.requester, "get_done", |r| r.get_done(status, &handle));
        }
    }

    fn status_reported(&self, status: &Status) {
        self.requester.status_reported(status);
    }

    fn message(&self, text: &str, kind: MessageType) {
        self.requester.message(text, kind);
    }
}
