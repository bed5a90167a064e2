use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use super::{notify, Request, RequestOps};
use crate::error::{ClientError, Result};
use crate::protocol::Command;
use crate::pvdata::{install_structure, lock, IntrospectionRegistry, StructureHandle};
use crate::qos::QoS;
use crate::requester::{ChannelPutRequester, MessageType};
use crate::status::Status;

/// Writes a structure, sending only the fields marked in its bitmap.
#[derive(Clone)]
pub struct ChannelPut {
    request: Arc<Request>,
}

impl ChannelPut {
    pub(crate) fn new(request: Arc<Request>) -> Self {
        Self { request }
    }

    /// Sends the changed fields. `last` also releases the request afterwards.
    pub fn put(&self, last: bool) {
        let qos = QoS::DEFAULT.with_if(last, QoS::DESTROY);
        if let Err(status) = self.request.issue(qos, || {}) {
            self.request.fail(qos, &status);
        }
    }

    /// Reads the current value back into the put structure.
    pub fn get(&self) {
        if let Err(status) = self.request.issue(QoS::GET, || {}) {
            self.request.fail(QoS::GET, &status);
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

pub(crate) struct PutOps {
    requester: Arc<dyn ChannelPutRequester>,
    data: Mutex<Option<StructureHandle>>,
}

impl PutOps {
    pub(crate) fn new(requester: Arc<dyn ChannelPutRequester>) -> Self {
        Self {
            requester,
            data: Mutex::new(None),
        }
    }

    fn structure(&self, request: &Request) -> Result<StructureHandle> {
        lock(&self.data).clone().ok_or(ClientError::NotInitialized {
            ioid: request.ioid(),
        })
    }
}

impl RequestOps for PutOps {
    fn command(&self) -> Command {
        Command::Put
    }

    fn kind_name(&self) -> &'static str {
        "put"
    }

    fn write_operation(&self, qos: QoS, buf: &mut BytesMut, _registry: &dyn IntrospectionRegistry) {
        if qos.is_set(QoS::GET) {
            return;
        }
        if let Some(structure) = lock(&self.data).as_ref() {
            let data = lock(structure);
            data.changed.serialize(buf);
            data.value.serialize_fields(buf, &data.changed);
        }
    }

    fn init_response(
        &self,
        request: &Arc<Request>,
        registry: &dyn IntrospectionRegistry,
        payload: &mut Bytes,
        status: &Status,
    ) -> Result<()> {
        let handle = ChannelPut::new(Arc::clone(request));
        if !status.is_success() {
            notify(&*self.requester, "channel_put_connect", |r| {
                r.channel_put_connect(status, &handle, None)
            });
            return Ok(());
        }
        let value = registry.deserialize_structure(payload)?;
        let structure = install_structure(&mut lock(&self.data), value);
        request.mark_initialized();
        notify(&*self.requester, "channel_put_connect", |r| {
            r.channel_put_connect(status, &handle, Some(structure))
        });
        Ok(())
    }

    fn normal_response(
        &self,
        request: &Arc<Request>,
        qos: QoS,
        _registry: &dyn IntrospectionRegistry,
        payload: &mut Bytes,
        status: &Status,
    ) -> Result<()> {
        let handle = ChannelPut::new(Arc::clone(request));
        if qos.is_set(QoS::GET) {
            if status.is_success() {
                let structure = self.structure(request)?;
                lock(&structure).value.deserialize_all(payload)?;
            }
            notify(&*self.requester, "get_done", |r| r.get_done(status, &handle));
        } else {
            notify(&*self.requester, "put_done", |r| r.put_done(status, &handle));
        }
        Ok(())
    }

    fn fail(&self, request: &Arc<Request>, qos: QoS, status: &Status) {
        let handle = ChannelPut::new(Arc::clone(request));
        if qos.is_set(QoS::INIT) {
            notify(&*self.requester, "channel_put_connect", |r| {
                r.channel_put_connect(status, &handle, None)
            });
        } else if qos.is_set(QoS::GET) {
            notify(&*self.requester, "get_done", |r| r.get_done(status, &handle));
        } else {
            notify(&*self.requester, "put_done", |r| r.put_done(status, &handle));
        }
    }

    fn status_reported(&self, status: &Status) {
        self.requester.status_reported(status);
    }

    fn message(&self, text: &str, kind: MessageType) {
        self.requester.message(text, kind);
    }
}
