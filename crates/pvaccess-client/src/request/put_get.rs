use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use super::{notify, Request, RequestOps};
use crate::error::{ClientError, Result};
use crate::protocol::Command;
use crate::pvdata::{install_structure, lock, IntrospectionRegistry, StructureHandle};
use crate::qos::QoS;
use crate::requester::{ChannelPutGetRequester, MessageType};
use crate::status::Status;

/// Writes a put structure and reads a result structure in one round trip.
#[derive(Clone)]
pub struct ChannelPutGet {
    request: Arc<Request>,
}

impl ChannelPutGet {
    pub(crate) fn new(request: Arc<Request>) -> Self {
        Self { request }
    }

    /// Sends the whole put structure and receives the get structure.
    pub fn put_get(&self, last: bool) {
        let qos = QoS::DEFAULT.with_if(last, QoS::DESTROY);
        if let Err(status) = self.request.issue(qos, || {}) {
            self.request.fail(qos, &status);
        }
    }

    /// Fetches the current put structure.
    pub fn get_put(&self) {
        if let Err(status) = self.request.issue(QoS::GET_PUT, || {}) {
            self.request.fail(QoS::GET_PUT, &status);
        }
    }

    /// Fetches the current get structure.
    pub fn get_get(&self) {
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

#[derive(Default)]
struct Structures {
    put: Option<StructureHandle>,
    get: Option<StructureHandle>,
}

pub(crate) struct PutGetOps {
    requester: Arc<dyn ChannelPutGetRequester>,
    data: Mutex<Structures>,
}

impl PutGetOps {
    pub(crate) fn new(requester: Arc<dyn ChannelPutGetRequester>) -> Self {
        Self {
            requester,
            data: Mutex::new(Structures::default()),
        }
    }

    fn read_into(
        &self,
        request: &Request,
        select: impl FnOnce(&Structures) -> Option<StructureHandle>,
        payload: &mut Bytes,
    ) -> Result<()> {
        let structure = select(&lock(&self.data)).ok_or(ClientError::NotInitialized {
            ioid: request.ioid(),
        })?;
        lock(&structure).value.deserialize_all(payload)?;
        Ok(())
    }
}

impl RequestOps for PutGetOps {
    fn command(&self) -> Command {
        Command::PutGet
    }

    fn kind_name(&self) -> &'static str {
        "put-get"
    }

    fn write_operation(&self, qos: QoS, buf: &mut BytesMut, _registry: &dyn IntrospectionRegistry) {
        if qos.is_set(QoS::GET) || qos.is_set(QoS::GET_PUT) {
            return;
        }
        if let Some(put) = lock(&self.data).put.as_ref() {
            lock(put).value.serialize_all(buf);
        }
    }

    fn init_response(
        &self,
        request: &Arc<Request>,
        registry: &dyn IntrospectionRegistry,
        payload: &mut Bytes,
        status: &Status,
    ) -> Result<()> {
        let handle = ChannelPutGet::new(Arc::clone(request));
        if !status.is_success() {
            notify(&*self.requester, "channel_put_get_connect", |r| {
                r.channel_put_get_connect(status, &handle, None, None)
            });
            return Ok(());
        }
        let put_value = registry.deserialize_structure(payload)?;
        let get_value = registry.deserialize_structure(payload)?;
        let (put, get) = {
            let mut data = lock(&self.data);
            let put = install_structure(&mut data.put, put_value);
            let get = install_structure(&mut data.get, get_value);
            (put, get)
        };
        request.mark_initialized();
        notify(&*self.requester, "channel_put_get_connect", |r| {
            r.channel_put_get_connect(status, &handle, Some(put), Some(get))
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
        let handle = ChannelPutGet::new(Arc::clone(request));
        if qos.is_set(QoS::GET) {
            if status.is_success() {
                self.read_into(request, |s| s.get.clone(), payload)?;
            }
            notify(&*self.requester, "get_get_done", |r| {
                r.get_get_done(status, &handle)
            });
        } else if qos.is_set(QoS::GET_PUT) {
            if status.is_success() {
                self.read_into(request, |s| s.put.clone(), payload)?;
            }
            notify(&*self.requester, "get_put_done", |r| {
                r.get_put_done(status, &handle)
            });
        } else {
            if status.is_success() {
                self.read_into(request, |s| s.get.clone(), payload)?;
            }
            notify(&*self.requester, "put_get_done", |r| {
                r.put_get_done(status, &handle)
            });
        }
        Ok(())
    }

    fn fail(&self, request: &Arc<Request>, qos: QoS, status: &Status) {
        let handle = ChannelPutGet::new(Arc::clone(request));
        if qos.is_set(QoS::INIT) {
            notify(&*self.requester, "channel_put_get_connect", |r| {
                r.channel_put_get_connect(status, &handle, None, None)
            });
        } else if qos.is_set(QoS::GET) {
            notify(&*self.requester, "get_get_done", |r| {
                r.get_get_done(status, &handle)
            });
        } else if qos.is_set(QoS::GET_PUT) {
            notify(&*self.requester, "get_put_done", |r| {
                r.get_put_done(status, &handle)
            });
        } else {
            notify(&*self.requester, "put_get_done", |r| {
                r.put_get_done(status, &handle)
            });
        }
    }

    fn status_reported(&self, status: &Status) {
        self.requester.status_reported(status);
    }

    fn message(&self, text: &str, kind: MessageType) {
        self.requester.message(text, kind);
    }
}
