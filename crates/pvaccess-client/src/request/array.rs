use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use super::{notify, Kind, Request, RequestOps};
use crate::error::{ClientError, Result};
use crate::protocol::{write_size, Command};
use crate::pvdata::{install_array, lock, ArrayHandle, IntrospectionRegistry};
use crate::qos::QoS;
use crate::requester::{ChannelArrayRequester, MessageType};
use crate::status::Status;

/// Reads, writes and resizes an array field.
#[derive(Clone)]
pub struct ChannelArray {
    request: Arc<Request>,
}

impl ChannelArray {
    pub(crate) fn new(request: Arc<Request>) -> Self {
        Self { request }
    }

    fn set_params(&self, update: impl FnOnce(&mut ArrayValues)) {
        if let Kind::Array(ops) = self.request.kind() {
            update(&mut lock(&ops.params));
        }
    }

    /// Fetches `count` elements starting at `offset` into the array.
    pub fn get_array(&self, last: bool, offset: usize, count: usize) {
        let qos = QoS::GET.with_if(last, QoS::DESTROY);
        let result = self.request.issue(qos, || {
            self.set_params(|params| {
                params.offset = offset;
                params.count = count;
            })
        });
        if let Err(status) = result {
            self.request.fail(qos, &status);
        }
    }

    /// Writes the first `count` elements of the array at `offset` on the server.
    pub fn put_array(&self, last: bool, offset: usize, count: usize) {
        let qos = QoS::DEFAULT.with_if(last, QoS::DESTROY);
        let result = self.request.issue(qos, || {
            self.set_params(|params| {
                params.offset = offset;
                params.count = count;
            })
        });
        if let Err(status) = result {
            self.request.fail(qos, &status);
        }
    }

    /// Sets the server-side array length and capacity.
    pub fn set_length(&self, last: bool, length: usize, capacity: usize) {
        let qos = QoS::GET_PUT.with_if(last, QoS::DESTROY);
        let result = self.request.issue(qos, || {
            self.set_params(|params| {
                params.length = length;
                params.capacity = capacity;
            })
        });
        if let Err(status) = result {
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

/// Operation parameters, written by operation calls and read by the send path.
#[derive(Debug, Default, Clone, Copy)]
struct ArrayValues {
    offset: usize,
    count: usize,
    length: usize,
    capacity: usize,
}

pub(crate) struct ArrayOps {
    requester: Arc<dyn ChannelArrayRequester>,
    data: Mutex<Option<ArrayHandle>>,
    params: Mutex<ArrayValues>,
}

impl ArrayOps {
    pub(crate) fn new(requester: Arc<dyn ChannelArrayRequester>) -> Self {
        Self {
            requester,
            data: Mutex::new(None),
            params: Mutex::new(ArrayValues::default()),
        }
    }
}

impl RequestOps for ArrayOps {
    fn command(&self) -> Command {
        Command::Array
    }

    fn kind_name(&self) -> &'static str {
        "array"
    }

    fn write_operation(&self, qos: QoS, buf: &mut BytesMut, _registry: &dyn IntrospectionRegistry) {
        let params = *lock(&self.params);
        if qos.is_set(QoS::GET) {
            write_size(buf, params.offset);
            write_size(buf, params.count);
        } else if qos.is_set(QoS::GET_PUT) {
            write_size(buf, params.length);
            write_size(buf, params.capacity);
        } else {
            write_size(buf, params.offset);
            if let Some(array) = lock(&self.data).as_ref() {
                lock(array).serialize_range(buf, 0, params.count);
            }
        }
    }

    fn init_response(
        &self,
        request: &Arc<Request>,
        registry: &dyn IntrospectionRegistry,
        payload: &mut Bytes,
        status: &Status,
    ) -> Result<()> {
        let handle = ChannelArray::new(Arc::clone(request));
        if !status.is_success() {
            notify(&*self.requester, "channel_array_connect", |r| {
                r.channel_array_connect(status, &handle, None)
            });
            return Ok(());
        }
        let value = registry.deserialize_array(payload)?;
        let array = install_array(&mut lock(&self.data), value);
        request.mark_initialized();
        notify(&*self.requester, "channel_array_connect", |r| {
            r.channel_array_connect(status, &handle, Some(array))
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
        let handle = ChannelArray::new(Arc::clone(request));
        if qos.is_set(QoS::GET) {
            if status.is_success() {
                let array = lock(&self.data).clone().ok_or(ClientError::NotInitialized {
                    ioid: request.ioid(),
                })?;
                lock(&array).deserialize(payload)?;
            }
            notify(&*self.requester, "get_array_done", |r| {
                r.get_array_done(status, &handle)
            });
        } else if qos.is_set(QoS::GET_PUT) {
            notify(&*self.requester, "set_length_done", |r| {
                r.set_length_done(status, &handle)
            });
        } else {
            notify(&*self.requester, "put_array_done", |r| {
                r.put_array_done(status, &handle)
            });
        }
        Ok(())
    }

    fn fail(&self, request: &Arc<Request>, qos: QoS, status: &Status) {
        let handle = ChannelArray::new(Arc::clone(request));
        if qos.is_set(QoS::INIT) {
            notify(&*self.requester, "channel_array_connect", |r| {
                r.channel_array_connect(status, &handle, None)
            });
        } else if qos.is_set(QoS::GET) {
            notify(&*self.requester, "get_array_done", |r| {
                r.get_array_done(status, &handle)
            });
        } else if qos.is_set(QoS::GET_PUT) {
            notify(&*self.requester, "set_length_done", |r| {
                r.set_length_done(status, &handle)
            });
        } else {
            notify(&*self.requester, "put_array_done", |r| {
                r.put_array_done(status, &handle)
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
