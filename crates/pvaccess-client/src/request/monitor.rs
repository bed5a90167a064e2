use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tracing::debug;

use super::{notify, Request, RequestOps};
use crate::bitset::BitSet;
use crate::error::{ClientError, Result};
use crate::protocol::Command;
use crate::pvdata::{install_structure, lock, IntrospectionRegistry, StructureData, StructureHandle};
use crate::qos::QoS;
use crate::requester::{MessageType, MonitorRequester};
use crate::status::Status;

/// Subscription to changes of a structure.
///
/// Once started, the server pushes an update whenever the record changes. Each
/// update rewrites the changed fields of the structure handed to
/// [`MonitorRequester::monitor_connect`] and raises
/// [`MonitorRequester::monitor_event`]. A started monitor restarts by itself
/// after its channel reconnects.
#[derive(Clone)]
pub struct ChannelMonitor {
    request: Arc<Request>,
}

impl ChannelMonitor {
    pub(crate) fn new(request: Arc<Request>) -> Self {
        Self { request }
    }

    /// Asks the server to start sending updates.
    ///
    /// # Errors
    /// The status explaining why the start message could not be queued.
    pub fn start(&self) -> std::result::Result<(), Status> {
        self.request.issue(QoS::PROCESS | QoS::GET, || {})?;
        self.set_started(true);
        Ok(())
    }

    /// Asks the server to stop sending updates. The monitor no longer restarts
    /// on reconnect even if the stop message could not be sent.
    ///
    /// # Errors
    /// The status explaining why the stop message could not be queued.
    pub fn stop(&self) -> std::result::Result<(), Status> {
        self.set_started(false);
        self.request.issue(QoS::PROCESS, || {})
    }

    /// Returns true between a successful [`ChannelMonitor::start`] and the next
    /// [`ChannelMonitor::stop`].
    pub fn is_started(&self) -> bool {
        match self.request.kind() {
            super::Kind::Monitor(ops) => ops.started.load(Ordering::Acquire),
            _ => false,
        }
    }

    /// Destroys the subscription.
    pub fn destroy(&self) {
        self.request.destroy();
    }

    /// The underlying request.
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    fn set_started(&self, started: bool) {
        if let super::Kind::Monitor(ops) = self.request.kind() {
            ops.started.store(started, Ordering::Release);
        }
    }
}

pub(crate) struct MonitorOps {
    requester: Arc<dyn MonitorRequester>,
    data: Mutex<Option<StructureHandle>>,
    started: AtomicBool,
}

impl MonitorOps {
    pub(crate) fn new(requester: Arc<dyn MonitorRequester>) -> Self {
        Self {
            requester,
            data: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }
}

impl RequestOps for MonitorOps {
    fn command(&self) -> Command {
        Command::Monitor
    }

    fn kind_name(&self) -> &'static str {
        "monitor"
    }

    // updates carry data only
    fn response_has_status(&self, qos: QoS) -> bool {
        qos.is_set(QoS::INIT) || qos.is_set(QoS::DESTROY)
    }

    fn write_operation(&self, _qos: QoS, _buf: &mut BytesMut, _registry: &dyn IntrospectionRegistry) {}

    fn init_response(
        &self,
        request: &Arc<Request>,
        registry: &dyn IntrospectionRegistry,
        payload: &mut Bytes,
        status: &Status,
    ) -> Result<()> {
        let handle = ChannelMonitor::new(Arc::clone(request));
        if !status.is_success() {
            notify(&*self.requester, "monitor_connect", |r| {
                r.monitor_connect(status, &handle, None)
            });
            return Ok(());
        }
        let value = registry.deserialize_structure(payload)?;
        let structure = install_structure(&mut lock(&self.data), value);
        request.mark_initialized();
        notify(&*self.requester, "monitor_connect", |r| {
            r.monitor_connect(status, &handle, Some(structure))
        });

        if self.started.load(Ordering::Acquire) {
            if let Err(status) = request.issue(QoS::PROCESS | QoS::GET, || {}) {
                debug!(ioid = request.ioid(), status = %status, "monitor restart not sent");
                self.started.store(false, Ordering::Release);
                notify(&*self.requester, "status_reported", |r| r.status_reported(&status));
            }
        }
        Ok(())
    }

    fn normal_response(
        &self,
        request: &Arc<Request>,
        qos: QoS,
        _registry: &dyn IntrospectionRegistry,
        payload: &mut Bytes,
        _status: &Status,
    ) -> Result<()> {
        let handle = ChannelMonitor::new(Arc::clone(request));
        if qos.is_set(QoS::DESTROY) {
            self.started.store(false, Ordering::Release);
            notify(&*self.requester, "unlisten", |r| r.unlisten(&handle));
            return Ok(());
        }
        let structure = lock(&self.data)
            .clone()
            .ok_or(ClientError::NotInitialized {
                ioid: request.ioid(),
            })?;
        let mut overrun = BitSet::default();
        {
            let mut data = lock(&structure);
            let StructureData { value, changed } = &mut *data;
            changed.deserialize(payload)?;
            value.deserialize_fields(payload, changed)?;
            overrun.deserialize(payload)?;
        }
        notify(&*self.requester, "monitor_event", |r| r.monitor_event(&handle, &overrun));
        Ok(())
    }

    fn fail(&self, request: &Arc<Request>, qos: QoS, status: &Status) {
        if qos.is_set(QoS::INIT) {
            let handle = ChannelMonitor::new(Arc::clone(request));
            notify(&*self.requester, "monitor_connect", |r| {
                r.monitor_connect(status, &handle, None)
            });
        } else {
            notify(&*self.requester, "status_reported", |r| r.status_reported(status));
        }
    }

    fn status_reported(&self, status: &Status) {
        self.requester.status_reported(status);
    }

    fn message(&self, text: &str, kind: MessageType) {
        self.requester.message(text, kind);
    }
}
