//! In-memory transport, search manager, data registry and recording listeners for
//! scenario tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use pvaccess_client::protocol::{get_u32, read_size, read_string, write_size, write_string, RequestHeader};
use pvaccess_client::{
    ArrayHandle, BitSet, Channel, ChannelArray, ChannelArrayRequester, ChannelGet,
    ChannelGetRequester, ChannelMonitor, ChannelProcess, ChannelProcessRequester, ChannelPut,
    ChannelPutGet, ChannelPutGetRequester, ChannelPutRequester, ChannelRequester, ChannelRpc,
    ChannelRpcRequester, ClientConfig, ClientError, Command, ConnectionState, Context, FieldDesc,
    GetFieldRequester, IntrospectionRegistry, MessageHeader, MessageReader, MessageType,
    MessageWriter, MonitorRequester, PvArray, PvRequest, PvStructure, QoS, Requester,
    ResponseDispatcher, Result, SearchManager, Status, StructureHandle, Transport,
    TransportClient, TransportProvider, TransportSender,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

// ---------------------------------------------------------------------------
// data registry: structures of i32 fields, arrays of i32

/// Structure with `values.len()` i32 fields at offsets 1..=n.
#[derive(Debug)]
pub struct IntStructure {
    pub values: Arc<Mutex<Vec<i32>>>,
}

impl PvStructure for IntStructure {
    fn field_count(&self) -> usize {
        self.values.lock().unwrap().len() + 1
    }

    fn serialize_fields(&self, buf: &mut BytesMut, fields: &BitSet) {
        for (i, v) in self.values.lock().unwrap().iter().enumerate() {
            if fields.get(0) || fields.get(i + 1) {
                buf.put_i32(*v);
            }
        }
    }

    fn deserialize_fields(&mut self, buf: &mut dyn Buf, fields: &BitSet) -> Result<()> {
        let mut values = self.values.lock().unwrap();
        for i in 0..values.len() {
            if fields.get(0) || fields.get(i + 1) {
                if buf.remaining() < 4 {
                    return Err(ClientError::BufferUnderflow {
                        needed: 4,
                        remaining: buf.remaining(),
                    });
                }
                values[i] = buf.get_i32();
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct IntArray {
    pub values: Arc<Mutex<Vec<i32>>>,
}

impl PvArray for IntArray {
    fn len(&self) -> usize {
        self.values.lock().unwrap().len()
    }

    fn serialize_range(&self, buf: &mut BytesMut, offset: usize, count: usize) {
        let values = self.values.lock().unwrap();
        let end = (offset + count).min(values.len());
        let start = offset.min(end);
        write_size(buf, end - start);
        for v in &values[start..end] {
            buf.put_i32(*v);
        }
    }

    fn deserialize(&mut self, buf: &mut dyn Buf) -> Result<()> {
        let n = read_size(buf)?.unwrap_or(0);
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            if buf.remaining() < 4 {
                return Err(ClientError::BufferUnderflow {
                    needed: 4,
                    remaining: buf.remaining(),
                });
            }
            values.push(buf.get_i32());
        }
        *self.values.lock().unwrap() = values;
        Ok(())
    }
}

/// Field type answered to a get-field query.
#[derive(Debug)]
pub struct IntField(pub u8);

impl FieldDesc for IntField {
    fn type_id(&self) -> String {
        format!("int32x{}", self.0)
    }
}

/// Introspection is a single byte: the number of i32 fields. Every allocated
/// container's storage is kept so tests can inspect and modify it.
#[derive(Default)]
pub struct IntRegistry {
    pub structures: Mutex<Vec<Arc<Mutex<Vec<i32>>>>>,
    pub arrays: Mutex<Vec<Arc<Mutex<Vec<i32>>>>>,
}

impl IntRegistry {
    pub fn last_structure(&self) -> Arc<Mutex<Vec<i32>>> {
        self.structures.lock().unwrap().last().cloned().expect("no structure allocated")
    }

    pub fn last_array(&self) -> Arc<Mutex<Vec<i32>>> {
        self.arrays.lock().unwrap().last().cloned().expect("no array allocated")
    }

    fn structure(&self, fields: usize) -> Box<dyn PvStructure> {
        let values = Arc::new(Mutex::new(vec![0; fields]));
        self.structures.lock().unwrap().push(Arc::clone(&values));
        Box::new(IntStructure { values })
    }
}

fn get_byte(buf: &mut dyn Buf) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(ClientError::BufferUnderflow {
            needed: 1,
            remaining: 0,
        });
    }
    Ok(buf.get_u8())
}

impl IntrospectionRegistry for IntRegistry {
    fn serialize_request(&self, buf: &mut BytesMut, request: &PvRequest) {
        write_string(buf, request.as_str());
    }

    fn deserialize_structure(&self, buf: &mut dyn Buf) -> Result<Box<dyn PvStructure>> {
        let fields = get_byte(buf)?;
        Ok(self.structure(fields as usize))
    }

    fn deserialize_array(&self, buf: &mut dyn Buf) -> Result<Box<dyn PvArray>> {
        get_byte(buf)?;
        let values = Arc::new(Mutex::new(Vec::new()));
        self.arrays.lock().unwrap().push(Arc::clone(&values));
        Ok(Box::new(IntArray { values }))
    }

    fn serialize_structure_full(&self, buf: &mut BytesMut, value: &dyn PvStructure) {
        buf.put_u8((value.field_count() - 1) as u8);
        value.serialize_all(buf);
    }

    fn deserialize_structure_full(&self, buf: &mut dyn Buf) -> Result<Box<dyn PvStructure>> {
        let mut value = self.deserialize_structure(buf)?;
        value.deserialize_all(buf)?;
        Ok(value)
    }

    fn deserialize_field(&self, buf: &mut dyn Buf) -> Result<Arc<dyn FieldDesc>> {
        Ok(Arc::new(IntField(get_byte(buf)?)))
    }
}

pub fn int_structure(values: Vec<i32>) -> Box<dyn PvStructure> {
    Box::new(IntStructure {
        values: Arc::new(Mutex::new(values)),
    })
}

// ---------------------------------------------------------------------------
// transport

/// A client-side message framed by a sender.
#[derive(Debug, Clone)]
pub struct Sent {
    pub header: MessageHeader,
    pub payload: Bytes,
}

impl Sent {
    pub fn request_header(&self) -> RequestHeader {
        RequestHeader::parse(&mut self.payload.clone()).expect("request header")
    }

    /// Payload after the request header.
    pub fn body(&self) -> Bytes {
        let mut payload = self.payload.clone();
        payload.advance(RequestHeader::SIZE);
        payload
    }
}

/// Transport that queues senders and frames them on [`LoopbackTransport::pump`].
pub struct LoopbackTransport {
    address: SocketAddr,
    self_ref: Weak<LoopbackTransport>,
    queue: Mutex<Vec<Arc<dyn TransportSender>>>,
    sent: Mutex<Vec<Sent>>,
    clients: Mutex<Vec<Arc<dyn TransportClient>>>,
    released: Mutex<Vec<u32>>,
    closed: AtomicBool,
    pub registry: Arc<IntRegistry>,
}

impl LoopbackTransport {
    pub fn new(address: SocketAddr) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            address,
            self_ref: self_ref.clone(),
            queue: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            clients: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            registry: Arc::new(IntRegistry::default()),
        })
    }

    pub fn as_dyn(&self) -> Arc<dyn Transport> {
        let me: Arc<LoopbackTransport> = self.self_ref.upgrade().expect("transport alive");
        me
    }

    /// Frames every queued sender and returns the produced messages.
    pub fn pump(&self) -> Vec<Sent> {
        let senders: Vec<_> = std::mem::take(&mut *self.queue.lock().unwrap());
        let mut out = Vec::new();
        for sender in senders {
            let mut writer = MessageWriter::new();
            sender.send(&mut writer);
            let mut reader = MessageReader::new();
            reader.push(&writer.finish());
            while let Some((header, payload)) = reader.next_message().expect("well-formed frame") {
                out.push(Sent { header, payload });
            }
        }
        self.sent.lock().unwrap().extend(out.iter().cloned());
        out
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<u32> {
        self.released.lock().unwrap().clone()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    fn add_client(&self, client: Arc<dyn TransportClient>) {
        let mut clients = self.clients.lock().unwrap();
        if !clients.iter().any(|c| c.client_id() == client.client_id()) {
            clients.push(client);
        }
    }

    fn snapshot_clients(&self) -> Vec<Arc<dyn TransportClient>> {
        self.clients.lock().unwrap().clone()
    }

    /// Closes the connection and notifies every bound client.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.queue.lock().unwrap().clear();
        for client in self.snapshot_clients() {
            client.transport_closed();
        }
    }

    pub fn unresponsive(&self) {
        for client in self.snapshot_clients() {
            client.transport_unresponsive();
        }
    }

    pub fn responsive(&self) {
        let me = self.as_dyn();
        for client in self.snapshot_clients() {
            client.transport_responsive(&me);
        }
    }
}

impl Transport for LoopbackTransport {
    fn remote_address(&self) -> SocketAddr {
        self.address
    }

    fn minor_revision(&self) -> u8 {
        1
    }

    fn enqueue_send_request(&self, sender: Arc<dyn TransportSender>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Transport {
                reason: "connection closed".into(),
            });
        }
        self.queue.lock().unwrap().push(sender);
        Ok(())
    }

    fn introspection(&self) -> Arc<dyn IntrospectionRegistry> {
        self.registry.clone()
    }

    fn release(&self, client_id: u32) {
        self.released.lock().unwrap().push(client_id);
        self.clients.lock().unwrap().retain(|c| c.client_id() != client_id);
    }
}

/// Transport pool: one live transport per address. A closed transport is replaced
/// on the next acquisition.
#[derive(Default)]
pub struct LoopbackProvider {
    transports: Mutex<HashMap<SocketAddr, Arc<LoopbackTransport>>>,
    pub fail: AtomicBool,
    pub acquisitions: Mutex<Vec<SocketAddr>>,
}

impl LoopbackProvider {
    pub fn transport(&self, address: SocketAddr) -> Option<Arc<LoopbackTransport>> {
        self.transports.lock().unwrap().get(&address).cloned()
    }

    /// Drops the pooled transport so the next acquisition builds a fresh one.
    pub fn forget(&self, address: SocketAddr) {
        self.transports.lock().unwrap().remove(&address);
    }
}

impl TransportProvider for LoopbackProvider {
    fn get_transport(
        &self,
        client: Arc<dyn TransportClient>,
        address: SocketAddr,
        _minor_revision: u8,
        _priority: i16,
    ) -> Result<Arc<dyn Transport>> {
        self.acquisitions.lock().unwrap().push(address);
        if self.fail.load(Ordering::Acquire) {
            return Err(ClientError::Transport {
                reason: "connect refused".into(),
            });
        }
        let transport = Arc::clone(
            self.transports
                .lock()
                .unwrap()
                .entry(address)
                .or_insert_with(|| LoopbackTransport::new(address)),
        );
        transport.add_client(client);
        let transport: Arc<dyn Transport> = transport;
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// search

#[derive(Default)]
pub struct RecordingSearch {
    pub registered: Mutex<Vec<u32>>,
    pub unregistered: Mutex<Vec<u32>>,
    channels: Mutex<HashMap<u32, Weak<Channel>>>,
}

impl RecordingSearch {
    pub fn registrations(&self, cid: u32) -> usize {
        self.registered.lock().unwrap().iter().filter(|&&c| c == cid).count()
    }

    /// Answers for channel `cid` as if a server at `address` replied.
    pub fn answer(&self, cid: u32, address: SocketAddr) {
        let channel = self.channels.lock().unwrap().get(&cid).and_then(Weak::upgrade);
        if let Some(channel) = channel {
            channel.search_response(1, address);
        }
    }
}

impl SearchManager for RecordingSearch {
    fn register(&self, channel: Arc<Channel>) {
        self.registered.lock().unwrap().push(channel.id());
        self.channels
            .lock()
            .unwrap()
            .insert(channel.id(), Arc::downgrade(&channel));
    }

    fn unregister(&self, channel_id: u32) {
        self.unregistered.lock().unwrap().push(channel_id);
    }
}

// ---------------------------------------------------------------------------
// listeners

/// Records every callback as a short text line.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<String>>,
    pub structures: Mutex<Vec<StructureHandle>>,
    pub arrays: Mutex<Vec<ArrayHandle>>,
    pub responses: Mutex<Vec<Box<dyn PvStructure>>>,
    pub fields: Mutex<Vec<Arc<dyn FieldDesc>>>,
    pub panic_on: Mutex<Option<&'static str>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: &'static str, detail: String) {
        self.events.lock().unwrap().push(format!("{event} {detail}"));
        let armed = *self.panic_on.lock().unwrap() == Some(event);
        if armed {
            panic!("listener failure in {event}");
        }
    }

    fn status(&self, event: &'static str, status: &Status) {
        self.push(event, format!("{:?} {}", status.kind, status.message).trim_end().to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn last_structure(&self) -> StructureHandle {
        self.structures.lock().unwrap().last().cloned().expect("no structure delivered")
    }
}

impl Requester for Recorder {
    fn requester_name(&self) -> String {
        "recorder".into()
    }

    fn message(&self, message: &str, kind: MessageType) {
        self.events
            .lock()
            .unwrap()
            .push(format!("message {kind:?} {message}"));
    }

    fn status_reported(&self, status: &Status) {
        self.status("status_reported", status);
    }
}

impl ChannelRequester for Recorder {
    fn channel_state_change(&self, _channel: &Channel, state: ConnectionState) {
        self.push("state", state.to_string());
    }
}

impl ChannelGetRequester for Recorder {
    fn channel_get_connect(&self, status: &Status, _get: &ChannelGet, structure: Option<StructureHandle>) {
        if let Some(s) = structure {
            self.structures.lock().unwrap().push(s);
        }
        self.status("get_connect", status);
    }

    fn get_done(&self, status: &Status, _get: &ChannelGet) {
        self.status("get_done", status);
    }
}

impl ChannelPutRequester for Recorder {
    fn channel_put_connect(&self, status: &Status, _put: &ChannelPut, structure: Option<StructureHandle>) {
        if let Some(s) = structure {
            self.structures.lock().unwrap().push(s);
        }
        self.status("put_connect", status);
    }

    fn put_done(&self, status: &Status, _put: &ChannelPut) {
        self.status("put_done", status);
    }

    fn get_done(&self, status: &Status, _put: &ChannelPut) {
        self.status("put_readback_done", status);
    }
}

impl ChannelArrayRequester for Recorder {
    fn channel_array_connect(&self, status: &Status, _array: &ChannelArray, array: Option<ArrayHandle>) {
        if let Some(a) = array {
            self.arrays.lock().unwrap().push(a);
        }
        self.status("array_connect", status);
    }

    fn get_array_done(&self, status: &Status, _array: &ChannelArray) {
        self.status("get_array_done", status);
    }

    fn put_array_done(&self, status: &Status, _array: &ChannelArray) {
        self.status("put_array_done", status);
    }

    fn set_length_done(&self, status: &Status, _array: &ChannelArray) {
        self.status("set_length_done", status);
    }
}

impl ChannelPutGetRequester for Recorder {
    fn channel_put_get_connect(
        &self,
        status: &Status,
        _put_get: &ChannelPutGet,
        put: Option<StructureHandle>,
        get: Option<StructureHandle>,
    ) {
        let mut structures = self.structures.lock().unwrap();
        structures.extend(put);
        structures.extend(get);
        drop(structures);
        self.status("put_get_connect", status);
    }

    fn put_get_done(&self, status: &Status, _put_get: &ChannelPutGet) {
        self.status("put_get_done", status);
    }

    fn get_put_done(&self, status: &Status, _put_get: &ChannelPutGet) {
        self.status("get_put_done", status);
    }

    fn get_get_done(&self, status: &Status, _put_get: &ChannelPutGet) {
        self.status("get_get_done", status);
    }
}

impl ChannelProcessRequester for Recorder {
    fn channel_process_connect(&self, status: &Status, _process: &ChannelProcess) {
        self.status("process_connect", status);
    }

    fn process_done(&self, status: &Status, _process: &ChannelProcess) {
        self.status("process_done", status);
    }
}

impl ChannelRpcRequester for Recorder {
    fn channel_rpc_connect(&self, status: &Status, _rpc: &ChannelRpc) {
        self.status("rpc_connect", status);
    }

    fn request_done(&self, status: &Status, _rpc: &ChannelRpc, response: Option<Box<dyn PvStructure>>) {
        let got = response.is_some();
        if let Some(r) = response {
            self.responses.lock().unwrap().push(r);
        }
        self.status("rpc_done", status);
        if !got {
            self.events.lock().unwrap().push("rpc_done without response".into());
        }
    }
}

impl MonitorRequester for Recorder {
    fn monitor_connect(&self, status: &Status, _monitor: &ChannelMonitor, structure: Option<StructureHandle>) {
        if let Some(s) = structure {
            self.structures.lock().unwrap().push(s);
        }
        self.status("monitor_connect", status);
    }

    fn monitor_event(&self, _monitor: &ChannelMonitor, overrun: &BitSet) {
        let overrun: Vec<usize> = overrun.iter().collect();
        self.push("monitor_event", format!("overrun {overrun:?}"));
    }

    fn unlisten(&self, _monitor: &ChannelMonitor) {
        self.push("unlisten", "by server".into());
    }
}

impl GetFieldRequester for Recorder {
    fn get_done(&self, status: &Status, field: Option<Arc<dyn FieldDesc>>) {
        match field {
            Some(f) => {
                let id = f.type_id();
                self.fields.lock().unwrap().push(f);
                self.push("get_field_done", format!("{:?} {id}", status.kind));
            }
            None => self.status("get_field_done", status),
        }
    }
}

// ---------------------------------------------------------------------------
// server side

pub fn server_message(command: Command, body: impl FnOnce(&mut BytesMut)) -> (MessageHeader, Bytes) {
    let mut payload = BytesMut::new();
    body(&mut payload);
    let header = MessageHeader::server(command, payload.len() as u32);
    (header, payload.freeze())
}

pub fn create_response(cid: u32, sid: u32, status: &Status) -> (MessageHeader, Bytes) {
    server_message(Command::CreateChannel, |buf| {
        buf.put_u32(cid);
        buf.put_u32(sid);
        status.serialize(buf);
    })
}

pub fn request_response(
    command: Command,
    ioid: u32,
    qos: QoS,
    status: &Status,
    data: &[u8],
) -> (MessageHeader, Bytes) {
    server_message(command, |buf| {
        buf.put_u32(ioid);
        buf.put_u8(qos.bits());
        status.serialize(buf);
        buf.put_slice(data);
    })
}

/// A get/put value: bitset selecting every field, then the field values.
pub fn full_value(values: &[i32]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let all: BitSet = std::iter::once(0).collect();
    all.serialize(&mut buf);
    for v in values {
        buf.put_i32(*v);
    }
    buf.to_vec()
}

/// A monitor update: changed bitmap, the changed values, overrun bitmap.
pub fn monitor_update(ioid: u32, changed: &[usize], values: &[i32], overrun: &[usize]) -> (MessageHeader, Bytes) {
    server_message(Command::Monitor, |buf| {
        buf.put_u32(ioid);
        buf.put_u8(QoS::DEFAULT.bits());
        changed.iter().copied().collect::<BitSet>().serialize(buf);
        for v in values {
            buf.put_i32(*v);
        }
        overrun.iter().copied().collect::<BitSet>().serialize(buf);
    })
}

/// A get-field answer; `fields` is the introspection byte of a successful one.
pub fn get_field_response(ioid: u32, status: &Status, fields: Option<u8>) -> (MessageHeader, Bytes) {
    server_message(Command::GetField, |buf| {
        buf.put_u32(ioid);
        status.serialize(buf);
        if let Some(n) = fields {
            buf.put_u8(n);
        }
    })
}

pub fn create_channel_cid(sent: &Sent) -> u32 {
    assert_eq!(sent.header.command, Command::CreateChannel);
    let mut payload = sent.payload.clone();
    assert_eq!(payload.get_u16(), 1);
    let cid = get_u32(&mut payload).expect("cid");
    let _name = read_string(&mut payload).expect("name");
    cid
}

// ---------------------------------------------------------------------------
// harness

pub struct Harness {
    pub context: Arc<Context>,
    pub provider: Arc<LoopbackProvider>,
    pub search: Arc<RecordingSearch>,
    pub dispatcher: ResponseDispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ClientConfig {
            create_channel_timeout_ms: 0,
            ..ClientConfig::default()
        })
    }

    pub fn with_config(config: ClientConfig) -> Self {
        init_tracing();
        let provider = Arc::new(LoopbackProvider::default());
        let search = Arc::new(RecordingSearch::default());
        let context = Context::new(config, provider.clone(), search.clone());
        let dispatcher = ResponseDispatcher::new(&context);
        Self {
            context,
            provider,
            search,
            dispatcher,
        }
    }

    pub fn channel(&self, name: &str) -> (Arc<Channel>, Arc<Recorder>) {
        let recorder = Recorder::new();
        let channel = self
            .context
            .create_channel(name, recorder.clone(), None, Vec::new())
            .expect("channel");
        (channel, recorder)
    }

    pub fn deliver(&self, transport: &LoopbackTransport, message: (MessageHeader, Bytes)) {
        let (header, payload) = message;
        self.dispatcher.dispatch(&transport.as_dyn(), &header, payload);
    }

    /// Resolves `channel` to `address` and completes the create with `sid`.
    pub fn connect(&self, channel: &Channel, address: SocketAddr, sid: u32) -> Arc<LoopbackTransport> {
        self.search.answer(channel.id(), address);
        let transport = self.provider.transport(address).expect("transport acquired");
        let sent = transport.pump();
        let create = sent
            .iter()
            .find(|m| m.header.command == Command::CreateChannel)
            .expect("create channel sent");
        assert_eq!(create_channel_cid(create), channel.id());
        self.deliver(&transport, create_response(channel.id(), sid, &Status::ok()));
        transport
    }

    /// Pumps `transport` and answers every INIT with `fields` i32 fields.
    pub fn answer_inits(&self, transport: &LoopbackTransport, fields: u8) -> Vec<u32> {
        let mut ioids = Vec::new();
        for sent in transport.pump() {
            if matches!(sent.header.command, Command::CreateChannel | Command::GetField) {
                continue;
            }
            let header = sent.request_header();
            if header.qos.is_set(QoS::INIT) {
                ioids.push(header.ioid);
                let data: &[u8] = if sent.header.command == Command::PutGet {
                    &[fields, fields]
                } else {
                    std::slice::from_ref(&fields)
                };
                self.deliver(
                    transport,
                    request_response(sent.header.command, header.ioid, QoS::INIT, &Status::ok(), data),
                );
            }
        }
        ioids
    }
}
