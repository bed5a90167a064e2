//! Transport collaborator boundary.
//!
//! A transport is a shared, ordered, reliable, message-framed connection to one
//! server. Many channels bind the same transport; the context's
//! [`TransportProvider`] hands them out and counts the references.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::Result;
use crate::protocol::MessageWriter;
use crate::pvdata::IntrospectionRegistry;

/// A shared connection to one server.
pub trait Transport: Send + Sync + 'static {
    /// Address of the connected server.
    fn remote_address(&self) -> SocketAddr;

    /// Minor protocol revision negotiated with the server.
    fn minor_revision(&self) -> u8;

    /// Queues a sender. The transport calls [`TransportSender::send`] from its write
    /// path, once per enqueue.
    ///
    /// # Returns
    /// An error if the transport is closed and can no longer send.
    fn enqueue_send_request(&self, sender: Arc<dyn TransportSender>) -> Result<()>;

    /// Structural (de)serialization registry bound to this connection.
    fn introspection(&self) -> Arc<dyn IntrospectionRegistry>;

    /// Drops the reference held by client `client_id`.
    fn release(&self, client_id: u32);
}

/// Anything that frames messages onto a transport.
pub trait TransportSender: Send + Sync {
    /// Frames this sender's message(s) into `control`.
    fn send(&self, control: &mut MessageWriter);
}

/// Connection events a transport delivers to every client bound to it.
pub trait TransportClient: Send + Sync {
    /// Id the client uses when acquiring and releasing transports.
    fn client_id(&self) -> u32;

    /// The connection was closed.
    fn transport_closed(&self);

    /// The connection was re-established to a different endpoint.
    fn transport_changed(&self);

    /// The connection answers again.
    fn transport_responsive(&self, transport: &Arc<dyn Transport>);

    /// The connection stopped answering but is not closed.
    fn transport_unresponsive(&self);
}

/// Transport pool owned by the context.
pub trait TransportProvider: Send + Sync {
    /// Returns a transport to `address`, connecting if needed, and records
    /// `client` as one of its users.
    ///
    /// # Arguments
    /// * `client` - Receives connection events until it releases the transport.
    /// * `address` - Server address.
    /// * `minor_revision` - Protocol revision announced by the server.
    /// * `priority` - Channel priority; transports are shared per priority.
    fn get_transport(
        &self,
        client: Arc<dyn TransportClient>,
        address: SocketAddr,
        minor_revision: u8,
        priority: i16,
    ) -> Result<Arc<dyn Transport>>;
}

/// Returns true if both handles point at the same transport object.
pub fn same_transport(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
