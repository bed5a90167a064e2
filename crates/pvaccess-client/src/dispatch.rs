//! Inbound message routing.
//!
//! A transport hands every complete server message to a [`ResponseDispatcher`]
//! from its read path. Create-channel responses are routed by client channel
//! id, per-request responses by request id.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::error::Result;
use crate::protocol::{get_u32, Command, MessageHeader};
use crate::status::Status;
use crate::transport::Transport;

/// Routes responses to the channels and requests of one context.
#[derive(Debug, Clone)]
pub struct ResponseDispatcher {
    context: Weak<Context>,
}

impl ResponseDispatcher {
    /// Creates a dispatcher for `context`. The dispatcher does not keep the
    /// context alive.
    pub fn new(context: &Arc<Context>) -> Self {
        Self {
            context: Arc::downgrade(context),
        }
    }

    /// Handles one message received on `transport`. Malformed messages are
    /// logged and dropped.
    pub fn dispatch(&self, transport: &Arc<dyn Transport>, header: &MessageHeader, payload: Bytes) {
        if !header.is_from_server() {
            warn!(command = ?header.command, addr = %transport.remote_address(), "dropping client-direction message");
            return;
        }
        if let Err(e) = self.route(transport, header.command, payload) {
            warn!(
                command = ?header.command,
                addr = %transport.remote_address(),
                error = %e,
                "dropping malformed message"
            );
        }
    }

    fn route(&self, transport: &Arc<dyn Transport>, command: Command, mut payload: Bytes) -> Result<()> {
        let Some(context) = self.context.upgrade() else {
            debug!(command = ?command, "context gone, message dropped");
            return Ok(());
        };
        match command {
            Command::CreateChannel => {
                let cid = get_u32(&mut payload)?;
                let sid = get_u32(&mut payload)?;
                let status = Status::deserialize(&mut payload)?;
                let Some(channel) = context.channel(cid) else {
                    debug!(cid, sid, "create channel response for unknown channel");
                    return Ok(());
                };
                if status.is_success() {
                    channel.connection_completed(sid);
                } else {
                    channel.report_create_failure(&status);
                    channel.create_channel_failed();
                }
            }
            Command::DestroyChannel => {
                let sid = get_u32(&mut payload)?;
                let cid = get_u32(&mut payload)?;
                trace!(cid, sid, "destroy channel acknowledged");
            }
            Command::Get
            | Command::GetField
            | Command::Monitor
            | Command::Put
            | Command::PutGet
            | Command::Array
            | Command::Process
            | Command::Rpc => {
                let ioid = get_u32(&mut payload)?;
                match context.response_request(ioid) {
                    Some(request) => request.response(transport, &mut payload),
                    None => debug!(ioid, command = ?command, "response for unknown request"),
                }
            }
            Command::DestroyRequest => trace!("destroy request acknowledged"),
        }
        Ok(())
    }
}
