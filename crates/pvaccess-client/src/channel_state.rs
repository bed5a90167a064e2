//! Channel connection state machine.
//!
//! [`ChannelState`] holds the mutable connection fields of a channel and decides
//! transitions. It performs no I/O: each transition returns the [`Effect`]s the
//! owning [`crate::Channel`] must carry out once it has released the state lock.
//!
//! ```text
//!  NEVER_CONNECTED --search--> bound --create--> CONNECTED <--> DISCONNECTED
//!        |                                          |               |
//!        +-------------------destroy----------------+---------------+--> DESTROYED
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::requester::MessageType;
use crate::retry::RetryPolicy;
use crate::status::Status;
use crate::transport::{same_transport, Transport};

/// Server channel id before the server assigned one.
pub const UNASSIGNED_SERVER_ID: u32 = 0xFFFF_FFFF;

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, never connected so far.
    NeverConnected,
    /// Bound to a transport with a server-side id.
    Connected,
    /// Lost its transport; requests stay registered.
    Disconnected,
    /// Terminal.
    Destroyed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::NeverConnected => "NEVER_CONNECTED",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Destroyed => "DESTROYED",
        })
    }
}

/// Work a transition asks the channel to perform.
pub(crate) enum Effect {
    NotifyState(ConnectionState),
    /// Report `status` to every registered request; `destroy` also destroys them.
    FailPendingIo { status: Status, destroy: bool },
    /// Re-initialise registered requests if a resubscription is owed.
    Resubscribe(Arc<dyn Transport>),
    MarkResubscribe,
    EnqueueCreate(Arc<dyn Transport>),
    EnqueueDestroy(Arc<dyn Transport>, u32),
    Release(Arc<dyn Transport>),
    RegisterSearch,
    UnregisterSearch,
    SearchFixed(SocketAddr),
    ArmCreateTimer,
    CancelCreateTimer,
    ScheduleSearch(Duration),
    CancelSearchTimer,
    Message(String, MessageType),
    UnregisterContext,
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::NotifyState(s) => write!(f, "NotifyState({s})"),
            Effect::FailPendingIo { status, destroy } => {
                write!(f, "FailPendingIo({}, destroy={destroy})", status.message)
            }
            Effect::Resubscribe(t) => write!(f, "Resubscribe({})", t.remote_address()),
            Effect::MarkResubscribe => f.write_str("MarkResubscribe"),
            Effect::EnqueueCreate(t) => write!(f, "EnqueueCreate({})", t.remote_address()),
            Effect::EnqueueDestroy(t, sid) => {
                write!(f, "EnqueueDestroy({}, sid={sid})", t.remote_address())
            }
            Effect::Release(t) => write!(f, "Release({})", t.remote_address()),
            Effect::RegisterSearch => f.write_str("RegisterSearch"),
            Effect::UnregisterSearch => f.write_str("UnregisterSearch"),
            Effect::SearchFixed(addr) => write!(f, "SearchFixed({addr})"),
            Effect::ArmCreateTimer => f.write_str("ArmCreateTimer"),
            Effect::CancelCreateTimer => f.write_str("CancelCreateTimer"),
            Effect::ScheduleSearch(d) => write!(f, "ScheduleSearch({d:?})"),
            Effect::CancelSearchTimer => f.write_str("CancelSearchTimer"),
            Effect::Message(text, kind) => write!(f, "Message({kind:?}, {text})"),
            Effect::UnregisterContext => f.write_str("UnregisterContext"),
        }
    }
}

/// Shortest wait before a fixed server address is tried again.
pub const FIXED_ADDRESS_RETRY_FLOOR: Duration = Duration::from_millis(200);

/// Outcome of a search response check.
#[derive(Debug)]
pub(crate) enum SearchDecision {
    /// Acquire a transport to the address and create the channel on it.
    Acquire,
    /// Nothing to do.
    Ignore,
    /// Another server answered for the same name.
    Collision(Vec<Effect>),
}

/// Mutable connection fields of a channel.
pub(crate) struct ChannelState {
    name: String,
    fixed_address: Option<SocketAddr>,
    state: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
    server_channel_id: u32,
    allow_creation: bool,
    failed_attempts: u32,
}

impl ChannelState {
    pub(crate) fn new(name: impl Into<String>, fixed_address: Option<SocketAddr>) -> Self {
        Self {
            name: name.into(),
            fixed_address,
            state: ConnectionState::NeverConnected,
            transport: None,
            server_channel_id: UNASSIGNED_SERVER_ID,
            allow_creation: false,
            failed_attempts: 0,
        }
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn server_channel_id(&self) -> u32 {
        self.server_channel_id
    }

    pub(crate) fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.clone()
    }

    pub(crate) fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Transport to send on, or why there is none.
    pub(crate) fn check_and_get_transport(&self) -> Result<Arc<dyn Transport>> {
        match (self.state, &self.transport) {
            (ConnectionState::Destroyed, _) => Err(ClientError::ChannelDestroyed {
                name: self.name.clone(),
            }),
            (ConnectionState::Connected, Some(transport)) => Ok(Arc::clone(transport)),
            _ => Err(ClientError::NotConnected {
                name: self.name.clone(),
            }),
        }
    }

    pub(crate) fn initiate_search(&mut self) -> Vec<Effect> {
        self.allow_creation = true;
        match self.fixed_address {
            Some(addr) => vec![Effect::SearchFixed(addr)],
            None => vec![Effect::RegisterSearch],
        }
    }

    /// Application request to (re)connect.
    pub(crate) fn connect(&mut self) -> Result<Vec<Effect>> {
        match self.state {
            ConnectionState::Destroyed => Err(ClientError::ChannelDestroyed {
                name: self.name.clone(),
            }),
            ConnectionState::Connected => Ok(Vec::new()),
            _ => {
                self.failed_attempts = 0;
                Ok(self.initiate_search())
            }
        }
    }

    /// Delayed retry fired.
    pub(crate) fn retry_search(&mut self) -> Vec<Effect> {
        match self.state {
            ConnectionState::NeverConnected | ConnectionState::Disconnected
                if self.transport.is_none() =>
            {
                self.initiate_search()
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn search_response(&self, address: SocketAddr) -> SearchDecision {
        if self.state == ConnectionState::Destroyed {
            return SearchDecision::Ignore;
        }
        if let Some(transport) = &self.transport {
            let bound = transport.remote_address();
            if bound != address {
                return SearchDecision::Collision(vec![Effect::Message(
                    format!(
                        "More than one channel with name '{}' detected, additional response from: {address}",
                        self.name
                    ),
                    MessageType::Warning,
                )]);
            }
            if !self.allow_creation {
                return SearchDecision::Ignore;
            }
        }
        SearchDecision::Acquire
    }

    /// A transport to the resolved server was acquired.
    pub(crate) fn create_channel(&mut self, transport: Arc<dyn Transport>) -> Vec<Effect> {
        let same_as_bound = self
            .transport
            .as_ref()
            .is_some_and(|bound| same_transport(bound, &transport));

        if self.state == ConnectionState::Destroyed || !self.allow_creation {
            return if same_as_bound {
                Vec::new()
            } else {
                vec![Effect::Release(transport)]
            };
        }
        self.allow_creation = false;

        if same_as_bound {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if let Some(previous) = self.transport.take() {
            effects.push(Effect::FailPendingIo {
                status: Status::channel_disconnected(),
                destroy: false,
            });
            effects.push(Effect::Release(previous));
        }
        self.transport = Some(Arc::clone(&transport));
        effects.push(Effect::EnqueueCreate(transport));
        effects.push(Effect::ArmCreateTimer);
        effects
    }

    /// The server confirmed the channel with id `sid`.
    pub(crate) fn connection_completed(&mut self, sid: u32) -> Vec<Effect> {
        if self.state == ConnectionState::Destroyed {
            return vec![Effect::CancelCreateTimer];
        }
        let Some(transport) = self.transport.clone() else {
            return vec![
                Effect::CancelCreateTimer,
                Effect::Message(
                    format!("create channel response for '{}' without a transport", self.name),
                    MessageType::Warning,
                ),
            ];
        };

        self.server_channel_id = sid;
        self.failed_attempts = 0;
        self.allow_creation = false;

        let mut effects = vec![Effect::Resubscribe(transport)];
        if self.state != ConnectionState::Connected {
            self.state = ConnectionState::Connected;
            effects.push(Effect::NotifyState(ConnectionState::Connected));
        }
        effects.push(Effect::CancelCreateTimer);
        effects.push(Effect::CancelSearchTimer);
        effects
    }

    /// Search, transport acquisition or create failed (or timed out).
    pub(crate) fn create_channel_failed(&mut self, policy: &RetryPolicy) -> Vec<Effect> {
        if matches!(
            self.state,
            ConnectionState::Destroyed | ConnectionState::Connected
        ) {
            return Vec::new();
        }
        let mut effects = vec![Effect::CancelCreateTimer];
        if let Some(transport) = self.transport.take() {
            effects.push(Effect::Release(transport));
        }
        self.failed_attempts = self.failed_attempts.saturating_add(1);

        match policy.next_delay(self.failed_attempts) {
            None => {
                self.allow_creation = false;
                effects.push(Effect::Message(
                    format!(
                        "giving up on channel '{}' after {} failed attempts",
                        self.name, self.failed_attempts
                    ),
                    MessageType::Error,
                ));
            }
            // a fixed address answers synchronously, so its retries always wait
            Some(delay) if self.fixed_address.is_some() => {
                effects.push(Effect::ScheduleSearch(delay.max(FIXED_ADDRESS_RETRY_FLOOR)));
            }
            Some(delay) if delay.is_zero() => effects.extend(self.initiate_search()),
            Some(delay) => effects.push(Effect::ScheduleSearch(delay)),
        }
        effects
    }

    pub(crate) fn transport_closed(&mut self) -> Vec<Effect> {
        match self.state {
            ConnectionState::Destroyed => Vec::new(),
            ConnectionState::Connected => {
                self.state = ConnectionState::Disconnected;
                let mut effects = vec![
                    Effect::NotifyState(ConnectionState::Disconnected),
                    Effect::FailPendingIo {
                        status: Status::channel_disconnected(),
                        destroy: false,
                    },
                ];
                if let Some(transport) = self.transport.take() {
                    effects.push(Effect::Release(transport));
                }
                effects.extend(self.initiate_search());
                effects
            }
            _ => match self.transport.take() {
                Some(transport) => {
                    let mut effects = vec![Effect::CancelCreateTimer, Effect::Release(transport)];
                    effects.extend(self.initiate_search());
                    effects
                }
                None => Vec::new(),
            },
        }
    }

    pub(crate) fn transport_responsive(&mut self, transport: &Arc<dyn Transport>) -> Vec<Effect> {
        let same = self
            .transport
            .as_ref()
            .is_some_and(|bound| same_transport(bound, transport));
        if self.state != ConnectionState::Disconnected || !same {
            return Vec::new();
        }
        let mut effects = vec![Effect::MarkResubscribe];
        effects.extend(self.connection_completed(self.server_channel_id));
        effects
    }

    pub(crate) fn transport_unresponsive(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        self.state = ConnectionState::Disconnected;
        vec![
            Effect::NotifyState(ConnectionState::Disconnected),
            Effect::FailPendingIo {
                status: Status::channel_disconnected(),
                destroy: false,
            },
        ]
    }

    /// Application request to drop the server-side channel without re-searching.
    pub(crate) fn disconnect(&mut self) -> Result<Vec<Effect>> {
        match self.state {
            ConnectionState::Destroyed => Err(ClientError::ChannelDestroyed {
                name: self.name.clone(),
            }),
            ConnectionState::Connected => {
                self.state = ConnectionState::Disconnected;
                self.allow_creation = false;
                let mut effects = vec![
                    Effect::UnregisterSearch,
                    Effect::CancelCreateTimer,
                    Effect::CancelSearchTimer,
                    Effect::NotifyState(ConnectionState::Disconnected),
                    Effect::FailPendingIo {
                        status: Status::channel_disconnected(),
                        destroy: false,
                    },
                ];
                if let Some(transport) = self.transport.take() {
                    effects.push(Effect::EnqueueDestroy(
                        Arc::clone(&transport),
                        self.server_channel_id,
                    ));
                    effects.push(Effect::Release(transport));
                }
                Ok(effects)
            }
            _ => Ok(Vec::new()),
        }
    }

    pub(crate) fn destroy(&mut self) -> Result<Vec<Effect>> {
        if self.state == ConnectionState::Destroyed {
            return Err(ClientError::AlreadyDestroyed {
                name: self.name.clone(),
            });
        }
        let was_connected = self.state == ConnectionState::Connected;
        self.state = ConnectionState::Destroyed;
        self.allow_creation = false;

        let mut effects = vec![
            Effect::UnregisterSearch,
            Effect::CancelCreateTimer,
            Effect::CancelSearchTimer,
            Effect::FailPendingIo {
                status: Status::channel_destroyed(),
                destroy: true,
            },
        ];
        if let Some(transport) = self.transport.take() {
            if was_connected {
                effects.push(Effect::NotifyState(ConnectionState::Disconnected));
                effects.push(Effect::EnqueueDestroy(
                    Arc::clone(&transport),
                    self.server_channel_id,
                ));
            }
            effects.push(Effect::Release(transport));
        }
        effects.push(Effect::NotifyState(ConnectionState::Destroyed));
        effects.push(Effect::UnregisterContext);
        Ok(effects)
    }
}

/// Number of owners sharing a channel. Starts at one for the creator.
#[derive(Debug)]
pub(crate) struct OwnerCount(AtomicUsize);

impl OwnerCount {
    pub(crate) fn new() -> Self {
        Self(AtomicUsize::new(1))
    }

    pub(crate) fn acquire(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one owner. Returns true when no owner is left.
    pub(crate) fn release(&self) -> bool {
        let previous = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        previous <= 1
    }

    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageWriter;
    use crate::pvdata::{FieldDesc, IntrospectionRegistry, PvArray, PvRequest, PvStructure};
    use crate::transport::TransportSender;
    use bytes::{Buf, BytesMut};

    struct NoRegistry;

    impl IntrospectionRegistry for NoRegistry {
        fn serialize_request(&self, _buf: &mut BytesMut, _request: &PvRequest) {}
        fn deserialize_structure(&self, _buf: &mut dyn Buf) -> Result<Box<dyn PvStructure>> {
            Err(ClientError::ContextGone)
        }
        fn deserialize_array(&self, _buf: &mut dyn Buf) -> Result<Box<dyn PvArray>> {
            Err(ClientError::ContextGone)
        }
        fn serialize_structure_full(&self, _buf: &mut BytesMut, _value: &dyn PvStructure) {}
        fn deserialize_structure_full(&self, _buf: &mut dyn Buf) -> Result<Box<dyn PvStructure>> {
            Err(ClientError::ContextGone)
        }
        fn deserialize_field(&self, _buf: &mut dyn Buf) -> Result<Arc<dyn FieldDesc>> {
            Err(ClientError::ContextGone)
        }
    }

    struct FakeTransport(SocketAddr);

    impl Transport for FakeTransport {
        fn remote_address(&self) -> SocketAddr {
            self.0
        }
        fn minor_revision(&self) -> u8 {
            0
        }
        fn enqueue_send_request(&self, sender: Arc<dyn TransportSender>) -> Result<()> {
            sender.send(&mut MessageWriter::new());
            Ok(())
        }
        fn introspection(&self) -> Arc<dyn IntrospectionRegistry> {
            Arc::new(NoRegistry)
        }
        fn release(&self, _client_id: u32) {}
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn transport(port: u16) -> Arc<dyn Transport> {
        Arc::new(FakeTransport(addr(port)))
    }

    fn connected(t: &Arc<dyn Transport>) -> ChannelState {
        let mut state = ChannelState::new("foo", None);
        state.initiate_search();
        state.create_channel(Arc::clone(t));
        state.connection_completed(7);
        state
    }

    fn names(effects: &[Effect]) -> Vec<String> {
        effects
            .iter()
            .map(|e| format!("{e:?}").split('(').next().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_search_then_create_then_connect() {
        let mut state = ChannelState::new("foo", None);
        assert_eq!(names(&state.initiate_search()), vec!["RegisterSearch"]);
        assert!(matches!(state.search_response(addr(1)), SearchDecision::Acquire));

        let t = transport(1);
        let effects = state.create_channel(Arc::clone(&t));
        assert_eq!(names(&effects), vec!["EnqueueCreate", "ArmCreateTimer"]);
        assert_eq!(state.connection_state(), ConnectionState::NeverConnected);
        assert!(state.check_and_get_transport().is_err());

        let effects = state.connection_completed(7);
        assert_eq!(
            names(&effects),
            vec![
                "Resubscribe",
                "NotifyState",
                "CancelCreateTimer",
                "CancelSearchTimer"
            ]
        );
        assert_eq!(state.connection_state(), ConnectionState::Connected);
        assert_eq!(state.server_channel_id(), 7);
        assert!(state.check_and_get_transport().is_ok());
    }

    #[test]
    fn test_duplicate_create_is_suppressed() {
        let mut state = ChannelState::new("foo", None);
        state.initiate_search();
        let t = transport(1);
        state.create_channel(Arc::clone(&t));
        assert!(state.create_channel(Arc::clone(&t)).is_empty());
        // a different transport without a new search is released
        let other = transport(2);
        assert_eq!(names(&state.create_channel(other)), vec!["Release"]);
    }

    #[test]
    fn test_fixed_address_skips_discovery() {
        let mut state = ChannelState::new("foo", Some(addr(5)));
        let effects = state.initiate_search();
        assert!(matches!(effects.as_slice(), [Effect::SearchFixed(a)] if *a == addr(5)));
    }

    #[test]
    fn test_name_collision_only_warns() {
        let t = transport(1);
        let state = connected(&t);
        match state.search_response(addr(2)) {
            SearchDecision::Collision(effects) => {
                assert!(matches!(
                    effects.as_slice(),
                    [Effect::Message(text, MessageType::Warning)] if text.contains("foo")
                ));
            }
            other => panic!("unexpected decision {other:?}"),
        }
        assert!(matches!(state.search_response(addr(1)), SearchDecision::Ignore));
    }

    #[test]
    fn test_transport_closed_releases_and_searches() {
        let t = transport(1);
        let mut state = connected(&t);
        let effects = state.transport_closed();
        assert_eq!(
            names(&effects),
            vec!["NotifyState", "FailPendingIo", "Release", "RegisterSearch"]
        );
        assert_eq!(state.connection_state(), ConnectionState::Disconnected);
        assert!(state.transport().is_none());
    }

    #[test]
    fn test_unresponsive_then_responsive_fast_path() {
        let t = transport(1);
        let mut state = connected(&t);
        let effects = state.transport_unresponsive();
        assert_eq!(names(&effects), vec!["NotifyState", "FailPendingIo"]);
        assert!(state.transport().is_some());

        // a different transport does not revive the channel
        assert!(state.transport_responsive(&transport(1)).is_empty());

        let effects = state.transport_responsive(&t);
        assert_eq!(
            names(&effects),
            vec![
                "MarkResubscribe",
                "Resubscribe",
                "NotifyState",
                "CancelCreateTimer",
                "CancelSearchTimer"
            ]
        );
        assert_eq!(state.connection_state(), ConnectionState::Connected);
        assert_eq!(state.server_channel_id(), 7);
    }

    #[test]
    fn test_closed_while_creating_releases_and_searches() {
        let mut state = ChannelState::new("foo", None);
        state.initiate_search();
        state.create_channel(transport(1));
        let effects = state.transport_closed();
        assert_eq!(
            names(&effects),
            vec!["CancelCreateTimer", "Release", "RegisterSearch"]
        );
        assert!(state.create_channel(transport(1)).len() == 2);
    }

    #[test]
    fn test_create_failed_retries_immediately_by_default() {
        let mut state = ChannelState::new("foo", None);
        state.initiate_search();
        state.create_channel(transport(1));
        let effects = state.create_channel_failed(&RetryPolicy::unbounded());
        assert_eq!(
            names(&effects),
            vec!["CancelCreateTimer", "Release", "RegisterSearch"]
        );
        assert_eq!(state.failed_attempts(), 1);
    }

    #[test]
    fn test_create_failed_with_fixed_address_is_scheduled() {
        let mut state = ChannelState::new("foo", Some(addr(5)));
        state.initiate_search();
        let effects = state.create_channel_failed(&RetryPolicy::unbounded());
        assert!(matches!(
            effects.as_slice(),
            [Effect::CancelCreateTimer, Effect::ScheduleSearch(d)] if *d == FIXED_ADDRESS_RETRY_FLOOR
        ));

        let slow = RetryPolicy::exponential(None, Duration::from_secs(2), Duration::from_secs(2));
        let effects = state.create_channel_failed(&slow);
        assert!(matches!(
            effects.as_slice(),
            [Effect::CancelCreateTimer, Effect::ScheduleSearch(d)] if *d == Duration::from_secs(2)
        ));
    }

    #[test]
    fn test_create_failed_exhausts_policy() {
        let policy = RetryPolicy {
            max_attempts: Some(1),
            ..RetryPolicy::unbounded()
        };
        let mut state = ChannelState::new("foo", None);
        state.initiate_search();
        state.create_channel_failed(&policy);
        let effects = state.create_channel_failed(&policy);
        assert!(matches!(
            effects.as_slice(),
            [Effect::CancelCreateTimer, Effect::Message(_, MessageType::Error)]
        ));
        // connect restarts the cycle
        assert_eq!(names(&state.connect().unwrap()), vec!["RegisterSearch"]);
        assert_eq!(state.failed_attempts(), 0);
    }

    #[test]
    fn test_completion_resets_attempts_and_duplicate_does_not_notify() {
        let policy = RetryPolicy::unbounded();
        let mut state = ChannelState::new("foo", None);
        state.initiate_search();
        state.create_channel_failed(&policy);
        state.create_channel(transport(1));
        state.connection_completed(3);
        assert_eq!(state.failed_attempts(), 0);
        let effects = state.connection_completed(3);
        assert!(!names(&effects).contains(&"NotifyState".to_string()));
    }

    #[test]
    fn test_destroy_connected_channel() {
        let t = transport(1);
        let mut state = connected(&t);
        let effects = state.destroy().unwrap();
        assert_eq!(
            names(&effects),
            vec![
                "UnregisterSearch",
                "CancelCreateTimer",
                "CancelSearchTimer",
                "FailPendingIo",
                "NotifyState",
                "EnqueueDestroy",
                "Release",
                "NotifyState",
                "UnregisterContext"
            ]
        );
        assert!(matches!(
            state.destroy(),
            Err(ClientError::AlreadyDestroyed { .. })
        ));
        assert!(matches!(
            state.check_and_get_transport(),
            Err(ClientError::ChannelDestroyed { .. })
        ));
        assert!(state.connect().is_err());
        assert!(state.transport_closed().is_empty());
    }

    #[test]
    fn test_disconnect_sends_destroy_without_search() {
        let t = transport(1);
        let mut state = connected(&t);
        let effects = state.disconnect().unwrap();
        let names = names(&effects);
        assert!(names.contains(&"EnqueueDestroy".to_string()));
        assert!(!names.contains(&"RegisterSearch".to_string()));
        assert_eq!(state.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_owner_count() {
        let owners = OwnerCount::new();
        owners.acquire();
        assert_eq!(owners.count(), 2);
        assert!(!owners.release());
        assert!(owners.release());
        assert!(owners.release());
        assert_eq!(owners.count(), 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::NeverConnected.to_string(), "NEVER_CONNECTED");
        assert_eq!(ConnectionState::Destroyed.to_string(), "DESTROYED");
    }
}
