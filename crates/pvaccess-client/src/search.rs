//! Name resolution collaborator boundary.

use std::sync::Arc;

use crate::channel::Channel;

/// Resolves channel names to server addresses.
///
/// Once a server answers for a registered channel the manager calls
/// [`Channel::search_response`] with the server's minor revision and address.
pub trait SearchManager: Send + Sync {
    /// Starts searching for `channel`.
    fn register(&self, channel: Arc<Channel>);

    /// Stops searching for the channel with client id `channel_id`.
    fn unregister(&self, channel_id: u32);
}
