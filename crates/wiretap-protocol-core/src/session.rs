use crate::interceptor::PacketInterceptor;
use crate::pipeline::Channel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use wiretap_types::GameProfile;

/// One player's session as seen by the interception layer.
///
/// Holds the channel weakly: once the socket side lets go of it the connection is
/// no longer live, even if nobody called [`Connection::mark_disconnected`].
#[derive(Debug)]
pub struct Connection {
    profile: GameProfile,
    live: AtomicBool,
    channel: Weak<Channel>,
    splice: Mutex<Option<Arc<PacketInterceptor>>>,
}

impl Connection {
    pub fn new(profile: GameProfile, channel: &Arc<Channel>) -> Self {
        Self {
            profile,
            live: AtomicBool::new(true),
            channel: Arc::downgrade(channel),
            splice: Mutex::new(None),
        }
    }

    pub fn profile(&self) -> &GameProfile {
        &self.profile
    }

    /// True while the player is connected and the channel still accepts writes.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) && self.channel().is_some_and(|ch| ch.is_open())
    }

    /// Invalidate the connection. Later sends and splices become no-ops.
    pub fn mark_disconnected(&self) {
        self.live.store(false, Ordering::Release);
    }

    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.upgrade()
    }

    /// The interceptor currently spliced into this connection, if any.
    pub fn interceptor(&self) -> Option<Arc<PacketInterceptor>> {
        self.lock_splice().clone()
    }

    pub fn is_intercepted(&self) -> bool {
        self.lock_splice().is_some()
    }

    /// Serializes splice and unsplice for this connection.
    pub(crate) fn lock_splice(&self) -> MutexGuard<'_, Option<Arc<PacketInterceptor>>> {
        self.splice.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
