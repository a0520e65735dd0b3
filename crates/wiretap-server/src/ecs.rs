use std::sync::Arc;
use std::time::Instant;
use wiretap::Connection;
use wiretap_types::{GameProfile, Location};

/// Server-assigned entity id.
pub struct EntityId(pub i32);

pub struct Profile(pub GameProfile);

/// The interception-layer session for this player.
pub struct Session(pub Arc<Connection>);

/// Last location the client reported.
pub struct PlayerLocation(pub Location);

/// Keep-alive tracking for a player connection.
pub struct KeepAlive {
    pub last_sent: Instant,
    /// Id of the keep-alive the client has not answered yet.
    pub pending: Option<i64>,
}

impl KeepAlive {
    pub fn new() -> Self {
        Self {
            last_sent: Instant::now(),
            pending: None,
        }
    }
}
