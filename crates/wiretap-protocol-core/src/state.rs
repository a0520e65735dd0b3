/// The state of a client connection before and after login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Status,
    Login,
    Play,
}

impl ConnectionState {
    pub fn from_handshake_next(next: i32) -> Option<Self> {
        match next {
            1 => Some(ConnectionState::Status),
            2 => Some(ConnectionState::Login),
            _ => None,
        }
    }
}
