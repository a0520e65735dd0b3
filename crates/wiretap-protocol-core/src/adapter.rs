use crate::event::PacketDispatcher;
use crate::packets::{Direction, FieldError, FieldValue, Packet, ShapeTable};
use crate::pipeline::Frame;
use crate::session::Connection;
use crate::version::VersionDescriptor;
use std::sync::Arc;
use wiretap_types::{GameProfile, TextComponent};

/// Everything the interception layer needs from one server release.
///
/// Implementations differ in where they splice, which protocol they speak and which
/// packets they recognize. All operations tolerate a connection that is no longer
/// live and do nothing in that case.
pub trait ConnectionAdapter: Send + Sync {
    /// The release this adapter was written for.
    fn version(&self) -> VersionDescriptor;

    /// Protocol number clients of this release announce in their handshake.
    fn protocol_version(&self) -> i32;

    fn shapes(&self) -> &'static ShapeTable;

    fn dispatcher(&self) -> &Arc<PacketDispatcher>;

    /// Write packets to the player in order, through the interceptor if spliced.
    fn send(&self, connection: &Connection, packets: Vec<Packet>);

    /// Splice the interceptor into the connection. Calling it twice is the same as once.
    fn register(&self, connection: &Connection);

    /// Take the interceptor back out. A no-op when there is none.
    fn unregister(&self, connection: &Connection);

    /// The login-phase frame that completes a login, sent before the player is attached.
    fn login_success(&self, profile: &GameProfile) -> Frame;

    /// A system chat line in this release's layout.
    fn system_message(&self, message: &TextComponent, overlay: bool)
        -> Result<Packet, FieldError>;

    /// Build an outbound packet by shape name.
    fn packet(&self, shape: &str, fields: &[(&str, FieldValue)]) -> Result<Packet, FieldError> {
        self.shapes().build(Direction::Outbound, shape, fields)
    }
}

impl std::fmt::Debug for dyn ConnectionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionAdapter")
            .field("version", &self.version())
            .field("protocol_version", &self.protocol_version())
            .finish()
    }
}
