use crate::shapes::{self, SHAPES};
use bytes::BytesMut;
use std::sync::Arc;
use tracing::debug;
use wiretap_protocol_core::*;
use wiretap_types::{GameProfile, TextComponent};

/// Adapter for the 1.19 line (protocol 760).
pub struct V1_19Adapter {
    dispatcher: Arc<PacketDispatcher>,
}

impl V1_19Adapter {
    pub const VERSION: VersionDescriptor = VersionDescriptor::new(1, 19, 0);
    pub const PROTOCOL: i32 = 760;

    pub fn new(dispatcher: Arc<PacketDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Registry entry: 1.19 through 1.19.4.
    pub fn binding() -> AdapterBinding {
        AdapterBinding::new(Self::VERSION, Self::create).through(VersionDescriptor::new(1, 19, 4))
    }

    fn create(dispatcher: Arc<PacketDispatcher>) -> Arc<dyn ConnectionAdapter> {
        Arc::new(Self::new(dispatcher))
    }
}

impl ConnectionAdapter for V1_19Adapter {
    fn version(&self) -> VersionDescriptor {
        Self::VERSION
    }

    fn protocol_version(&self) -> i32 {
        Self::PROTOCOL
    }

    fn shapes(&self) -> &'static ShapeTable {
        &SHAPES
    }

    fn dispatcher(&self) -> &Arc<PacketDispatcher> {
        &self.dispatcher
    }

    fn send(&self, connection: &Connection, packets: Vec<Packet>) {
        splice::write_all(connection, packets);
    }

    fn register(&self, connection: &Connection) {
        if let Some(channel) = connection.channel() {
            if channel.protocol_version() != Self::PROTOCOL {
                debug!(
                    "{} speaks protocol {}, intercepting with 760 shapes",
                    connection.profile().name,
                    channel.protocol_version()
                );
            }
        }
        let profile = connection.profile().clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        splice::insert_interceptor(connection, splice::PACKET_HANDLER, move || {
            PacketInterceptor::new(profile, &SHAPES, dispatcher)
        });
    }

    fn unregister(&self, connection: &Connection) {
        splice::remove_interceptor(connection);
    }

    fn login_success(&self, profile: &GameProfile) -> Frame {
        let mut payload = BytesMut::new();
        write_uuid(&mut payload, &profile.uuid);
        write_string(&mut payload, &profile.name);
        write_varint(&mut payload, 0); // no properties in offline mode
        Frame::new(shapes::LOGIN_SUCCESS, payload)
    }

    fn system_message(
        &self,
        message: &TextComponent,
        overlay: bool,
    ) -> Result<Packet, FieldError> {
        self.packet(
            "SystemChat",
            &[
                ("content", FieldValue::String(message.to_json())),
                ("overlay", FieldValue::Bool(overlay)),
            ],
        )
    }
}
