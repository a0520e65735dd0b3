use crate::shapes::{self, SHAPES};
use bytes::BytesMut;
use std::sync::Arc;
use tracing::debug;
use wiretap_protocol_core::*;
use wiretap_types::{GameProfile, TextComponent};

/// Adapter for the 1.15 line (protocol 578).
pub struct V1_15Adapter {
    dispatcher: Arc<PacketDispatcher>,
}

impl V1_15Adapter {
    pub const VERSION: VersionDescriptor = VersionDescriptor::new(1, 15, 0);
    pub const PROTOCOL: i32 = 578;

    pub fn new(dispatcher: Arc<PacketDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Registry entry: 1.15 through 1.15.2.
    pub fn binding() -> AdapterBinding {
        AdapterBinding::new(Self::VERSION, Self::create).through(VersionDescriptor::new(1, 15, 2))
    }

    fn create(dispatcher: Arc<PacketDispatcher>) -> Arc<dyn ConnectionAdapter> {
        Arc::new(Self::new(dispatcher))
    }
}

impl ConnectionAdapter for V1_15Adapter {
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
        let written = splice::write_all(connection, packets);
        debug!("Sent {} packet(s) to {}", written, connection.profile().name);
    }

    fn register(&self, connection: &Connection) {
        let profile = connection.profile().clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        splice::insert_interceptor(connection, splice::PACKET_HANDLER, move || {
            PacketInterceptor::new(profile, &SHAPES, dispatcher)
        });
    }

    fn unregister(&self, connection: &Connection) {
        splice::remove_interceptor(connection);
    }

    /// 1.15 sends the UUID as a hyphenated string.
    fn login_success(&self, profile: &GameProfile) -> Frame {
        let mut payload = BytesMut::new();
        write_string(&mut payload, &profile.uuid.hyphenated().to_string());
        write_string(&mut payload, &profile.name);
        Frame::new(shapes::LOGIN_SUCCESS, payload)
    }

    fn system_message(
        &self,
        message: &TextComponent,
        overlay: bool,
    ) -> Result<Packet, FieldError> {
        let position = if overlay {
            shapes::POSITION_ACTION_BAR
        } else {
            shapes::POSITION_SYSTEM
        };
        self.packet(
            "SystemChat",
            &[
                ("content", FieldValue::String(message.to_json())),
                ("position", FieldValue::Byte(position)),
            ],
        )
    }
}
