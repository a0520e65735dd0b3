use crate::packets::{Direction, FieldValue, Packet};
use wiretap_events::{Cancellable, EventDispatcher};
use wiretap_types::GameProfile;

/// One intercepted message on its way through a player's pipeline.
///
/// Lives for a single dispatch. Once cancelled it stays cancelled; there is no way to
/// clear the flag.
#[derive(Debug)]
pub struct PacketEvent {
    player: GameProfile,
    direction: Direction,
    packet: Packet,
    cancelled: bool,
}

impl PacketEvent {
    pub fn new(player: GameProfile, direction: Direction, packet: Packet) -> Self {
        Self {
            player,
            direction,
            packet,
            cancelled: false,
        }
    }

    pub fn player(&self) -> &GameProfile {
        &self.player
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    /// Mutable access for subscribers that rewrite the message before it is forwarded.
    pub fn packet_mut(&mut self) -> &mut Packet {
        &mut self.packet
    }

    pub fn shape_name(&self) -> &'static str {
        self.packet.name()
    }

    pub fn is(&self, shape: &str) -> bool {
        self.packet.is(shape)
    }

    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.packet.field(name)
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn into_packet(self) -> Packet {
        self.packet
    }
}

impl Cancellable for PacketEvent {
    fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}

pub type PacketDispatcher = EventDispatcher<PacketEvent>;

/// Filter matching inbound packets of one shape.
pub fn inbound(shape: &'static str) -> impl Fn(&PacketEvent) -> bool + Send + Sync + 'static {
    move |event| event.direction == Direction::Inbound && event.is(shape)
}

/// Filter matching outbound packets of one shape.
pub fn outbound(shape: &'static str) -> impl Fn(&PacketEvent) -> bool + Send + Sync + 'static {
    move |event| event.direction == Direction::Outbound && event.is(shape)
}
