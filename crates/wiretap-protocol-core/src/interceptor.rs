use crate::event::{PacketDispatcher, PacketEvent};
use crate::packets::{Direction, ShapeTable};
use crate::pipeline::{ChannelHandler, Frame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use wiretap_types::GameProfile;

/// Duplex pipeline handler that turns every frame into a [`PacketEvent`], publishes it,
/// and drops the frame if a subscriber cancelled it.
///
/// One instance serves one splice. Once removed from the pipeline it stays inactive;
/// splicing again installs a fresh instance.
pub struct PacketInterceptor {
    player: GameProfile,
    shapes: &'static ShapeTable,
    dispatcher: Arc<PacketDispatcher>,
    active: AtomicBool,
}

impl PacketInterceptor {
    pub fn new(
        player: GameProfile,
        shapes: &'static ShapeTable,
        dispatcher: Arc<PacketDispatcher>,
    ) -> Self {
        Self {
            player,
            shapes,
            dispatcher,
            active: AtomicBool::new(true),
        }
    }

    pub fn player(&self) -> &GameProfile {
        &self.player
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            debug!("Interceptor for {} deactivated", self.player.name);
        }
    }

    fn intercept(&self, direction: Direction, frame: Frame) -> Option<Frame> {
        // An unspliced interceptor left behind in a dead pipeline only passes frames on.
        if !self.is_active() {
            return Some(frame);
        }
        let packet = self.shapes.classify(direction, frame);
        let mut event = PacketEvent::new(self.player.clone(), direction, packet);

        if self.dispatcher.publish(&mut event) {
            trace!(
                "{:?} {} (0x{:02X}) for {} cancelled",
                direction,
                event.shape_name(),
                event.packet().id(),
                self.player.name
            );
            return None;
        }
        Some(event.into_packet().into_frame())
    }
}

impl ChannelHandler for PacketInterceptor {
    fn inbound(&self, frame: Frame) -> Option<Frame> {
        self.intercept(Direction::Inbound, frame)
    }

    fn outbound(&self, frame: Frame) -> Option<Frame> {
        self.intercept(Direction::Outbound, frame)
    }

    fn removed(&self) {
        self.deactivate();
    }
}

impl std::fmt::Debug for PacketInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketInterceptor")
            .field("player", &self.player.name)
            .field("active", &self.is_active())
            .finish()
    }
}
