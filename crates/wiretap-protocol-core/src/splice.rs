//! Pipeline surgery shared by every adapter: splicing the interceptor in, taking
//! it out, and writing packets through the spliced pipeline.

use crate::interceptor::PacketInterceptor;
use crate::packets::Packet;
use crate::pipeline::ChannelHandler;
use crate::session::Connection;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Pipeline name of the spliced interceptor.
pub const INTERCEPTOR_NAME: &str = "wiretap_interceptor";

/// Pipeline name of the server's own protocol handler; the interceptor sits right before it.
pub const PACKET_HANDLER: &str = "packet_handler";

/// Splice an interceptor before `base`. Returns true if the connection is intercepted
/// afterwards.
///
/// Does nothing when the connection already has an interceptor or is no longer live.
/// A failed insertion is logged and not retried.
pub fn insert_interceptor(
    connection: &Connection,
    base: &str,
    make: impl FnOnce() -> PacketInterceptor,
) -> bool {
    let mut slot = connection.lock_splice();
    if slot.is_some() {
        trace!("{} already intercepted", connection.profile().name);
        return true;
    }
    if !connection.is_live() {
        trace!("Not splicing {}: connection is not live", connection.profile().name);
        return false;
    }
    let Some(channel) = connection.channel() else {
        return false;
    };

    let interceptor = Arc::new(make());
    let handler: Arc<dyn ChannelHandler> = interceptor.clone();
    match channel
        .pipeline()
        .add_before(base, INTERCEPTOR_NAME, handler)
    {
        Ok(()) => {
            debug!(
                "Spliced {} before '{}' for {}",
                INTERCEPTOR_NAME,
                base,
                connection.profile().name
            );
            *slot = Some(interceptor);
            true
        }
        Err(e) => {
            warn!(
                "Could not splice interceptor for {}: {}",
                connection.profile().name,
                e
            );
            false
        }
    }
}

/// Take the interceptor out of the connection. Returns false if there was none.
///
/// The pipeline is only touched while the connection is live; a dead connection just
/// forgets its interceptor.
pub fn remove_interceptor(connection: &Connection) -> bool {
    let mut slot = connection.lock_splice();
    let Some(interceptor) = slot.take() else {
        return false;
    };

    if connection.is_live() {
        if let Some(channel) = connection.channel() {
            let handler: Arc<dyn ChannelHandler> = interceptor.clone();
            if !channel
                .pipeline()
                .remove_if_same(INTERCEPTOR_NAME, &handler)
            {
                trace!(
                    "Interceptor for {} was already gone from the pipeline",
                    connection.profile().name
                );
            }
        }
    }
    interceptor.deactivate();
    debug!("Unspliced interceptor for {}", connection.profile().name);
    true
}

/// Write packets in order through the connection's pipeline. Liveness is checked
/// before every packet; packets for a dead connection are dropped silently.
/// Returns how many reached the socket writer.
pub fn write_all(connection: &Connection, packets: Vec<Packet>) -> usize {
    let mut written = 0;
    for packet in packets {
        if !connection.is_live() {
            trace!(
                "Dropping {} for {}: connection is not live",
                packet.name(),
                connection.profile().name
            );
            continue;
        }
        let Some(channel) = connection.channel() else {
            continue;
        };
        if channel.write(packet.into_frame()) {
            written += 1;
        }
    }
    written
}
