//! Per-connection packet interception.
//!
//! [`Wiretap`] owns the process-wide dispatcher and the one adapter chosen for the
//! running server release. Hosts attach each player's channel after login and detach
//! it on disconnect; subscribers registered on [`Wiretap::dispatcher`] see every packet
//! in both directions and may cancel it.

pub mod bindings;
mod error;
mod tap;

pub use bindings::default_bindings;
pub use error::WiretapError;
pub use tap::Wiretap;

pub use wiretap_events::{Cancellable, ListenerBuilder, SubscriberId};
pub use wiretap_protocol_core::splice::{INTERCEPTOR_NAME, PACKET_HANDLER};
pub use wiretap_protocol_core::{
    inbound, outbound, AdapterBinding, AdapterRegistry, Channel, ChannelHandler, Connection, ConnectionAdapter,
    Direction, FieldError, FieldValue, Frame, Packet, PacketDispatcher, PacketEvent,
    RegistryError, VersionDescriptor, VersionError,
};
pub use wiretap_types::{GameProfile, TextComponent};
