pub mod adapter;
pub mod codec;
pub mod event;
pub mod interceptor;
pub mod packets;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod splice;
pub mod state;
pub mod transport;
pub mod version;

pub use adapter::*;
pub use codec::*;
pub use event::*;
pub use interceptor::PacketInterceptor;
pub use packets::*;
pub use pipeline::*;
pub use registry::*;
pub use session::Connection;
pub use state::*;
pub use transport::{Transport, TransportReader, TransportWriter};
pub use version::*;
