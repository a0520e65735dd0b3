use crate::error::WiretapError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use wiretap_protocol_core::{
    AdapterBinding, AdapterRegistry, Channel, Connection, ConnectionAdapter, FieldError,
    FieldValue, Packet, PacketDispatcher, VersionDescriptor,
};
use wiretap_types::{GameProfile, TextComponent};

/// Process-scoped interception state: the dispatcher, the active adapter and every
/// attached connection.
pub struct Wiretap {
    version: VersionDescriptor,
    registry: AdapterRegistry,
    adapter: Arc<dyn ConnectionAdapter>,
    dispatcher: Arc<PacketDispatcher>,
    connections: DashMap<Uuid, Arc<Connection>>,
    running: AtomicBool,
}

impl Wiretap {
    /// Pick the adapter for `version` from `bindings`. Fails when no binding covers it,
    /// or when the process already runs as a different release.
    pub fn initialize(
        version: VersionDescriptor,
        bindings: impl IntoIterator<Item = AdapterBinding>,
    ) -> Result<Self, WiretapError> {
        if let Some(installed) = VersionDescriptor::current() {
            if installed != version {
                return Err(WiretapError::VersionMismatch {
                    installed,
                    requested: version,
                });
            }
        }

        let registry = AdapterRegistry::with_bindings(bindings)?;
        let dispatcher = Arc::new(PacketDispatcher::new());
        let adapter = registry.activate(&version, &dispatcher)?;
        let installed = version.install();
        if installed != version {
            return Err(WiretapError::VersionMismatch {
                installed,
                requested: version,
            });
        }
        info!(
            "Packet interception ready for {} (protocol {})",
            version,
            adapter.protocol_version()
        );

        Ok(Self {
            version,
            registry,
            adapter,
            dispatcher,
            connections: DashMap::new(),
            running: AtomicBool::new(true),
        })
    }

    /// [`Wiretap::initialize`] with the release read from the environment.
    pub fn from_env(
        bindings: impl IntoIterator<Item = AdapterBinding>,
    ) -> Result<Self, WiretapError> {
        Self::initialize(VersionDescriptor::detect()?, bindings)
    }

    pub fn version(&self) -> VersionDescriptor {
        self.version
    }

    pub fn adapter(&self) -> &Arc<dyn ConnectionAdapter> {
        &self.adapter
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<PacketDispatcher> {
        &self.dispatcher
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Track a player that finished joining and splice the interceptor into its channel.
    /// An earlier connection for the same player is released and its channel closed.
    pub fn attach(
        &self,
        profile: GameProfile,
        channel: &Arc<Channel>,
    ) -> Result<Arc<Connection>, WiretapError> {
        if !self.is_running() {
            return Err(WiretapError::ShutDown);
        }

        if let Some((_, stale)) = self.connections.remove(&profile.uuid) {
            self.release(&stale);
            if let Some(old_channel) = stale.channel().filter(|c| !Arc::ptr_eq(c, channel)) {
                old_channel.close();
            }
            debug!("Replaced stale connection for {}", profile.name);
        }

        let connection = Arc::new(Connection::new(profile, channel));
        self.adapter.register(&connection);
        self.connections
            .insert(connection.profile().uuid, Arc::clone(&connection));
        debug!(
            "Attached {} ({} online)",
            connection.profile().name,
            self.connections.len()
        );
        Ok(connection)
    }

    /// Unsplice and invalidate a player's current connection. Returns false if it was
    /// not attached.
    pub fn detach(&self, player: &Uuid) -> bool {
        let Some((_, connection)) = self.connections.remove(player) else {
            return false;
        };
        self.release(&connection);
        true
    }

    /// Unsplice and invalidate this exact connection. A newer connection for the same
    /// player stays attached. Returns false if `connection` was no longer the attached one.
    pub fn detach_connection(&self, connection: &Arc<Connection>) -> bool {
        let removed = self
            .connections
            .remove_if(&connection.profile().uuid, |_, current| {
                Arc::ptr_eq(current, connection)
            })
            .is_some();
        self.release(connection);
        removed
    }

    fn release(&self, connection: &Connection) {
        self.adapter.unregister(connection);
        connection.mark_disconnected();
        debug!("Detached {}", connection.profile().name);
    }

    pub fn connection(&self, player: &Uuid) -> Option<Arc<Connection>> {
        self.connections.get(player).map(|c| Arc::clone(c.value()))
    }

    /// Attached connections that are still live.
    pub fn online(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|c| c.is_live())
            .map(|c| Arc::clone(c.value()))
            .collect()
    }

    /// Send to an attached player. Unknown or disconnected players are ignored.
    pub fn send(&self, player: &Uuid, packets: Vec<Packet>) {
        if let Some(connection) = self.connection(player) {
            self.adapter.send(&connection, packets);
        }
    }

    pub fn send_to(&self, connection: &Connection, packets: Vec<Packet>) {
        self.adapter.send(connection, packets);
    }

    pub fn broadcast(&self, packets: Vec<Packet>) {
        for connection in self.online() {
            self.adapter.send(&connection, packets.clone());
        }
    }

    /// Build an outbound packet by shape name for the active release.
    pub fn packet(&self, shape: &str, fields: &[(&str, FieldValue)]) -> Result<Packet, FieldError> {
        self.adapter.packet(shape, fields)
    }

    /// A system chat line (or action bar text when `overlay`) for the active release.
    pub fn message(&self, text: &TextComponent, overlay: bool) -> Result<Packet, FieldError> {
        self.adapter.system_message(text, overlay)
    }

    /// Unsplice every interceptor and invalidate every connection. Later attaches fail.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let players: Vec<Uuid> = self.connections.iter().map(|c| *c.key()).collect();
        for player in &players {
            self.detach(player);
        }
        info!("Packet interception shut down ({} connection(s) released)", players.len());
    }
}

impl Drop for Wiretap {
    fn drop(&mut self) {
        self.shutdown();
    }
}
