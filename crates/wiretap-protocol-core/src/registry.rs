use crate::adapter::ConnectionAdapter;
use crate::event::PacketDispatcher;
use crate::version::VersionDescriptor;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub type AdapterFactory = fn(Arc<PacketDispatcher>) -> Arc<dyn ConnectionAdapter>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No adapter supports server version {0}")]
    UnsupportedVersion(VersionDescriptor),
    #[error("An adapter is already bound to {0}")]
    DuplicateBinding(VersionDescriptor),
}

/// Ties a release (and optionally every later release up to `through`) to an adapter.
#[derive(Debug, Clone, Copy)]
pub struct AdapterBinding {
    version: VersionDescriptor,
    through: Option<VersionDescriptor>,
    factory: AdapterFactory,
}

impl AdapterBinding {
    pub const fn new(version: VersionDescriptor, factory: AdapterFactory) -> Self {
        Self {
            version,
            through: None,
            factory,
        }
    }

    /// Cap fallback resolution at `max`, including every release tag of that patch.
    pub const fn through(mut self, max: VersionDescriptor) -> Self {
        self.through = Some(max);
        self
    }

    pub fn version(&self) -> VersionDescriptor {
        self.version
    }

    /// Whether a release newer than this binding may fall back to it.
    pub fn covers(&self, target: &VersionDescriptor) -> bool {
        self.version.same_line(target)
            && self.version <= *target
            && self
                .through
                .map_or(true, |max| *target <= max.with_release(u8::MAX))
    }

    pub fn instantiate(&self, dispatcher: Arc<PacketDispatcher>) -> Arc<dyn ConnectionAdapter> {
        (self.factory)(dispatcher)
    }
}

/// The release-to-adapter table. Exactly one adapter is activated per registry and
/// kept for its lifetime.
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    bindings: Vec<AdapterBinding>,
    active: OnceCell<Arc<dyn ConnectionAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bindings(
        bindings: impl IntoIterator<Item = AdapterBinding>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for binding in bindings {
            registry.bind(binding)?;
        }
        Ok(registry)
    }

    pub fn bind(&mut self, binding: AdapterBinding) -> Result<(), RegistryError> {
        if self.bindings.iter().any(|b| b.version == binding.version) {
            return Err(RegistryError::DuplicateBinding(binding.version));
        }
        debug!("Bound adapter for {}", binding.version);
        self.bindings.push(binding);
        Ok(())
    }

    pub fn bindings(&self) -> &[AdapterBinding] {
        &self.bindings
    }

    /// Exact release first, then the nearest older release of the same major line
    /// whose range still covers `target`.
    pub fn resolve(&self, target: &VersionDescriptor) -> Result<&AdapterBinding, RegistryError> {
        if let Some(exact) = self.bindings.iter().find(|b| b.version == *target) {
            return Ok(exact);
        }
        self.bindings
            .iter()
            .filter(|b| b.covers(target))
            .max_by_key(|b| b.version)
            .ok_or(RegistryError::UnsupportedVersion(*target))
    }

    /// Resolve and instantiate the adapter for `target`. The first successful call
    /// fixes the adapter; later calls return it regardless of their arguments.
    pub fn activate(
        &self,
        target: &VersionDescriptor,
        dispatcher: &Arc<PacketDispatcher>,
    ) -> Result<Arc<dyn ConnectionAdapter>, RegistryError> {
        self.active
            .get_or_try_init(|| {
                let binding = self.resolve(target)?;
                info!(
                    "Server version {} handled by the {} adapter",
                    target,
                    binding.version.key()
                );
                Ok(binding.instantiate(Arc::clone(dispatcher)))
            })
            .cloned()
    }

    pub fn active(&self) -> Option<Arc<dyn ConnectionAdapter>> {
        self.active.get().cloned()
    }
}
