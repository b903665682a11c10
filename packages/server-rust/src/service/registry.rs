//! Backend registry: the installed set of live backends.
//!
//! The registry starts out empty and is filled exactly once by the
//! background initialization pass. Readers take an `Arc` snapshot with a
//! lock-free load and keep it for the whole request; the writer side is a
//! single [`RegistryInstaller`] token that is consumed by `install`, so a
//! second install cannot be expressed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::backend::BackendHandle;

/// An immutable name -> backend mapping.
///
/// Iteration is in lexicographic backend-name order, which is the order
/// aggregation and routing visit backends in.
#[derive(Default)]
pub struct RegistrySnapshot {
    backends: BTreeMap<String, Arc<BackendHandle>>,
}

impl RegistrySnapshot {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot keyed by each handle's name. A later handle with a
    /// duplicate name replaces the earlier one.
    #[must_use]
    pub fn from_handles(handles: Vec<BackendHandle>) -> Self {
        let backends = handles
            .into_iter()
            .map(|handle| (handle.name().to_string(), Arc::new(handle)))
            .collect();
        Self { backends }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<BackendHandle>> {
        self.backends.get(name)
    }

    /// Backends in sorted name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<BackendHandle>> {
        self.backends.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl fmt::Debug for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.backends.keys()).finish()
    }
}

/// Shared read side of the registry.
pub struct BackendRegistry {
    current: ArcSwap<RegistrySnapshot>,
}

impl BackendRegistry {
    /// Creates an empty registry and the one token allowed to fill it.
    #[must_use]
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Arc<Self>, RegistryInstaller) {
        let registry = Arc::new(Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::empty()),
        });
        let installer = RegistryInstaller {
            registry: Arc::clone(&registry),
        };
        (registry, installer)
    }

    /// The currently installed snapshot. Holding it keeps those backends
    /// alive even if the registry were to change.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Ready once a non-empty snapshot has been installed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.current.load().is_empty()
    }

    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.current.load().len()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &*self.current.load())
            .finish()
    }
}

/// Single-use write capability for a [`BackendRegistry`].
#[derive(Debug)]
pub struct RegistryInstaller {
    registry: Arc<BackendRegistry>,
}

impl RegistryInstaller {
    /// Atomically publishes `snapshot`. Requests already holding the empty
    /// snapshot finish against it; every later `snapshot()` sees this one.
    pub fn install(self, snapshot: RegistrySnapshot) {
        self.registry.current.store(Arc::new(snapshot));
    }
}
