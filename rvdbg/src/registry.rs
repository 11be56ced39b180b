//! Hart registry and selection.

use std::sync::Arc;

use crate::dport::{DebugPort, HartLookup};
use crate::Error;

/// One resolved hart.
#[derive(Clone)]
pub struct Hart {
    name: String,
    port: Arc<dyn DebugPort>,
}

impl Hart {
    /// The configured name of the hart.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The hart's debug port.
    pub fn port(&self) -> &Arc<dyn DebugPort> {
        &self.port
    }
}

impl std::fmt::Debug for Hart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hart").field("name", &self.name).finish()
    }
}

/// Ordered list of harts, in configuration order.
///
/// Harts whose name can't be resolved are skipped, so indices refer to the
/// resolved harts only. The list does not change after [`HartRegistry::build`].
pub struct HartRegistry {
    harts: Vec<Hart>,
    /// All configured names, including the unresolved ones.
    configured: Vec<String>,
    lookup: Arc<dyn HartLookup>,
}

impl std::fmt::Debug for HartRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HartRegistry")
            .field("harts", &self.harts)
            .field("configured", &self.configured)
            .finish_non_exhaustive()
    }
}

impl HartRegistry {
    /// Create an empty registry resolving names through `lookup`.
    pub fn new(lookup: Arc<dyn HartLookup>) -> Self {
        Self {
            harts: Vec::new(),
            configured: Vec::new(),
            lookup,
        }
    }

    /// Create a registry and register every name in `names`.
    pub fn build<S: AsRef<str>>(lookup: Arc<dyn HartLookup>, names: &[S]) -> Self {
        let mut registry = Self::new(lookup);
        for name in names {
            registry.register_hart(name.as_ref());
        }
        registry
    }

    /// Resolve `name` and append it. Unknown names are logged and skipped.
    pub fn register_hart(&mut self, name: &str) {
        self.configured.push(name.to_string());

        match self.lookup.debug_port(name) {
            Some(port) => {
                tracing::debug!("Registered hart {} as index {}", name, self.harts.len());
                self.harts.push(Hart {
                    name: name.to_string(),
                    port,
                });
            }
            None => tracing::error!("Can't find debug port of hart {name}"),
        }
    }

    /// Number of resolved harts.
    pub fn len(&self) -> usize {
        self.harts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.harts.is_empty()
    }

    /// The hart at `index`.
    pub fn get(&self, index: usize) -> Option<&Hart> {
        self.harts.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hart> {
        self.harts.iter()
    }

    /// Names from the configuration, resolved or not.
    pub fn configured_names(&self) -> &[String] {
        &self.configured
    }

    pub(crate) fn lookup(&self) -> &Arc<dyn HartLookup> {
        &self.lookup
    }

    /// Check if hart `index` is halted. Unknown harts read as running.
    pub fn is_halted(&self, index: usize) -> bool {
        self.get(index)
            .map(|hart| hart.port.is_halted())
            .unwrap_or(false)
    }
}

/// The hart a client currently talks to.
///
/// Every client session owns one. An out of range selection is kept as
/// `registry.len()`, which never resolves to a hart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HartSelection {
    current: usize,
}

impl HartSelection {
    /// Selection of hart 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select hart `index` of `registry`.
    ///
    /// Selecting past the end leaves the selection invalid and reports
    /// [`Error::TargetNotFound`].
    pub fn select(&mut self, registry: &HartRegistry, index: usize) -> Result<(), Error> {
        if index >= registry.len() {
            self.current = registry.len();
            tracing::error!("Context index out of range {index}");
            return Err(Error::TargetNotFound(index));
        }

        self.current = index;
        Ok(())
    }

    /// The selected index. Equal to the registry size if nothing is selected.
    pub fn current(&self) -> usize {
        self.current
    }

    /// The selected hart, if the selection is valid.
    pub fn resolve<'r>(&self, registry: &'r HartRegistry) -> Option<&'r Hart> {
        registry.get(self.current)
    }
}
