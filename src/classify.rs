//! Dispatch error classification
//!
//! Maps a ledger-reported dispatch error into a [`DispatchFailure`] that is
//! structured enough to render a diagnostic. Module errors are resolved
//! against an [`ErrorRegistry`]; everything else, and anything the registry
//! does not know, falls back to [`DispatchFailure::Opaque`].

use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Module-indexed error code as reported by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleError {
    /// Index of the module that raised the error
    pub index: u8,

    /// Module-local error code
    pub error: [u8; 4],
}

impl ModuleError {
    /// Create a module error from its index and the first byte of its code
    pub fn new(index: u8, code: u8) -> Self {
        Self {
            index,
            error: [code, 0, 0, 0],
        }
    }
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Module {{ index: {}, error: 0x{} }}",
            self.index,
            hex::encode(self.error)
        )
    }
}

/// Raw dispatch error attached to a status update or a relayed-call event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawDispatchError {
    /// Error raised by a runtime module
    Module(ModuleError),

    /// Origin of the call was not allowed
    BadOrigin,

    /// Account lookup failed
    CannotLookup,

    /// Any other error, carried as the ledger's own string
    Other(String),
}

impl fmt::Display for RawDispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawDispatchError::Module(module) => write!(f, "{module}"),
            RawDispatchError::BadOrigin => write!(f, "BadOrigin"),
            RawDispatchError::CannotLookup => write!(f, "CannotLookup"),
            RawDispatchError::Other(raw) if raw.is_empty() => write!(f, "Other"),
            RawDispatchError::Other(raw) => write!(f, "{raw}"),
        }
    }
}

/// Metadata the registry holds for a module error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMetadata {
    /// Module name, e.g. `ad`
    pub section: String,

    /// Error variant name, e.g. `NoPermission`
    pub name: String,

    /// Documentation lines
    pub docs: Vec<String>,
}

/// Lookup from a module error code to its metadata
pub trait ErrorRegistry {
    /// Resolve a module error, `None` when unknown
    fn find_meta_error(&self, error: &ModuleError) -> Option<ErrorMetadata>;
}

/// In-memory registry built from a fixed table
#[derive(Debug, Clone, Default)]
pub struct StaticErrorRegistry {
    entries: HashMap<ModuleError, ErrorMetadata>,
}

impl StaticErrorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register metadata for a module error (builder-style)
    pub fn with_error(
        mut self,
        error: ModuleError,
        section: impl Into<String>,
        name: impl Into<String>,
        docs: &[&str],
    ) -> Self {
        self.entries.insert(
            error,
            ErrorMetadata {
                section: section.into(),
                name: name.into(),
                docs: docs.iter().map(|line| line.to_string()).collect(),
            },
        );
        self
    }
}

impl ErrorRegistry for StaticErrorRegistry {
    fn find_meta_error(&self, error: &ModuleError) -> Option<ErrorMetadata> {
        self.entries.get(error).cloned()
    }
}

/// Classified dispatch failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchFailure {
    /// The registry resolved the failure code
    Known {
        /// Module name
        section: String,
        /// Error variant name
        name: String,
        /// Documentation lines joined by single spaces
        docs: String,
    },

    /// The failure could not be resolved
    Opaque {
        /// String form of the raw error
        raw: String,
    },
}

impl DispatchFailure {
    pub fn is_known(&self) -> bool {
        matches!(self, DispatchFailure::Known { .. })
    }
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchFailure::Known { section, name, docs } if docs.is_empty() => {
                write!(f, "{section}.{name}")
            }
            DispatchFailure::Known { section, name, docs } => {
                write!(f, "{section}.{name}: {docs}")
            }
            DispatchFailure::Opaque { raw } => write!(f, "{raw}"),
        }
    }
}

/// Classify a raw dispatch error against a registry.
///
/// Never fails: anything that cannot be resolved downgrades to `Opaque`.
pub fn classify<R>(registry: &R, raw: &RawDispatchError) -> DispatchFailure
where
    R: ErrorRegistry + ?Sized,
{
    if let RawDispatchError::Module(module) = raw {
        if let Some(meta) = registry.find_meta_error(module) {
            return DispatchFailure::Known {
                section: meta.section,
                name: meta.name,
                docs: meta.docs.join(" "),
            };
        }
        debug!("Module error {} not found in registry", module);
    }

    DispatchFailure::Opaque {
        raw: raw.to_string(),
    }
}
