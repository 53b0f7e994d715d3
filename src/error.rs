use {
    std::path::PathBuf,
    thiserror::Error,
};

/// Hard failures of a freezing run.
///
/// Modules that cannot be found while scanning and archives that cannot be
/// read are not errors: the former end up in the missing-module report, the
/// latter are skipped for the rest of the run.
#[derive(Debug, Error)]
pub enum FreezeError {
    /// An explicitly requested module could not be located.
    #[error("no module named {name:?} (explicitly included)")]
    ModuleNotFoundExplicit { name: String },

    /// Precompiled payload whose format marker is not the expected one.
    #[error("bad format marker in {path:?}: expected {expected:02x?}, found {found:02x?}")]
    MalformedCompiledUnit {
        path: PathBuf,
        expected: [u8; 4],
        found: Vec<u8>,
    },

    /// Precompiled payload whose unit tree does not hang together.
    #[error("corrupt unit tree in {path:?}: unit {unit}: {message}")]
    CorruptUnitTree {
        path: PathBuf,
        unit: usize,
        message: String,
    },

    /// A registered hook callback failed.
    #[error("hook for module {name:?} failed")]
    HookInvocationFailure {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{path:?}:{line}: {message}")]
    InvalidSource {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("failed to access {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize compiled unit")]
    Serialization(#[from] bincode::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Two module names map onto the same symbol in the emitted table.
    #[error("modules {first:?} and {second:?} both mangle to symbol {symbol:?}")]
    SymbolCollision {
        first: String,
        second: String,
        symbol: String,
    },
}

pub type Result<T, E = FreezeError> = std::result::Result<T, E>;

impl FreezeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
