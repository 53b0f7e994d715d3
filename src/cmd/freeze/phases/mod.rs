pub mod complete_freezing;
pub mod resolve_modules;
pub mod write_table;

/// Represents a phase in the freezing process.
pub trait FreezingPhase: Sized {}

pub use {
    complete_freezing::CompleteFreezing,
    resolve_modules::ResolveModules,
    write_table::WriteTable,
};
