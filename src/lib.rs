//! Static discovery of the modules a program reaches, and freezing of their
//! compiled units into a table a bootstrap can load from.
//!
//! The [`Finder`] resolves imports by scanning compiled units, never by
//! running them. [`FrozenTable`] turns the result into the emitted artifact.

pub mod config;
pub mod emit;
pub mod error;
pub mod finder;
pub mod unit;

pub use {
    config::FreezeConfig,
    emit::{FrozenEntry, FrozenTable, entry_module_name},
    error::{FreezeError, Result},
    finder::{Finder, FinderStats, HookTable, Module, ModuleId},
    unit::{CompiledModule, opcode::FormatVersion},
};
