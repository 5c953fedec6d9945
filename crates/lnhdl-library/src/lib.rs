//! LNHDL module registry
//!
//! A path-scoped directory mapping module names to stable ids, with
//! per-module attributes (version, open count), a recycled-id free list,
//! submodule port signatures, and a plain-text backing store.

pub mod library;

pub use library::{
    GraphAttributes, GraphLibrary, LibraryError, LibraryManager, ModuleId, PortDirection, Result,
    SubNode, SubPort,
};
