// Scope Module
// Filesystem scan and scope value resolution

pub mod catalog;

pub use catalog::{scan, ResolvedScope, ScopeCatalog, ScopeError};
