//! Namespace-scoped context storage for pipeline state.
//!
//! [`ContextStore`] is the service layer: it encodes values as JSON,
//! validates names, applies TTLs, filters expired entries on read and
//! bounds every backend call with a timeout. Storage itself sits behind
//! the [`ports::ContextBackend`] trait so engines stay interchangeable.

mod cleanup;
pub mod domain;
pub mod ports;
pub mod store;
pub mod validate;

pub use domain::{BackendCounts, DEFAULT_NAMESPACE, EntryRecord, StoreStats};
pub use store::{Context, ContextStore};
