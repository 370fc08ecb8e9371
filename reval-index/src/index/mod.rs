//! Search index access and lifecycle management.

pub mod backend;
pub mod http;
pub mod lifecycle;
pub mod memory;

pub use backend::{DocumentHit, IndexInfo, SearchBackend, WriteToken};
pub use http::HttpSearchBackend;
pub use lifecycle::IndexLifecycleManager;
pub use memory::MemoryBackend;
