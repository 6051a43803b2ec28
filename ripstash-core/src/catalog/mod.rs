//! Catalog store: durable relational state for catalog entities, rip
//! jobs, blob records and match scores, behind a transactional session
//! with a post-commit side-effect queue.

mod exports_info;
mod media;
mod rips;
mod schemas;
mod session;
mod store;

pub use schemas::*;
pub use session::CatalogSession;
pub use store::CatalogStore;
