//! In-process transactional table store.
//!
//! Committed tables are shared by every connection of a [`MemoryDriver`];
//! writes made inside a transaction stay private to their connection until
//! commit. Faults can be scripted per operation to exercise error paths.

pub mod connection;
pub mod driver;
pub(crate) mod store;

pub use connection::MemoryConnection;
pub use driver::{FaultPoint, MemoryDriver};
