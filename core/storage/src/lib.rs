//! Remote storage adapters for davsync.
//!
//! The sync engine talks to the remote side exclusively through the
//! [`RemoteStore`] trait. Two implementations live here: a WebDAV store
//! built on opendal, and an in-memory store for tests and development.

pub mod memory;
pub mod store;
pub mod webdav;

pub use memory::MemoryStore;
pub use store::{ByteStream, Entry, RemoteStore};
pub use webdav::WebdavStore;
