//! Durable persistent ordered-map indices over a content-addressed
//! fragment store.
//!
//! Three layers, leaves first:
//!
//! - [`fragment`] — content-addressed indirection plus an in-process LRU
//!   read cache, over an abstract [`store::Store`].
//! - [`llrb`] — a persistent red-black tree of comparable keys.
//! - [`btree`] — a persistent B-tree mapping keys to values, tuned for
//!   larger fan-out and forward iteration.
//!
//! Every mutation takes a root handle and returns a new one; the caller
//! decides when (and whether) to publish a root under a stable name via
//! [`fragment::FragStore::publish_root`].

pub mod btree;
pub mod cache;
mod error;
pub mod fid;
pub mod fragment;
pub mod llrb;
pub mod store;
mod util;

pub use error::{Error, Result};
pub use fid::{ContentHash, Fid, Sha1Hash};
pub use fragment::{FragStore, Link};
pub use store::{MemStore, Store};
