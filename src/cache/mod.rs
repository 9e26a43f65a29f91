//! Named response stores and the request/response value model.
//!
//! This module provides the persistence layer for the cache worker:
//! - Stores are named key→value maps with whole-store deletion
//! - Keys are request identities (method + URL)
//! - Values are full responses (status, headers, body)

mod response;
mod store;

pub use response::{FetchRequest, ServeResult, ServedFrom, StoredResponse};
pub use store::{MemoryStores, SqliteStores, Stored, StoreRegistry};
