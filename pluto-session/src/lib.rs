//! Pluto Session - the client's authenticated session against the Pluto AI gateway
//!
//! A `SessionManager` owns the bearer token and the current user record,
//! persists both across restarts, and hands out the `Authorization` header
//! other clients attach to their requests.

pub mod client;
pub mod error;
pub mod manager;
pub mod policy;
pub mod storage;
pub mod types;

pub use client::{AuthApi, HttpAuthApi};
pub use error::{ApiError, SessionError, SessionResult};
pub use manager::SessionManager;
pub use policy::{policy_for, FailClosed, InvalidationPolicy, RejectionsOnly};
pub use storage::{open_store, FileStore, KeyValueStore, MemoryStore, TOKEN_KEY, USER_KEY};
pub use types::*;
