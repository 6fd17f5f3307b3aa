//! Collaborators the app talks to: identity, a realtime document tree and
//! blob storage. Each one is a trait with an in-memory and a Firebase REST
//! implementation.

mod firebase;
mod memory;
pub mod paths;
mod session;
pub(crate) mod tree;

pub use firebase::{CloudStorage, IdentityToolkit, RealtimeDatabase};
pub use memory::{MemoryBlobs, MemoryIdentity, MemoryStore};
pub use session::{Session, SessionContext};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;

/// Placeholder the document store replaces with its own clock at write time.
pub fn server_timestamp() -> Value {
    json!({ ".sv": "timestamp" })
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<Session>;

    async fn sign_up_with_email(&self, email: &str, password: &str) -> Result<Session>;

    async fn update_display_name(&self, session: &Session, name: &str) -> Result<()>;

    async fn sign_out(&self, session: &Session) -> Result<()>;
}

/// A hierarchical JSON store addressed by slash-separated paths.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns `None` when nothing is stored at `path`.
    async fn read(&self, path: &str) -> Result<Option<Value>>;

    async fn write(&self, path: &str, value: Value) -> Result<()>;

    /// Merges the fields of an object into `path`. Keys may be nested paths.
    async fn update(&self, path: &str, fields: Value) -> Result<()>;

    /// Stores `value` under a new time-ordered child key and returns the key.
    async fn append(&self, path: &str, value: Value) -> Result<String>;

    async fn remove(&self, path: &str) -> Result<()>;

    /// Streams the value at `path`. Dropping the receiver unsubscribes.
    async fn subscribe(&self, path: &str) -> Result<watch::Receiver<Option<Value>>>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Uploads `data` and returns a URL it can be downloaded from.
    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<String>;

    /// Deletes the object. Deleting a missing object succeeds.
    async fn delete(&self, path: &str) -> Result<()>;
}
