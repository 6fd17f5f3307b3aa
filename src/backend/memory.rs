use super::tree;
use super::{BlobStore, DocumentStore, IdentityProvider, Session};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::debug;

const MIN_PASSWORD_LEN: usize = 6;

struct Subscriber {
    path: String,
    tx: watch::Sender<Option<Value>>,
}

struct StoreInner {
    root: Value,
    last_timestamp: u64,
    subscribers: Vec<Subscriber>,
}

/// A document tree held in process memory.
///
/// Server timestamps resolve to wall-clock milliseconds, bumped so that
/// every write sees a strictly later value than the one before it.
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                root: Value::Null,
                last_timestamp: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    /// The whole tree, for inspection.
    pub fn snapshot(&self) -> Value {
        self.inner.lock().root.clone()
    }

    fn mutate<F>(&self, mut value: Value, apply: F)
    where
        F: FnOnce(&mut Value, Value),
    {
        let mut inner = self.inner.lock();

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        inner.last_timestamp = now.max(inner.last_timestamp + 1);
        tree::resolve_server_values(&mut value, inner.last_timestamp);

        apply(&mut inner.root, value);

        let StoreInner {
            root, subscribers, ..
        } = &mut *inner;
        subscribers.retain(|sub| !sub.tx.is_closed());
        for sub in subscribers.iter() {
            let next = tree::get(root, &sub.path).cloned();
            sub.tx.send_if_modified(|current| {
                if *current == next {
                    false
                } else {
                    *current = next;
                    true
                }
            });
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Option<Value>> {
        Ok(tree::get(&self.inner.lock().root, path).cloned())
    }

    async fn write(&self, path: &str, value: Value) -> Result<()> {
        self.mutate(value, |root, value| tree::set(root, path, value));
        Ok(())
    }

    async fn update(&self, path: &str, fields: Value) -> Result<()> {
        if !fields.is_object() {
            bail!("Update of {} expects an object, got {}", path, fields);
        }
        self.mutate(fields, |root, fields| {
            if let Value::Object(fields) = fields {
                tree::update(root, path, &fields);
            }
        });
        Ok(())
    }

    async fn append(&self, path: &str, value: Value) -> Result<String> {
        let key = uuid::Uuid::now_v7().simple().to_string();
        let child = tree::join(path, &key);
        self.mutate(value, |root, value| tree::set(root, &child, value));
        debug!("Appended {}", child);
        Ok(key)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.mutate(Value::Null, |root, value| tree::set(root, path, value));
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<watch::Receiver<Option<Value>>> {
        let mut inner = self.inner.lock();
        let (tx, rx) = watch::channel(tree::get(&inner.root, path).cloned());
        inner.subscribers.push(Subscriber {
            path: path.to_string(),
            tx,
        });
        Ok(rx)
    }
}

/// Blob storage held in process memory. URLs use the `memory://` scheme.
#[derive(Default)]
pub struct MemoryBlobs {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url_for(path: &str) -> String {
        format!("memory://{}", path)
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(path).map(|(data, _)| data.clone())
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.objects.lock().get(path).map(|(_, ty)| ty.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<String> {
        debug!("Storing {} ({} bytes)", path, data.len());
        self.objects
            .lock()
            .insert(path.to_string(), (data, content_type.to_string()));
        Ok(Self::url_for(path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.lock().remove(path);
        Ok(())
    }
}

struct Account {
    user_id: String,
    password: String,
    display_name: Option<String>,
}

/// Email/password accounts held in process memory.
#[derive(Default)]
pub struct MemoryIdentity {
    accounts: Mutex<HashMap<String, Account>>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    fn session_for(email: &str, account: &Account) -> Session {
        Session {
            user_id: account.user_id.clone(),
            email: Some(email.to_string()),
            display_name: account.display_name.clone(),
            id_token: None,
        }
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<Session> {
        let accounts = self.accounts.lock();
        let account = accounts
            .get(email)
            .ok_or_else(|| anyhow!("No account for {}", email))?;
        if account.password != password {
            bail!("Wrong password for {}", email);
        }
        Ok(Self::session_for(email, account))
    }

    async fn sign_up_with_email(&self, email: &str, password: &str) -> Result<Session> {
        if password.len() < MIN_PASSWORD_LEN {
            bail!(
                "Password should be at least {} characters",
                MIN_PASSWORD_LEN
            );
        }

        let mut accounts = self.accounts.lock();
        if accounts.contains_key(email) {
            bail!("An account for {} already exists", email);
        }

        let account = Account {
            user_id: uuid::Uuid::new_v4().simple().to_string(),
            password: password.to_string(),
            display_name: None,
        };
        let session = Self::session_for(email, &account);
        accounts.insert(email.to_string(), account);
        Ok(session)
    }

    async fn update_display_name(&self, session: &Session, name: &str) -> Result<()> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .values_mut()
            .find(|a| a.user_id == session.user_id)
            .ok_or_else(|| anyhow!("Unknown user {}", session.user_id))?;
        account.display_name = Some(name.to_string());
        Ok(())
    }

    async fn sign_out(&self, _session: &Session) -> Result<()> {
        Ok(())
    }
}
