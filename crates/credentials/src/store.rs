use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use overseer_core::{normalize_provider, Error, Result};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::crypto::Cipher;

type Key = (String, String);

#[derive(Default)]
struct State {
    entries: HashMap<Key, Vec<u8>>,
    waiters: HashMap<Key, Vec<(u64, oneshot::Sender<String>)>>,
    next_waiter_id: u64,
}

struct Inner {
    cipher: Cipher,
    state: Mutex<State>,
}

/// Process-wide encrypted secret store keyed by (user, normalized
/// provider), plus the rendezvous that lets a parked conversation wait for
/// a value another connection is about to supply.
///
/// Raw values exist in plaintext only across `put`/`get`/`wait_for`
/// boundaries; `list` and everything else see provider names only.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<Inner>,
}

impl CredentialStore {
    pub fn new(master_key: Option<&str>) -> Result<Self> {
        let cipher = Cipher::from_master_key(master_key)?;
        Ok(Self {
            inner: Arc::new(Inner {
                cipher,
                state: Mutex::new(State::default()),
            }),
        })
    }

    fn key(user: &str, provider: &str) -> Key {
        (user.to_string(), normalize_provider(provider))
    }

    /// Store a value and release every waiter registered for the same
    /// normalized key. Waiter release happens in the same critical section
    /// as the write; a second write for the same key overwrites.
    pub async fn put(&self, user: &str, provider: &str, value: &str) -> Result<()> {
        let key = Self::key(user, provider);
        let sealed = self.inner.cipher.seal(value)?;

        let mut state = self.inner.state.lock().await;
        state.entries.insert(key.clone(), sealed);
        let released = match state.waiters.remove(&key) {
            Some(waiters) => {
                let count = waiters.len();
                for (_, tx) in waiters {
                    let _ = tx.send(value.to_string());
                }
                count
            }
            None => 0,
        };
        drop(state);

        debug!(user = %key.0, provider = %key.1, released, "Credential stored");
        Ok(())
    }

    pub async fn get(&self, user: &str, provider: &str) -> Result<Option<String>> {
        let key = Self::key(user, provider);
        let sealed = {
            let state = self.inner.state.lock().await;
            state.entries.get(&key).cloned()
        };
        match sealed {
            Some(sealed) => Ok(Some(self.inner.cipher.open(&sealed)?)),
            None => Ok(None),
        }
    }

    pub async fn has(&self, user: &str, provider: &str) -> bool {
        let key = Self::key(user, provider);
        self.inner.state.lock().await.entries.contains_key(&key)
    }

    /// Block until a value for (user, provider) exists or the timeout
    /// elapses. An already-stored value returns immediately; all waiters
    /// registered before the matching `put` are released by it.
    pub async fn wait_for(&self, user: &str, provider: &str, timeout: Duration) -> Result<String> {
        let key = Self::key(user, provider);

        let (waiter_id, rx) = {
            let mut state = self.inner.state.lock().await;
            if let Some(sealed) = state.entries.get(&key) {
                let sealed = sealed.clone();
                drop(state);
                return self.inner.cipher.open(&sealed);
            }
            let (tx, rx) = oneshot::channel();
            let waiter_id = state.next_waiter_id;
            state.next_waiter_id += 1;
            state.waiters.entry(key.clone()).or_default().push((waiter_id, tx));
            (waiter_id, rx)
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::Credential(
                "credential store dropped while waiting".to_string(),
            )),
            Err(_) => {
                // Unregister the dead waiter so the map does not accrue.
                let mut state = self.inner.state.lock().await;
                if let Some(waiters) = state.waiters.get_mut(&key) {
                    waiters.retain(|(id, _)| *id != waiter_id);
                    if waiters.is_empty() {
                        state.waiters.remove(&key);
                    }
                }
                Err(Error::Timeout(format!(
                    "no credential for provider '{}' arrived in time",
                    key.1
                )))
            }
        }
    }

    /// Provider names for a user, sorted. Values are never exposed here.
    pub async fn list(&self, user: &str) -> Vec<String> {
        let state = self.inner.state.lock().await;
        let mut providers: Vec<String> = state
            .entries
            .keys()
            .filter(|(u, _)| u.as_str() == user)
            .map(|(_, p)| p.clone())
            .collect();
        providers.sort();
        providers
    }
}
