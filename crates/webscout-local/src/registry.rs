//! Named search backends, shared process-wide.
//!
//! Reads take a lock-free snapshot of the provider list; writers serialize on
//! a mutex and publish a fresh list. Lookups hand out `Arc` clones, so a
//! `search()` already in flight keeps running on the instance it resolved even
//! if that name is re-registered meanwhile.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use webscout_core::{Error, Result, SearchProvider};

use crate::search::{BraveSearchProvider, FetchOnlyProvider, FETCH_ONLY_PROVIDER};

type ProviderList = Vec<Arc<dyn SearchProvider>>;

struct Inner {
    providers: ArcSwap<ProviderList>,
    write: Mutex<()>,
}

#[derive(Clone)]
pub struct ProviderRegistry {
    inner: Arc<Inner>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// A registry holding only the fetch-only fallback.
    pub fn new() -> Self {
        let fallback: Arc<dyn SearchProvider> = Arc::new(FetchOnlyProvider);
        Self {
            inner: Arc::new(Inner {
                providers: ArcSwap::from_pointee(vec![fallback]),
                write: Mutex::new(()),
            }),
        }
    }

    /// Fallback plus the network-backed built-ins.
    pub fn with_builtins(client: reqwest::Client) -> Self {
        let r = Self::new();
        r.register(Arc::new(BraveSearchProvider::new(client)));
        r
    }

    /// Insert or replace by name. A replacement keeps the original position.
    pub fn register(&self, provider: Arc<dyn SearchProvider>) {
        let name = provider.name().to_string();
        if name == FETCH_ONLY_PROVIDER {
            tracing::warn!(provider = %name, "refusing to replace the fallback provider");
            return;
        }
        let _w = self.inner.write.lock();
        let mut next: ProviderList = Vec::clone(&self.inner.providers.load());
        match next.iter().position(|p| p.name() == name) {
            Some(i) => {
                tracing::debug!(provider = %name, "provider replaced");
                next[i] = provider;
            }
            None => {
                tracing::debug!(provider = %name, "provider registered");
                next.push(provider);
            }
        }
        self.inner.providers.store(Arc::new(next));
    }

    pub fn unregister(&self, name: &str) {
        if name == FETCH_ONLY_PROVIDER {
            return;
        }
        let _w = self.inner.write.lock();
        let current = self.inner.providers.load();
        if !current.iter().any(|p| p.name() == name) {
            return;
        }
        let next: ProviderList = current
            .iter()
            .filter(|p| p.name() != name)
            .cloned()
            .collect();
        self.inner.providers.store(Arc::new(next));
        tracing::debug!(provider = %name, "provider unregistered");
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SearchProvider>> {
        self.inner
            .providers
            .load()
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<dyn SearchProvider>> {
        Vec::clone(&self.inner.providers.load())
    }

    /// Availability is evaluated now, never cached.
    pub fn get_available(&self) -> Vec<Arc<dyn SearchProvider>> {
        self.inner
            .providers
            .load()
            .iter()
            .filter(|p| p.check_availability())
            .cloned()
            .collect()
    }

    /// First available non-fallback provider, else the fallback.
    pub fn get_default(&self) -> Arc<dyn SearchProvider> {
        let snapshot = self.inner.providers.load();
        if let Some(p) = snapshot
            .iter()
            .find(|p| !p.is_fallback() && p.check_availability())
        {
            return p.clone();
        }
        snapshot
            .iter()
            .find(|p| p.is_fallback())
            .cloned()
            .unwrap_or_else(|| Arc::new(FetchOnlyProvider) as Arc<dyn SearchProvider>)
    }

    /// Named provider (must exist and be available), or the default.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn SearchProvider>> {
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok(self.get_default());
        };
        let p = self
            .get(name)
            .ok_or_else(|| Error::UnknownProvider(name.to_string()))?;
        if !p.check_availability() {
            return Err(Error::ProviderUnavailable(format!(
                "{name}: {}",
                p.describe()
            )));
        }
        Ok(p)
    }

    /// Whether any real (non-fallback) search backend is available right now.
    pub fn has_search(&self) -> bool {
        self.inner
            .providers
            .load()
            .iter()
            .any(|p| !p.is_fallback() && p.check_availability())
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .providers
            .load()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Consume registration events until every sender is dropped.
    pub fn spawn_event_listener(
        &self,
        mut rx: mpsc::Receiver<ProviderEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                match ev {
                    ProviderEvent::Register(p) => registry.register(p),
                    ProviderEvent::Unregister(name) => registry.unregister(&name),
                }
            }
            tracing::debug!("provider event channel closed");
        })
    }
}

/// Out-of-band registry change, delivered over [`ProviderRegistry::spawn_event_listener`].
pub enum ProviderEvent {
    Register(Arc<dyn SearchProvider>),
    Unregister(String),
}

impl fmt::Debug for ProviderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(p) => f.debug_tuple("Register").field(&p.name()).finish(),
            Self::Unregister(n) => f.debug_tuple("Unregister").field(n).finish(),
        }
    }
}
