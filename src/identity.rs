use crate::backend::{Backend, InstallAttribution, InstallProbe};
use crate::events::store::EventStore;
use anyhow::Result;

/// Platform shim for the advertising identifier lookup. On a device this
/// wraps the vendor ad-support API; tests and server-side embeddings use
/// [`FixedAdvertisingId`].
pub trait AdvertisingIdProvider: Send + Sync {
    /// `None` when the identifier is unavailable on this platform, which
    /// makes every tracking call fail with `MissingAdvertisingIdentifier`.
    fn advertising_identifier(&self) -> Option<String>;
}

pub struct FixedAdvertisingId(Option<String>);

impl FixedAdvertisingId {
    pub fn available(id: &str) -> Self {
        Self(Some(id.to_string()))
    }

    pub fn unavailable() -> Self {
        Self(None)
    }
}

impl AdvertisingIdProvider for FixedAdvertisingId {
    fn advertising_identifier(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Resolves whether this install came through a tracked campaign. The
/// classification is fetched from the backend once per install, persisted,
/// and cached in-process; it only runs on the delivery worker thread.
pub struct IdentityResolver {
    api_key: String,
    api_secret: String,
    cached: Option<InstallAttribution>,
}

impl IdentityResolver {
    pub fn new(api_key: &str, api_secret: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            cached: None,
        }
    }

    /// In-process cache or the persisted row. `None` means this install
    /// has never been classified and needs a network probe.
    pub fn known(&mut self, store: &EventStore) -> Result<Option<InstallAttribution>> {
        if let Some(cached) = self.cached {
            return Ok(Some(cached));
        }
        if let Some(persisted) = store.install_attribution()? {
            self.cached = Some(persisted);
            return Ok(Some(persisted));
        }
        Ok(None)
    }

    /// Network probe only; the store is untouched, so callers run this
    /// without holding the store lock and tracking calls are never held
    /// up by the round-trip. `None` when the backend was unreachable;
    /// the caller retries on the next drain.
    pub fn probe(
        &self,
        backend: &dyn Backend,
        device_identifier: &str,
    ) -> Option<InstallAttribution> {
        let probe = InstallProbe::build(&self.api_key, &self.api_secret, device_identifier);
        backend.resolve_install(&probe).ok()
    }

    /// Persist a freshly probed classification; the cache is only set
    /// once the row is durable, so the install is classified at most
    /// once.
    pub fn record(&mut self, store: &EventStore, attribution: InstallAttribution) -> Result<()> {
        store.set_install_attribution(attribution)?;
        self.cached = Some(attribution);
        Ok(())
    }
}
