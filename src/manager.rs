use crate::backend::Backend;
use crate::config::ManagerConfig;
use crate::delivery::DeliveryWorker;
use crate::error::{ErrorKind, TrackingError};
use crate::events::store::EventStore;
use crate::events::{EventRecord, PurchaseProduct, QueuedRecord};
use crate::identity::AdvertisingIdProvider;
use crate::logging::ndjson;
use crate::observer::Observer;
use anyhow::{Result, anyhow};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// The one instance that coordinates all tracking for a process: it owns
/// the durable queue, the delivery worker, and the observer channel.
///
/// Tracking calls are fire-and-forget: they validate synchronously, hand
/// the record to the queue, and return. Delivery outcomes only ever reach
/// the application through the [`Observer`]. Precondition failures are
/// returned from the call *and* reported to the observer, so both error
/// channels of the source protocol are served.
pub struct Manager {
    config: ManagerConfig,
    store: Arc<Mutex<EventStore>>,
    worker: DeliveryWorker,
    advertising_id: Arc<dyn AdvertisingIdProvider>,
    observer: Arc<dyn Observer>,
}

impl Manager {
    /// Open the store, validate credentials, and spawn the delivery
    /// worker (which immediately drains any records left over from the
    /// previous process lifetime). `config.test_mode` is fixed from here
    /// on; the source SDK ignores late toggles and so does this port, by
    /// taking the flag as part of the start configuration.
    pub fn start(
        config: ManagerConfig,
        backend: Arc<dyn Backend>,
        advertising_id: Arc<dyn AdvertisingIdProvider>,
        observer: Arc<dyn Observer>,
    ) -> Result<Self> {
        if config.api_key.trim().is_empty() || config.api_secret.trim().is_empty() {
            let err = TrackingError::new(
                ErrorKind::MissingAppCredentials,
                "start requires a non-empty API key and API secret",
            );
            observer.on_tracking_error(&err);
            return Err(err.into());
        }

        let store = Arc::new(Mutex::new(EventStore::open(&config.db_path())?));
        let worker = DeliveryWorker::start(
            config.clone(),
            Arc::clone(&store),
            backend,
            Arc::clone(&observer),
            Arc::clone(&advertising_id),
        );

        Ok(Self {
            config,
            store,
            worker,
            advertising_id,
            observer,
        })
    }

    /// Track a successful user registration.
    pub fn track_registration(&self, user_id: &str, user_name: &str) -> Result<()> {
        self.submit(EventRecord::registration(user_id, user_name))
    }

    /// Track a completed in-app purchase by its individual fields.
    pub fn track_purchase(
        &self,
        product_identifier: &str,
        price: f64,
        currency_code: &str,
    ) -> Result<()> {
        self.submit(EventRecord::purchase(product_identifier, price, currency_code))
    }

    /// Convenience overload for callers holding a resolved platform
    /// product object.
    pub fn track_purchase_product(&self, product: &PurchaseProduct) -> Result<()> {
        self.submit(EventRecord::purchase(
            &product.identifier,
            product.price,
            &product.currency_code,
        ))
    }

    /// Track a custom event defined in the advertiser console. `user_info`
    /// must be a JSON object when present.
    pub fn track_custom_event(&self, event_name: &str, user_info: Option<Value>) -> Result<()> {
        self.submit(EventRecord::custom(event_name, user_info))
    }

    /// Snapshot of the queued-but-undelivered records, oldest first.
    pub fn pending_events(&self) -> Result<Vec<QueuedRecord>> {
        self.lock_store()?.all()
    }

    /// Stop the delivery worker and join it. Undelivered records stay in
    /// the store and are drained on the next `start`.
    pub fn shutdown(self) {
        let Manager { worker, .. } = self;
        worker.stop();
    }

    fn submit(&self, record: Result<EventRecord, TrackingError>) -> Result<()> {
        let record = match record {
            Ok(record) => record,
            Err(err) => return Err(self.report(err)),
        };
        if self.advertising_id.advertising_identifier().is_none() {
            return Err(self.report(TrackingError::new(
                ErrorKind::MissingAdvertisingIdentifier,
                "advertising identifier unavailable on this platform",
            )));
        }

        let dropped = {
            let store = self.lock_store()?;
            store.enqueue(&record)?;
            store.evict_over_capacity(self.config.queue_capacity)?
        };
        for old in &dropped {
            if let Some(path) = &self.config.delivery_log {
                let _ = ndjson::mirror_outcome(
                    path,
                    &old.record.id,
                    &old.record.name,
                    "evicted",
                    old.record.attempts,
                    Some(ErrorKind::NetworkOperationFailed.as_str()),
                );
            }
            self.observer.on_tracking_error(&TrackingError::new(
                ErrorKind::NetworkOperationFailed,
                format!(
                    "event '{}' dropped from full queue before delivery",
                    old.record.name
                ),
            ));
        }

        self.worker.wake();
        Ok(())
    }

    /// Precondition errors hit the observer synchronously, from within the
    /// tracking call that caused them.
    fn report(&self, err: TrackingError) -> anyhow::Error {
        self.observer.on_tracking_error(&err);
        err.into()
    }

    fn lock_store(&self) -> Result<std::sync::MutexGuard<'_, EventStore>> {
        self.store
            .lock()
            .map_err(|_| anyhow!("event store mutex poisoned"))
    }
}
