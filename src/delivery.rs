use crate::backend::{Backend, InstallAttribution, InstallProbe, SubmitOutcome, TrackRequest};
use crate::config::ManagerConfig;
use crate::deeplink;
use crate::error::{ErrorKind, TrackingError};
use crate::events::EventKind;
use crate::events::QueuedRecord;
use crate::events::store::EventStore;
use crate::identity::{AdvertisingIdProvider, IdentityResolver};
use crate::logging::ndjson;
use crate::observer::Observer;
use anyhow::{Result, anyhow};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) enum Signal {
    Wake,
    Shutdown,
}

/// Long-lived background worker that drains the queue in strict FIFO
/// order. Woken by new enqueues, by backoff expiry, and once at process
/// start to pick up leftovers from the previous run.
pub(crate) struct DeliveryWorker {
    tx: mpsc::Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl DeliveryWorker {
    pub(crate) fn start(
        config: ManagerConfig,
        store: Arc<Mutex<EventStore>>,
        backend: Arc<dyn Backend>,
        observer: Arc<dyn Observer>,
        advertising_id: Arc<dyn AdvertisingIdProvider>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Signal>();
        let handle = thread::spawn(move || {
            let resolver = IdentityResolver::new(&config.api_key, &config.api_secret);
            let mut state = WorkerState {
                config,
                store,
                backend,
                observer,
                advertising_id,
                resolver,
                resolve_failures: 0,
                no_affiliate_reported: false,
                deeplink: None,
            };
            state.run(rx);
        });
        Self {
            tx,
            handle: Some(handle),
        }
    }

    pub(crate) fn wake(&self) {
        let _ = self.tx.send(Signal::Wake);
    }

    /// Stop the loop and join the thread. Pending records stay queued for
    /// the next start.
    pub(crate) fn stop(mut self) {
        let _ = self.tx.send(Signal::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct WorkerState {
    config: ManagerConfig,
    store: Arc<Mutex<EventStore>>,
    backend: Arc<dyn Backend>,
    observer: Arc<dyn Observer>,
    advertising_id: Arc<dyn AdvertisingIdProvider>,
    resolver: IdentityResolver,
    resolve_failures: i64,
    no_affiliate_reported: bool,
    deeplink: Option<JoinHandle<()>>,
}

impl WorkerState {
    fn run(&mut self, rx: mpsc::Receiver<Signal>) {
        // leftover records from the previous process lifetime
        let mut next_retry = self.drain_or_backoff();
        loop {
            let signal = match next_retry {
                Some(delay) => match rx.recv_timeout(delay) {
                    Ok(signal) => Some(signal),
                    Err(mpsc::RecvTimeoutError::Timeout) => None,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(signal) => Some(signal),
                    Err(_) => break,
                },
            };
            if matches!(signal, Some(Signal::Shutdown)) {
                break;
            }
            next_retry = self.drain_or_backoff();
        }
        if let Some(handle) = self.deeplink.take() {
            let _ = handle.join();
        }
    }

    fn drain_or_backoff(&mut self) -> Option<Duration> {
        // a local store failure is retried like a transient outage
        self.drain()
            .unwrap_or_else(|_| Some(self.config.retry_base))
    }

    /// Submit queued records oldest-first until the queue is empty or the
    /// head fails transiently. Returns the backoff delay to wait before
    /// the next attempt, if any.
    fn drain(&mut self) -> Result<Option<Duration>> {
        // the platform identifier can be missing entirely (tracking calls
        // already failed their precondition, but leftovers may be queued)
        let Some(device) = self.advertising_id.advertising_identifier() else {
            return Ok(if lock_store(&self.store)?.is_empty()? {
                None
            } else {
                Some(self.config.retry_max)
            });
        };

        let known = {
            let store = lock_store(&self.store)?;
            self.resolver.known(&store)?
        };
        let attribution = match known {
            Some(attribution) => attribution,
            // the probe is a network round-trip; it runs without the
            // store lock so tracking calls never wait on it
            None => match self.resolver.probe(self.backend.as_ref(), &device) {
                Some(attribution) => {
                    let store = lock_store(&self.store)?;
                    self.resolver.record(&store, attribution)?;
                    attribution
                }
                None => {
                    self.resolve_failures += 1;
                    return Ok(Some(self.backoff_delay(self.resolve_failures)));
                }
            },
        };
        self.resolve_failures = 0;

        if attribution == InstallAttribution::Affiliate {
            self.maybe_spawn_deeplink(&device)?;
        }

        loop {
            let head = lock_store(&self.store)?.peek_oldest()?;
            let Some(head) = head else {
                return Ok(None);
            };

            if attribution == InstallAttribution::NonAffiliate {
                self.discard_no_affiliate(&head)?;
                continue;
            }

            if head.record.kind == EventKind::Custom && !self.config.test_mode {
                let verified = lock_store(&self.store)?.is_verified(&head.record.name)?;
                if !verified {
                    self.reject_unverified(&head)?;
                    continue;
                }
            }

            // network round-trip happens outside the store lock so
            // tracking calls never block on it
            let request = TrackRequest::build(
                &self.config.api_key,
                &self.config.api_secret,
                &device,
                &head.record,
                self.config.test_mode,
            );
            // a record evicted while its submission was in flight was
            // already reported as dropped; `remove` returning false
            // suppresses a second terminal outcome for it
            match self.backend.submit(&request) {
                Ok(SubmitOutcome::Accepted) => {
                    let removed = {
                        let store = lock_store(&self.store)?;
                        let removed = store.remove(&head.record.id)?;
                        if self.config.test_mode {
                            store.mark_verified(&head.record.name)?;
                        }
                        removed
                    };
                    if removed {
                        self.mirror(&head, "delivered", None);
                    }
                }
                Ok(SubmitOutcome::Rejected(reason)) => {
                    if lock_store(&self.store)?.remove(&head.record.id)? {
                        let kind = reason.error_kind();
                        self.mirror(&head, "permanently_failed", Some(kind.as_str()));
                        self.observer.on_tracking_error(&TrackingError::new(
                            kind,
                            format!("backend rejected event '{}'", head.record.name),
                        ));
                    }
                }
                Err(_transport) => {
                    let attempts = head.record.attempts + 1;
                    lock_store(&self.store)?.update_attempts(
                        &head.record.id,
                        attempts,
                        Some(ErrorKind::NetworkOperationFailed.as_str()),
                    )?;
                    return Ok(Some(self.backoff_delay(attempts)));
                }
            }
        }
    }

    fn maybe_spawn_deeplink(&mut self, device: &str) -> Result<()> {
        if self.deeplink.is_some() {
            return Ok(());
        }
        if lock_store(&self.store)?.deeplink_checked()? {
            return Ok(());
        }
        let probe = InstallProbe::build(&self.config.api_key, &self.config.api_secret, device);
        self.deeplink = Some(deeplink::spawn_lookup(
            Arc::clone(&self.store),
            Arc::clone(&self.backend),
            Arc::clone(&self.observer),
            probe,
        ));
        Ok(())
    }

    /// Non-affiliate installs drain every record as a local no-op success.
    /// `NoAffiliateInstall` is reported once per process so integrators
    /// can notice during development.
    fn discard_no_affiliate(&mut self, head: &QueuedRecord) -> Result<()> {
        if !lock_store(&self.store)?.remove(&head.record.id)? {
            return Ok(());
        }
        self.mirror(head, "no_affiliate_skip", None);
        if !self.no_affiliate_reported {
            self.no_affiliate_reported = true;
            self.observer.on_tracking_error(&TrackingError::new(
                ErrorKind::NoAffiliateInstall,
                "event tracking disabled: installation not attributed to a tracked campaign",
            ));
        }
        Ok(())
    }

    fn reject_unverified(&mut self, head: &QueuedRecord) -> Result<()> {
        if !lock_store(&self.store)?.remove(&head.record.id)? {
            return Ok(());
        }
        self.mirror(
            head,
            "permanently_failed",
            Some(ErrorKind::EventNotVerified.as_str()),
        );
        self.observer.on_tracking_error(&TrackingError::new(
            ErrorKind::EventNotVerified,
            format!(
                "custom event '{}' has not been verified; track it once with test mode enabled",
                head.record.name
            ),
        ));
        Ok(())
    }

    fn backoff_delay(&self, attempts: i64) -> Duration {
        backoff_delay(self.config.retry_base, self.config.retry_max, attempts)
    }

    fn mirror(&self, head: &QueuedRecord, outcome: &str, error: Option<&str>) {
        if let Some(path) = &self.config.delivery_log {
            let _ = ndjson::mirror_outcome(
                path,
                &head.record.id,
                &head.record.name,
                outcome,
                head.record.attempts,
                error,
            );
        }
    }
}

// a free function so the guard borrows only the store field, leaving
// the rest of the worker free to mutate
fn lock_store(store: &Mutex<EventStore>) -> Result<MutexGuard<'_, EventStore>> {
    store
        .lock()
        .map_err(|_| anyhow!("event store mutex poisoned"))
}

fn backoff_delay(base: Duration, max: Duration, attempts: i64) -> Duration {
    let shift = (attempts - 1).clamp(0, 16) as u32;
    base.saturating_mul(1u32 << shift).min(max)
}
