use crate::backend::{Backend, InstallProbe};
use crate::events::store::EventStore;
use crate::observer::Observer;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// One-shot deeplink attribution lookup, spawned by the delivery worker
/// the first time the install is known to be affiliate-attributed.
///
/// The observer fires at most once per install: the persisted
/// `deeplink_checked` flag is set before the callback, and a transport
/// failure leaves it unset so the next process start retries the lookup.
/// Absence of a deeplink is silent.
pub(crate) fn spawn_lookup(
    store: Arc<Mutex<EventStore>>,
    backend: Arc<dyn Backend>,
    observer: Arc<dyn Observer>,
    probe: InstallProbe,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let url = match backend.lookup_deeplink(&probe) {
            Ok(url) => url,
            Err(_) => return,
        };
        {
            let Ok(store) = store.lock() else { return };
            if store.deeplink_checked().unwrap_or(true) {
                return;
            }
            if store.mark_deeplink_checked().is_err() {
                return;
            }
        }
        if let Some(url) = url {
            observer.on_deeplink_resolved(&url);
        }
    })
}
