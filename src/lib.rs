//! Mobile-app-side event-attribution client.
//!
//! Identifies installs as originating from ad campaigns and reliably
//! reports lifecycle events (registrations, purchases, custom events) to a
//! remote attribution backend. Tracking calls are fire-and-forget: records
//! land in a durable sqlite-backed queue and a background worker delivers
//! them in strict FIFO order, retrying transient failures with bounded
//! exponential backoff across process restarts. Permanent failures are
//! reported asynchronously through the [`Observer`].
//!
//! ```no_run
//! use adtrack::{FixedAdvertisingId, Manager, ManagerConfig, NullObserver};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn backend() -> Arc<dyn adtrack::Backend> { unimplemented!() }
//! let config = ManagerConfig::new("<API KEY>", "<API SECRET>", Path::new("/var/app/adtrack"));
//! let manager = Manager::start(
//!     config,
//!     backend(),
//!     Arc::new(FixedAdvertisingId::available("idfa-...")),
//!     Arc::new(NullObserver),
//! )?;
//! manager.track_registration("user-42", "Jane")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod backend;
pub mod config;
mod deeplink;
mod delivery;
pub mod error;
pub mod events;
pub mod identity;
pub mod logging;
pub mod manager;
pub mod observer;

pub use backend::{
    Backend, InstallAttribution, InstallProbe, RejectReason, SubmitOutcome, TrackRequest,
    TransportError,
};
pub use config::{FileConfig, ManagerConfig, load_config_file};
pub use error::{ErrorKind, TrackingError};
pub use events::{EventKind, EventRecord, PurchaseProduct, QueuedRecord};
pub use identity::{AdvertisingIdProvider, FixedAdvertisingId};
pub use manager::Manager;
pub use observer::{NullObserver, Observer};

pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
