use crate::error::TrackingError;

/// Application-side callbacks, mirroring the source SDK's optional
/// delegate protocol: all methods have empty default bodies.
///
/// `on_tracking_error` fires synchronously from within a `track_*` call
/// for precondition failures, and asynchronously from the delivery worker
/// for permanent delivery failures. An asynchronous report can arrive a
/// long time after the original call, even in a later process lifetime if
/// the device was offline until then. Transient failures are retried
/// internally and never reported.
///
/// `on_deeplink_resolved` fires at most once per install, after the
/// backend ties this installation to a campaign deeplink.
pub trait Observer: Send + Sync {
    fn on_tracking_error(&self, _error: &TrackingError) {}

    fn on_deeplink_resolved(&self, _url: &str) {}
}

/// Observer that ignores everything, for embeddings that do not care
/// about failures.
pub struct NullObserver;

impl Observer for NullObserver {}
