//! Lifecycle-driven cache worker.
//!
//! The controller implements the install/fetch/activate handlers; the host
//! delivers those events in order and serves fetches once active; the network
//! module fetches assets over HTTP.

mod controller;
mod host;
mod net;

pub use controller::{CacheController, CacheIdentity};
pub use host::{WorkerHost, WorkerState};
pub use net::{HttpFetcher, NetworkFetch};
