//! Client core for the Manobal well-being dashboard.
//!
//! - `poller`: interval-driven data cache with `{data, error, is_loading}` state
//! - `session`: bearer token ownership and the single-flight refresh protocol
//! - `api`: JSON client with auth, retry and the typed dashboard endpoints
//! - `cache` / `debounce`: keyed memoization and debounced calls for views
//! - `mock`: offline dashboard data
//! - `state`: config loading and the shared `ClientState`

pub mod api;
pub mod cache;
pub mod debounce;
pub mod error;
pub mod mock;
pub mod poller;
pub mod session;
pub mod state;
pub mod types;
pub mod util;

#[cfg(test)]
mod test_support;

pub use api::{ApiClient, DashboardSource, HttpTokenRefresher};
pub use cache::KeyedCache;
pub use debounce::Debouncer;
pub use error::{ApiError, ErrorInfo};
pub use poller::{FetchState, PollOptions, PollingCache};
pub use session::{PendingRequestQueue, SessionManager, TokenRefresher};
pub use state::ClientState;

/// Initialize `env_logger` from `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
