//! Gateway contract and its implementations.
//!
//! - [`CollectionDataGateway`]: the external CRUD/count/schema service
//! - [`TimeoutGateway`], [`MetricsGateway`]: decorators applied by
//!   [`layered`]
//! - [`InMemoryGateway`]: backend for tests and demos

pub mod gateway;
pub mod memory;
pub mod metrics;
pub mod timeout;

use std::sync::Arc;
use std::time::Duration;

pub use gateway::{CollectionDataGateway, GatewayError, MigrationReport};
pub use memory::InMemoryGateway;
pub use metrics::MetricsGateway;
pub use timeout::TimeoutGateway;

/// Wraps `gateway` so every call is timed, counted, and bounded by `timeout`.
///
/// Metrics sit outermost so timed-out calls are recorded as `unavailable`.
#[must_use]
pub fn layered(
    gateway: Arc<dyn CollectionDataGateway>,
    timeout: Duration,
) -> Arc<dyn CollectionDataGateway> {
    let bounded = Arc::new(TimeoutGateway::new(gateway, timeout));
    Arc::new(MetricsGateway::new(bounded))
}
