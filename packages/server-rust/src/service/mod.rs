//! Collection admin services.
//!
//! 1. **Registry** (`schema_registry`): live schema per collection
//! 2. **Migrations** (`migrator`): runs planned schema transitions
//! 3. **Bulk** (`bulk`): multi-record operations with per-id accounting
//! 4. **Filter state** (`filter_state`): observable view parameters
//! 5. **Manager** (`manager`): the facade composing all of the above

pub mod bulk;
pub mod cancel;
pub mod filter_state;
pub mod intent;
pub mod lifecycle;
pub mod manager;
pub mod migrator;
pub mod schema_registry;

pub use bulk::{
    BulkKind, BulkOperationExecutor, BulkOperationRequest, BulkOperationResult, BulkOutput,
    FailureReason,
};
pub use cancel::CancelHandle;
pub use filter_state::{FetchRequest, FetchTicket, FilterSnapshot, QueryFilterState};
pub use intent::{IntentGuard, IntentKind, IntentLocks};
pub use lifecycle::{ManagedService, ServiceContext, ServiceRegistry};
pub use manager::CollectionManager;
pub use migrator::Migrator;
pub use schema_registry::SchemaRegistry;
