//! Config sync core
//!
//! Keeps an account's configuration objects (profile, contacts, volatile
//! conversation info, groups) in step across devices:
//! - `registry`: one exclusively locked object per (variant, account)
//! - `loader`: rebuild objects from stored dumps at login
//! - `outgoing`: collect unpushed changes, confirm stored pushes
//! - `incoming`: merge received messages and apply them downstream
//! - `dump`: serialize objects that report unsaved state
//! - `interceptor`: route synced local writes into config objects
//! - `sync_job`: send pending changes over a transport
//!
//! ## Invariants
//!
//! - At most one object per (variant, account)
//! - Generating a push never clears `needs_push`
//! - One scheduled sync per account per write transaction

// Core types and errors
pub mod errors;
pub mod object;
pub mod types;
pub mod variant;

// Components
pub mod coordinator;
pub mod dump;
pub mod handlers;
pub mod incoming;
pub mod interceptor;
pub mod loader;
pub mod outgoing;
pub mod registry;
pub mod sync_job;

// Testing modules
#[cfg(test)]
#[path = "tests/scenario_tests.rs"]
mod scenario_tests;
#[cfg(test)]
#[path = "tests/property_tests.rs"]
mod property_tests;
#[cfg(test)]
#[path = "tests/sync_job_tests.rs"]
mod sync_job_tests;

// Re-exports
pub use coordinator::{ConfigSync, VariantStatus};
pub use dump::create_dump;
pub use errors::{SyncError, SyncResult};
pub use handlers::{
    ConfigUpdateHandler, HandlerTable, IdentityProvider, LocalChange, LoggingHandler,
    NoopScheduler, StaticIdentity, SyncScheduler, UpdateContext,
};
pub use incoming::MergeOutcome;
pub use interceptor::{InterceptOutcome, LocalMutation, SyncedTable};
pub use outgoing::PushConfirmation;
pub use object::{ConfigObject, ConfigObjectFactory};
pub use registry::{ConfigHandle, ConfigRegistry};
pub use sync_job::{ChannelScheduler, ConfigSyncJob, ConfigTransport, StoreResponse, SyncReport};
pub use types::{ConfResult, ConfigDump, OutgoingConfResult, PushData, SharedConfigMessage};
pub use variant::{ConfigKey, ConfigVariant, Namespace};
