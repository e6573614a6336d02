//! Data access for the agent and for the administration side that shares
//! the same database. Each sub-module owns one table (or one concern) and
//! exposes plain async functions over a `ConnectionTrait` handle.

pub mod alert_service;
pub mod host_service;
pub mod probe_service;
pub mod settings_service;

pub use alert_service::*;
pub use host_service::*;
pub use probe_service::*;
pub use settings_service::*;
