pub mod agent_modules;
pub mod alerting;
pub mod db;
pub mod version;
