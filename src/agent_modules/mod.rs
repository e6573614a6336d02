pub mod config;
pub mod prober;
pub mod scheduler;
