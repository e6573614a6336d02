//! SeaORM entities for the agent's tables.
//!
//! `hosts` and the run-state row in `settings` are written by the
//! administration side; everything else is written by the agent.

pub mod alert;
pub mod host;
pub mod latest_result;
pub mod probe_outcome;
pub mod setting;

pub mod prelude {
    pub use super::host::ActiveModel as HostActiveModel;
    pub use super::host::Column as HostColumn;
    pub use super::host::Entity as Host;
    pub use super::host::Model as HostModel;

    pub use super::probe_outcome::ActiveModel as ProbeOutcomeActiveModel;
    pub use super::probe_outcome::Column as ProbeOutcomeColumn;
    pub use super::probe_outcome::Entity as ProbeOutcome;
    pub use super::probe_outcome::Model as ProbeOutcomeModel;

    pub use super::latest_result::ActiveModel as LatestResultActiveModel;
    pub use super::latest_result::Column as LatestResultColumn;
    pub use super::latest_result::Entity as LatestResult;
    pub use super::latest_result::Model as LatestResultModel;

    pub use super::alert::ActiveModel as AlertActiveModel;
    pub use super::alert::Column as AlertColumn;
    pub use super::alert::Entity as Alert;
    pub use super::alert::Model as AlertModel;

    pub use super::setting::ActiveModel as SettingActiveModel;
    pub use super::setting::Column as SettingColumn;
    pub use super::setting::Entity as Setting;
    pub use super::setting::Model as SettingModel;
}
