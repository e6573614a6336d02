use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "alert_kind_enum")]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    #[sea_orm(string_value = "downtime")]
    Downtime,
    #[sea_orm(string_value = "recovery")]
    Recovery,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Downtime => write!(f, "downtime"),
            AlertKind::Recovery => write!(f, "recovery"),
        }
    }
}
