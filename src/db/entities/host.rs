use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "hosts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub address: String,
    #[sea_orm(nullable)]
    pub location: Option<String>,
    pub probe_interval_seconds: i32,
    pub is_enabled: bool,
    // Written by the agent after every committed probe.
    #[sea_orm(nullable)]
    pub last_probe_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::probe_outcome::Entity")]
    ProbeOutcome,
    #[sea_orm(has_one = "super::latest_result::Entity")]
    LatestResult,
    #[sea_orm(has_many = "super::alert::Entity")]
    Alert,
}

impl Related<super::probe_outcome::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProbeOutcome.def()
    }
}

impl Related<super::latest_result::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LatestResult.def()
    }
}

impl Related<super::alert::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Alert.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
