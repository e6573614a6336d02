use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

use crate::db::entities::{alert, prelude::Alert};
use crate::db::enums::AlertKind;

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub host_id: i32,
    pub kind: AlertKind,
    pub message: String,
    pub trigger_outcome_id: i32,
    pub created_at: DateTime<Utc>,
}

/// Appends an alert. Alerts are never edited afterwards.
pub async fn insert_alert<C: ConnectionTrait>(db: &C, new_alert: NewAlert) -> Result<alert::Model, DbErr> {
    alert::ActiveModel {
        host_id: Set(new_alert.host_id),
        kind: Set(new_alert.kind),
        message: Set(new_alert.message),
        trigger_outcome_id: Set(new_alert.trigger_outcome_id),
        created_at: Set(new_alert.created_at),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn get_newest_alert_for_host<C: ConnectionTrait>(
    db: &C,
    host_id: i32,
) -> Result<Option<alert::Model>, DbErr> {
    Alert::find()
        .filter(alert::Column::HostId.eq(host_id))
        .order_by_desc(alert::Column::Id)
        .one(db)
        .await
}

/// The alert of `kind` raised when outcome `trigger_outcome_id` was evaluated, if any.
pub async fn find_alert_for_transition<C: ConnectionTrait>(
    db: &C,
    host_id: i32,
    kind: AlertKind,
    trigger_outcome_id: i32,
) -> Result<Option<alert::Model>, DbErr> {
    Alert::find()
        .filter(alert::Column::HostId.eq(host_id))
        .filter(alert::Column::Kind.eq(kind))
        .filter(alert::Column::TriggerOutcomeId.eq(trigger_outcome_id))
        .one(db)
        .await
}

/// Most recent alerts across all hosts, newest first.
pub async fn get_recent_alerts<C: ConnectionTrait>(db: &C, limit: u64) -> Result<Vec<alert::Model>, DbErr> {
    Alert::find()
        .order_by_desc(alert::Column::Id)
        .limit(limit)
        .all(db)
        .await
}

pub async fn get_alerts_for_host<C: ConnectionTrait>(
    db: &C,
    host_id: i32,
    limit: u64,
) -> Result<Vec<alert::Model>, DbErr> {
    Alert::find()
        .filter(alert::Column::HostId.eq(host_id))
        .order_by_desc(alert::Column::Id)
        .limit(limit)
        .all(db)
        .await
}
