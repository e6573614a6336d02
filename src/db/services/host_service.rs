use chrono::Utc;
use sea_orm::{
    prelude::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, UpdateResult,
};

use crate::db::entities::{host, prelude::Host};

pub const DEFAULT_PROBE_INTERVAL_SECONDS: i32 = 60;

#[derive(Debug, Clone)]
pub struct NewHost {
    pub name: String,
    pub address: String,
    pub location: Option<String>,
    pub probe_interval_seconds: Option<i32>,
    pub is_enabled: bool,
}

/// Creates a host record. The interval defaults to 60 seconds.
pub async fn create_host<C: ConnectionTrait>(db: &C, new_host: NewHost) -> Result<host::Model, DbErr> {
    let interval = new_host
        .probe_interval_seconds
        .unwrap_or(DEFAULT_PROBE_INTERVAL_SECONDS);
    if interval <= 0 {
        return Err(DbErr::Custom(format!(
            "Probe interval must be positive, got {interval}"
        )));
    }

    host::ActiveModel {
        name: Set(new_host.name),
        address: Set(new_host.address),
        location: Set(new_host.location),
        probe_interval_seconds: Set(interval),
        is_enabled: Set(new_host.is_enabled),
        last_probe_at: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn get_host_by_id<C: ConnectionTrait>(db: &C, host_id: i32) -> Result<Option<host::Model>, DbErr> {
    Host::find_by_id(host_id).one(db).await
}

pub async fn get_enabled_hosts<C: ConnectionTrait>(db: &C) -> Result<Vec<host::Model>, DbErr> {
    // Id order keeps per-cycle processing stable.
    Host::find()
        .filter(host::Column::IsEnabled.eq(true))
        .order_by_asc(host::Column::Id)
        .all(db)
        .await
}

pub async fn set_host_enabled<C: ConnectionTrait>(
    db: &C,
    host_id: i32,
    enabled: bool,
) -> Result<UpdateResult, DbErr> {
    Host::update_many()
        .col_expr(host::Column::IsEnabled, Expr::value(enabled))
        .filter(host::Column::Id.eq(host_id))
        .exec(db)
        .await
}

/// Interval in seconds, falling back to the default for rows written with a
/// non-positive value.
pub fn effective_interval(host: &host::Model) -> i64 {
    if host.probe_interval_seconds > 0 {
        host.probe_interval_seconds as i64
    } else {
        DEFAULT_PROBE_INTERVAL_SECONDS as i64
    }
}
