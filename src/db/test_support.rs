use chrono::{DateTime, TimeZone, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use crate::db::entities::host;
use crate::db::schema::ensure_schema;
use crate::db::services::host_service::{create_host, NewHost};

/// Fresh in-memory SQLite database with the agent schema.
pub async fn setup_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    // Every pooled connection would otherwise see its own empty database.
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    ensure_schema(&db).await.unwrap();
    db
}

pub async fn add_host(db: &DatabaseConnection, name: &str, address: &str) -> host::Model {
    create_host(
        db,
        NewHost {
            name: name.to_string(),
            address: address.to_string(),
            location: None,
            probe_interval_seconds: None,
            is_enabled: true,
        },
    )
    .await
    .unwrap()
}

pub fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, hour, minute, second).unwrap()
}
