//! Creates the agent's tables when they are missing.
//!
//! Only ever issues `CREATE ... IF NOT EXISTS`; altering or dropping
//! existing tables is left to whoever administers the database.

use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, Schema};
use tracing::debug;

use crate::db::entities::{alert, host, latest_result, probe_outcome, setting};

pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    // Parent table first so foreign keys resolve.
    create_if_missing(db, host::Entity).await?;
    create_if_missing(db, probe_outcome::Entity).await?;
    create_if_missing(db, latest_result::Entity).await?;
    create_if_missing(db, alert::Entity).await?;
    create_if_missing(db, setting::Entity).await?;
    Ok(())
}

async fn create_if_missing<E>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    db.execute(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }

    debug!(table = %entity.table_name(), "Ensured table exists.");
    Ok(())
}
