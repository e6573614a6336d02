//! Probe history and the per-host latest-result snapshot.

use chrono::{DateTime, Utc};
use sea_orm::{
    prelude::Expr, sea_query::OnConflict, ActiveModelTrait, ColumnTrait, ConnectionTrait,
    DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};

use crate::agent_modules::prober::ProbeReport;
use crate::db::entities::{
    host, latest_result, probe_outcome,
    prelude::{Host, LatestResult, ProbeOutcome},
};

/// Persists one probe: appends the history row, advances the host's
/// `last_probe_at` and upserts its latest result, all in one transaction.
///
/// Nothing is retried here. On error the transaction is rolled back, so
/// `last_probe_at` stays where it was and the next cycle probes again.
pub async fn record_probe_outcome(
    db: &DatabaseConnection,
    host_id: i32,
    report: &ProbeReport,
    at: DateTime<Utc>,
) -> Result<probe_outcome::Model, DbErr> {
    let txn = db.begin().await?;

    let outcome = probe_outcome::ActiveModel {
        host_id: Set(host_id),
        recorded_at: Set(at),
        success: Set(report.success),
        latency_ms: Set(report.latency_ms),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let updated = Host::update_many()
        .col_expr(host::Column::LastProbeAt, Expr::value(at))
        .filter(host::Column::Id.eq(host_id))
        .exec(&txn)
        .await?;
    if updated.rows_affected == 0 {
        // Dropping `txn` rolls back the history insert.
        return Err(DbErr::RecordNotFound(format!("Host {host_id} not found")));
    }

    let snapshot = latest_result::ActiveModel {
        host_id: Set(host_id),
        recorded_at: Set(at),
        success: Set(report.success),
        latency_ms: Set(report.latency_ms),
    };
    LatestResult::insert(snapshot)
        .on_conflict(
            OnConflict::column(latest_result::Column::HostId)
                .update_columns([
                    latest_result::Column::RecordedAt,
                    latest_result::Column::Success,
                    latest_result::Column::LatencyMs,
                ])
                .to_owned(),
        )
        .exec_without_returning(&txn)
        .await?;

    txn.commit().await?;
    Ok(outcome)
}

/// Newest outcomes first. Ids grow with insertion, so this is probe order.
pub async fn get_recent_outcomes<C: ConnectionTrait>(
    db: &C,
    host_id: i32,
    limit: u64,
) -> Result<Vec<probe_outcome::Model>, DbErr> {
    ProbeOutcome::find()
        .filter(probe_outcome::Column::HostId.eq(host_id))
        .order_by_desc(probe_outcome::Column::Id)
        .limit(limit)
        .all(db)
        .await
}

pub async fn get_last_successful_outcome<C: ConnectionTrait>(
    db: &C,
    host_id: i32,
) -> Result<Option<probe_outcome::Model>, DbErr> {
    ProbeOutcome::find()
        .filter(probe_outcome::Column::HostId.eq(host_id))
        .filter(probe_outcome::Column::Success.eq(true))
        .order_by_desc(probe_outcome::Column::Id)
        .one(db)
        .await
}

pub async fn get_latest_result<C: ConnectionTrait>(
    db: &C,
    host_id: i32,
) -> Result<Option<latest_result::Model>, DbErr> {
    LatestResult::find_by_id(host_id).one(db).await
}

pub async fn get_all_latest_results<C: ConnectionTrait>(db: &C) -> Result<Vec<latest_result::Model>, DbErr> {
    LatestResult::find()
        .order_by_asc(latest_result::Column::HostId)
        .all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::services::host_service::get_host_by_id;
    use crate::db::test_support::{add_host, at, setup_db};
    use sea_orm::PaginatorTrait;

    fn report(success: bool, latency_ms: Option<f64>) -> ProbeReport {
        ProbeReport {
            success,
            latency_ms,
            attempts: 1,
        }
    }

    #[tokio::test]
    async fn recorded_outcome_reads_back_unchanged() {
        let db = setup_db().await;
        let host = add_host(&db, "edge-1", "10.0.0.1").await;
        let when = at(12, 0, 0);

        let written = record_probe_outcome(&db, host.id, &report(true, Some(12.34)), when)
            .await
            .unwrap();
        let read = get_recent_outcomes(&db, host.id, 1).await.unwrap();

        assert_eq!(read, vec![written.clone()]);
        assert!(read[0].success);
        assert_eq!(read[0].latency_ms, Some(12.34));
        assert_eq!(read[0].recorded_at, when);
    }

    #[tokio::test]
    async fn latest_result_tracks_the_newest_probe() {
        let db = setup_db().await;
        let host = add_host(&db, "edge-1", "10.0.0.1").await;

        let probes = [
            (true, Some(5.0), at(12, 0, 0)),
            (false, None, at(12, 1, 0)),
            (true, Some(7.5), at(12, 2, 0)),
        ];
        for (success, latency, when) in probes {
            record_probe_outcome(&db, host.id, &report(success, latency), when)
                .await
                .unwrap();
        }

        let latest = get_latest_result(&db, host.id).await.unwrap().unwrap();
        assert!(latest.success);
        assert_eq!(latest.latency_ms, Some(7.5));
        assert_eq!(latest.recorded_at, at(12, 2, 0));

        assert_eq!(LatestResult::find().count(&db).await.unwrap(), 1);
        assert_eq!(get_recent_outcomes(&db, host.id, 10).await.unwrap().len(), 3);

        let host = get_host_by_id(&db, host.id).await.unwrap().unwrap();
        assert_eq!(host.last_probe_at, Some(at(12, 2, 0)));
    }

    #[tokio::test]
    async fn recent_outcomes_are_newest_first_and_per_host() {
        let db = setup_db().await;
        let a = add_host(&db, "edge-1", "10.0.0.1").await;
        let b = add_host(&db, "edge-2", "10.0.0.2").await;

        record_probe_outcome(&db, a.id, &report(false, None), at(12, 0, 0)).await.unwrap();
        record_probe_outcome(&db, b.id, &report(true, Some(1.0)), at(12, 0, 1)).await.unwrap();
        record_probe_outcome(&db, a.id, &report(true, Some(2.0)), at(12, 0, 2)).await.unwrap();

        let history = get_recent_outcomes(&db, a.id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].success);
        assert!(!history[1].success);

        let last_ok = get_last_successful_outcome(&db, a.id).await.unwrap().unwrap();
        assert_eq!(last_ok.id, history[0].id);
    }

    #[tokio::test]
    async fn unknown_host_leaves_no_rows_behind() {
        let db = setup_db().await;

        let result = record_probe_outcome(&db, 999, &report(true, Some(1.0)), at(12, 0, 0)).await;

        // Either the foreign key or the host update rejects it, depending on backend.
        assert!(result.is_err());
        assert_eq!(ProbeOutcome::find().count(&db).await.unwrap(), 0);
        assert_eq!(LatestResult::find().count(&db).await.unwrap(), 0);
    }
}
