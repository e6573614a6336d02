use chrono::Utc;
use sea_orm::{DatabaseConnection, DbErr};
use tracing::{info, warn};

use crate::db::entities::{alert, host, probe_outcome};
use crate::db::enums::AlertKind;
use crate::db::services::{
    alert_service::{self, NewAlert},
    probe_service,
};

/// Consecutive failures that make a host count as down.
pub const DOWNTIME_WINDOW: usize = 3;
/// A success directly after a full downtime window.
pub const RECOVERY_WINDOW: usize = DOWNTIME_WINDOW + 1;

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Database query error: {0}")]
    DatabaseError(#[from] DbErr),
}

/// Decides, from a host's persisted probe history, whether a downtime or
/// recovery alert is due, and records it at most once per transition.
#[derive(Clone)]
pub struct EvaluationService {
    db: DatabaseConnection,
}

impl EvaluationService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Runs both rules against the host's newest outcomes and returns the
    /// alerts that were written. Must be called after the outcome that
    /// triggered it has been committed.
    pub async fn evaluate_host(&self, host: &host::Model) -> Result<Vec<alert::Model>, EvaluationError> {
        let recent =
            probe_service::get_recent_outcomes(&self.db, host.id, RECOVERY_WINDOW as u64).await?;
        let mut emitted = Vec::new();

        if let Some(trigger) = self.downtime_trigger(host, &recent).await? {
            let alert = alert_service::insert_alert(
                &self.db,
                NewAlert {
                    host_id: host.id,
                    kind: AlertKind::Downtime,
                    message: format!(
                        "Host '{}' ({}) failed {} consecutive probes.",
                        host.name, host.address, DOWNTIME_WINDOW
                    ),
                    trigger_outcome_id: trigger.id,
                    created_at: Utc::now(),
                },
            )
            .await?;
            warn!(host_id = host.id, host = %host.name, address = %host.address, "Downtime alert raised.");
            emitted.push(alert);
        }

        if let Some(trigger) = self.recovery_trigger(host, &recent).await? {
            let alert = alert_service::insert_alert(
                &self.db,
                NewAlert {
                    host_id: host.id,
                    kind: AlertKind::Recovery,
                    message: format!(
                        "Host '{}' ({}) recovered after downtime.",
                        host.name, host.address
                    ),
                    trigger_outcome_id: trigger.id,
                    created_at: Utc::now(),
                },
            )
            .await?;
            info!(host_id = host.id, host = %host.name, address = %host.address, "Recovery alert raised.");
            emitted.push(alert);
        }

        Ok(emitted)
    }

    /// `recent` is newest first. Returns the newest outcome when the host
    /// has just been seen down and the current streak has no alert yet.
    async fn downtime_trigger<'a>(
        &self,
        host: &host::Model,
        recent: &'a [probe_outcome::Model],
    ) -> Result<Option<&'a probe_outcome::Model>, EvaluationError> {
        if !is_downtime_window(recent) {
            return Ok(None);
        }

        // The streak began after the last success. An earlier downtime alert
        // only covers it if it was raised after that success.
        if let Some(newest_alert) = alert_service::get_newest_alert_for_host(&self.db, host.id).await? {
            if newest_alert.kind == AlertKind::Downtime {
                let last_success = probe_service::get_last_successful_outcome(&self.db, host.id).await?;
                let covers_streak = match last_success {
                    Some(success) => newest_alert.trigger_outcome_id > success.id,
                    None => true,
                };
                if covers_streak {
                    return Ok(None);
                }
            }
        }

        Ok(recent.first())
    }

    async fn recovery_trigger<'a>(
        &self,
        host: &host::Model,
        recent: &'a [probe_outcome::Model],
    ) -> Result<Option<&'a probe_outcome::Model>, EvaluationError> {
        if !is_recovery_window(recent) {
            return Ok(None);
        }

        let newest = &recent[0];
        let existing = alert_service::find_alert_for_transition(
            &self.db,
            host.id,
            AlertKind::Recovery,
            newest.id,
        )
        .await?;

        Ok(if existing.is_some() { None } else { Some(newest) })
    }
}

/// Exactly the window's worth of history, all failed.
fn is_downtime_window(recent: &[probe_outcome::Model]) -> bool {
    recent.len() >= DOWNTIME_WINDOW && recent[..DOWNTIME_WINDOW].iter().all(|o| !o.success)
}

/// Newest succeeded, the window before it all failed.
fn is_recovery_window(recent: &[probe_outcome::Model]) -> bool {
    recent.len() >= RECOVERY_WINDOW
        && recent[0].success
        && recent[1..RECOVERY_WINDOW].iter().all(|o| !o.success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_modules::prober::ProbeReport;
    use crate::db::services::probe_service::record_probe_outcome;
    use crate::db::test_support::{add_host, at, setup_db};

    async fn probe(db: &DatabaseConnection, host: &host::Model, success: bool, minute: u32) {
        let report = ProbeReport {
            success,
            latency_ms: success.then_some(4.2),
            attempts: 1,
        };
        record_probe_outcome(db, host.id, &report, at(10, minute, 0))
            .await
            .unwrap();
    }

    /// Records each outcome and evaluates after it, like the scheduler does.
    async fn replay(
        db: &DatabaseConnection,
        evaluator: &EvaluationService,
        host: &host::Model,
        outcomes: &[bool],
    ) -> Vec<Vec<AlertKind>> {
        let mut per_step = Vec::new();
        for (i, success) in outcomes.iter().enumerate() {
            probe(db, host, *success, i as u32).await;
            let alerts = evaluator.evaluate_host(host).await.unwrap();
            per_step.push(alerts.into_iter().map(|a| a.kind).collect());
        }
        per_step
    }

    #[tokio::test]
    async fn single_failure_raises_nothing() {
        let db = setup_db().await;
        let host = add_host(&db, "edge-1", "10.0.0.1").await;
        let evaluator = EvaluationService::new(db.clone());

        let steps = replay(&db, &evaluator, &host, &[false]).await;

        assert_eq!(steps, vec![vec![]]);
        let latest = probe_service::get_latest_result(&db, host.id).await.unwrap().unwrap();
        assert!(!latest.success);
        assert_eq!(latest.latency_ms, None);
        assert_eq!(probe_service::get_recent_outcomes(&db, host.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn third_consecutive_failure_raises_one_downtime_alert() {
        let db = setup_db().await;
        let host = add_host(&db, "edge-1", "10.0.0.1").await;
        let evaluator = EvaluationService::new(db.clone());

        let steps = replay(&db, &evaluator, &host, &[false, false, false]).await;

        assert_eq!(steps, vec![vec![], vec![], vec![AlertKind::Downtime]]);
        let alerts = alert_service::get_alerts_for_host(&db, host.id, 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(
            alerts[0].message,
            "Host 'edge-1' (10.0.0.1) failed 3 consecutive probes."
        );
    }

    #[tokio::test]
    async fn downtime_is_not_repeated_while_still_down() {
        let db = setup_db().await;
        let host = add_host(&db, "edge-1", "10.0.0.1").await;
        let evaluator = EvaluationService::new(db.clone());

        let steps = replay(&db, &evaluator, &host, &[false, false, false, false, false]).await;

        let downtime_count = steps.iter().flatten().filter(|k| **k == AlertKind::Downtime).count();
        assert_eq!(downtime_count, 1);
    }

    #[tokio::test]
    async fn evaluating_unchanged_history_twice_is_idempotent() {
        let db = setup_db().await;
        let host = add_host(&db, "edge-1", "10.0.0.1").await;
        let evaluator = EvaluationService::new(db.clone());
        replay(&db, &evaluator, &host, &[false, false, false]).await;

        assert!(evaluator.evaluate_host(&host).await.unwrap().is_empty());
        assert!(evaluator.evaluate_host(&host).await.unwrap().is_empty());
        assert_eq!(alert_service::get_alerts_for_host(&db, host.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn success_after_downtime_raises_one_recovery_alert() {
        let db = setup_db().await;
        let host = add_host(&db, "edge-1", "10.0.0.1").await;
        let evaluator = EvaluationService::new(db.clone());

        let steps = replay(&db, &evaluator, &host, &[false, false, false, true]).await;

        assert_eq!(
            steps,
            vec![vec![], vec![], vec![AlertKind::Downtime], vec![AlertKind::Recovery]]
        );

        // Re-evaluating the same transition point does not fire again.
        assert!(evaluator.evaluate_host(&host).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_outage_raises_nothing() {
        let db = setup_db().await;
        let host = add_host(&db, "edge-1", "10.0.0.1").await;
        let evaluator = EvaluationService::new(db.clone());

        let steps = replay(&db, &evaluator, &host, &[true, false, false, true, true]).await;

        assert!(steps.iter().all(|s| s.is_empty()));
    }

    #[tokio::test]
    async fn a_new_outage_after_recovery_alerts_again() {
        let db = setup_db().await;
        let host = add_host(&db, "edge-1", "10.0.0.1").await;
        let evaluator = EvaluationService::new(db.clone());

        let outcomes = [false, false, false, true, false, false, false];
        let steps = replay(&db, &evaluator, &host, &outcomes).await;

        let kinds: Vec<AlertKind> = steps.into_iter().flatten().collect();
        assert_eq!(
            kinds,
            vec![AlertKind::Downtime, AlertKind::Recovery, AlertKind::Downtime]
        );
    }

    #[tokio::test]
    async fn stale_downtime_alert_does_not_suppress_a_new_streak() {
        let db = setup_db().await;
        let host = add_host(&db, "edge-1", "10.0.0.1").await;
        let evaluator = EvaluationService::new(db.clone());

        // Downtime alert raised, then a success that (here) never got a
        // recovery alert, then a fresh streak.
        replay(&db, &evaluator, &host, &[false, false, false]).await;
        probe(&db, &host, true, 30).await;
        for minute in 31..34 {
            probe(&db, &host, false, minute).await;
        }

        let alerts = evaluator.evaluate_host(&host).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Downtime);
    }

    #[test]
    fn windows_require_enough_history() {
        let outcome = |id: i32, success: bool| probe_outcome::Model {
            id,
            host_id: 1,
            recorded_at: at(10, 0, 0),
            success,
            latency_ms: None,
        };

        let two_failures = vec![outcome(2, false), outcome(1, false)];
        assert!(!is_downtime_window(&two_failures));

        let three_failures = vec![outcome(3, false), outcome(2, false), outcome(1, false)];
        assert!(is_downtime_window(&three_failures));
        assert!(!is_recovery_window(&three_failures));

        let recovered = vec![
            outcome(4, true),
            outcome(3, false),
            outcome(2, false),
            outcome(1, false),
        ];
        assert!(is_recovery_window(&recovered));
        assert!(!is_downtime_window(&recovered));
    }
}
