//! Operational switches: single-valued key/value rows with no history.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{sea_query::OnConflict, ConnectionTrait, DbErr, EntityTrait, Set};
use std::fmt;
use tracing::warn;

use crate::db::entities::{prelude::Setting, setting};

/// Run/pause switch, written by the administration side.
pub const RUN_STATE_KEY: &str = "agent_status";
/// Liveness timestamp, written by the agent every cycle.
pub const HEARTBEAT_KEY: &str = "agent_last_seen";

const HEARTBEAT_HEALTHY_SECONDS: i64 = 30;
const HEARTBEAT_DELAYED_SECONDS: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
}

impl RunState {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" => Some(RunState::Running),
            "paused" => Some(RunState::Paused),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Paused => "paused",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    NoHeartbeat,
    Healthy,
    Delayed,
    Stale,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Liveness::NoHeartbeat => "no heartbeat",
            Liveness::Healthy => "heartbeat OK",
            Liveness::Delayed => "heartbeat delayed",
            Liveness::Stale => "no recent heartbeat",
        };
        f.write_str(text)
    }
}

/// Retrieves a setting by its key.
pub async fn get_setting<C: ConnectionTrait>(db: &C, key: &str) -> Result<Option<setting::Model>, DbErr> {
    Setting::find_by_id(key.to_owned()).one(db).await
}

/// Value for `key`, or `default` when the key has never been written.
pub async fn get_setting_or<C: ConnectionTrait>(db: &C, key: &str, default: &str) -> Result<String, DbErr> {
    Ok(get_setting(db, key)
        .await?
        .map(|s| s.value)
        .unwrap_or_else(|| default.to_owned()))
}

/// Creates or overwrites a setting.
pub async fn set_setting<C: ConnectionTrait>(db: &C, key: &str, value: &str) -> Result<(), DbErr> {
    let active_setting = setting::ActiveModel {
        key: Set(key.to_owned()),
        value: Set(value.to_owned()),
        updated_at: Set(Utc::now()),
    };
    Setting::insert(active_setting)
        .on_conflict(
            OnConflict::column(setting::Column::Key)
                .update_columns([setting::Column::Value, setting::Column::UpdatedAt])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

/// Current run state. Unset means paused; so does anything unrecognised.
pub async fn get_run_state<C: ConnectionTrait>(db: &C) -> Result<RunState, DbErr> {
    match get_setting(db, RUN_STATE_KEY).await? {
        None => Ok(RunState::Paused),
        Some(s) => Ok(RunState::parse(&s.value).unwrap_or_else(|| {
            warn!(value = %s.value, "Unrecognised run state; treating as paused.");
            RunState::Paused
        })),
    }
}

pub async fn set_run_state<C: ConnectionTrait>(db: &C, state: RunState) -> Result<(), DbErr> {
    set_setting(db, RUN_STATE_KEY, state.as_str()).await
}

pub async fn write_heartbeat<C: ConnectionTrait>(db: &C, now: DateTime<Utc>) -> Result<(), DbErr> {
    set_setting(db, HEARTBEAT_KEY, &now.to_rfc3339()).await
}

/// Last heartbeat, or `None` if never written or not a valid RFC 3339 timestamp.
pub async fn read_heartbeat<C: ConnectionTrait>(db: &C) -> Result<Option<DateTime<Utc>>, DbErr> {
    Ok(get_setting(db, HEARTBEAT_KEY).await?.and_then(|s| {
        DateTime::parse_from_rfc3339(&s.value)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }))
}

pub fn classify_heartbeat(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Liveness {
    match last_seen {
        None => Liveness::NoHeartbeat,
        Some(seen) => {
            let age = now - seen;
            if age < Duration::seconds(HEARTBEAT_HEALTHY_SECONDS) {
                Liveness::Healthy
            } else if age < Duration::seconds(HEARTBEAT_DELAYED_SECONDS) {
                Liveness::Delayed
            } else {
                Liveness::Stale
            }
        }
    }
}

/// Run state plus heartbeat freshness, as shown to operators.
pub async fn agent_liveness<C: ConnectionTrait>(
    db: &C,
    now: DateTime<Utc>,
) -> Result<(RunState, Liveness), DbErr> {
    let state = get_run_state(db).await?;
    let last_seen = read_heartbeat(db).await?;
    Ok((state, classify_heartbeat(last_seen, now)))
}
