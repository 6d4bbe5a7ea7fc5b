//! Daily maintenance tick.
//!
//! One background task sleeps until 06:00 UTC, sweeps due reminders, and
//! runs the reflection pass — at most once per calendar day, guarded by
//! the persisted last-reflection marker so restarts never double-run.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::notify::Notifier;
use crate::reflection::{last_reflection_date, ReflectionEngine};
use crate::reminders::ReminderScheduler;
use crate::store::ObjectStore;

/// Hour of the daily tick, UTC.
const TICK_HOUR: u32 = 6;

pub async fn run_daily_loop(
    reflection: Option<Arc<ReflectionEngine>>,
    reminders: Arc<ReminderScheduler>,
    store: Arc<dyn ObjectStore>,
    notifier: Arc<Notifier>,
) {
    loop {
        let wait = until_next_tick(Utc::now());
        tracing::info!(seconds = wait.as_secs(), "next daily tick scheduled");
        tokio::time::sleep(wait).await;

        match reminders.check().await {
            Ok(fired) => {
                for reminder in fired {
                    notifier
                        .send(&format!("Reminder: {}", reminder.description))
                        .await;
                }
            }
            Err(err) => tracing::warn!(error = %err, "reminder sweep failed"),
        }

        let Some(engine) = &reflection else {
            continue;
        };
        let today = Utc::now().format("%Y-%m-%d").to_string();
        if last_reflection_date(store.as_ref()).await.as_deref() == Some(today.as_str()) {
            tracing::info!(date = %today, "reflection already ran today");
            continue;
        }
        match engine.run().await {
            Ok(outcome) => tracing::info!(
                success = outcome.success,
                proposed = outcome.proposed_edits.len(),
                auto_applied = outcome.auto_applied_fixes.len(),
                "daily reflection complete"
            ),
            Err(err) => tracing::error!(error = %err, "daily reflection failed"),
        }
    }
}

/// Time until the next 06:00:00 UTC after `now`.
fn until_next_tick(now: DateTime<Utc>) -> Duration {
    let today_tick = now
        .with_hour(TICK_HOUR)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("06:00 exists on every UTC day");
    let next = if today_tick > now {
        today_tick
    } else {
        today_tick + ChronoDuration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn tick_later_today_when_before_six() {
        let now = Utc.with_ymd_and_hms(2026, 8, 2, 4, 30, 0).unwrap();
        assert_eq!(until_next_tick(now), Duration::from_secs(90 * 60));
    }

    #[test]
    fn tick_tomorrow_when_after_six() {
        let now = Utc.with_ymd_and_hms(2026, 8, 2, 7, 0, 0).unwrap();
        assert_eq!(until_next_tick(now), Duration::from_secs(23 * 3600));
    }

    #[test]
    fn tick_exactly_at_six_waits_a_day() {
        let now = Utc.with_ymd_and_hms(2026, 8, 2, 6, 0, 0).unwrap();
        assert_eq!(until_next_tick(now), Duration::from_secs(24 * 3600));
    }
}
