//! Reminder scheduling — one-shot instants and 5-field cron expressions,
//! fired by polling `check`.
//!
//! All reminders persist as a single JSON blob in the object store.
//! Firing is at-most-once per matching UTC minute for cron reminders and
//! exactly once for one-shots (which are removed as they fire). Invalid
//! cron expressions never match and never error.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::store::ObjectStore;

/// Fixed key of the persisted reminder blob.
pub const REMINDERS_KEY: &str = "reminders/index.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    /// Fires once at an RFC 3339 instant, then is removed.
    Once,
    /// Fires whenever the 5-field UTC cron expression matches, at most
    /// once per matching minute.
    Cron,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    pub expression: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired: Option<String>,
}

/// Upsert request for [`ReminderScheduler::schedule`]. A missing id gets
/// a generated UUID.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    pub expression: String,
    pub description: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

pub struct ReminderScheduler {
    store: Arc<dyn ObjectStore>,
    /// Serializes every read-modify-write of the blob.
    lock: Mutex<()>,
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    pub async fn list(&self) -> Result<Vec<Reminder>> {
        self.load().await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Reminder>> {
        Ok(self.load().await?.into_iter().find(|r| r.id == id))
    }

    /// Insert or replace a reminder keyed by id.
    pub async fn schedule(&self, request: ScheduleRequest) -> Result<Reminder> {
        let _guard = self.lock.lock().await;
        let mut reminders = self.load().await?;

        let id = request
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let reminder = Reminder {
            id: id.clone(),
            kind: request.kind,
            expression: request.expression,
            description: request.description,
            payload: request.payload,
            created_at: Utc::now().to_rfc3339(),
            last_fired: None,
        };

        match reminders.iter_mut().find(|r| r.id == id) {
            Some(existing) => *existing = reminder.clone(),
            None => reminders.push(reminder.clone()),
        }
        self.persist(&reminders).await?;
        tracing::info!(id = %reminder.id, expression = %reminder.expression, "reminder scheduled");
        Ok(reminder)
    }

    /// Remove a reminder. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut reminders = self.load().await?;
        let before = reminders.len();
        reminders.retain(|r| r.id != id);
        let removed = reminders.len() != before;
        if removed {
            self.persist(&reminders).await?;
            tracing::info!(id = %id, "reminder removed");
        }
        Ok(removed)
    }

    /// Fire everything due now. See [`check_at`](Self::check_at).
    pub async fn check(&self) -> Result<Vec<Reminder>> {
        self.check_at(Utc::now()).await
    }

    /// Fire everything due at `now`:
    /// - one-shots whose instant has passed fire and are removed;
    /// - cron reminders fire when the expression matches `now` and
    ///   `last_fired` is not in the same UTC minute.
    ///
    /// The blob is rewritten only when something fired or was removed.
    pub async fn check_at(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let _guard = self.lock.lock().await;
        let mut reminders = self.load().await?;
        let mut fired = Vec::new();
        let mut retained = Vec::new();
        let mut dirty = false;

        for mut reminder in reminders.drain(..) {
            match reminder.kind {
                ReminderKind::Once => {
                    let due = DateTime::parse_from_rfc3339(&reminder.expression)
                        .map(|at| at.with_timezone(&Utc) <= now)
                        .unwrap_or(false);
                    if due {
                        dirty = true;
                        fired.push(reminder);
                    } else {
                        retained.push(reminder);
                    }
                }
                ReminderKind::Cron => {
                    let matches = cron_matches(&reminder.expression, now);
                    let already_fired = reminder
                        .last_fired
                        .as_deref()
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|last| same_utc_minute(last.with_timezone(&Utc), now))
                        .unwrap_or(false);
                    if matches && !already_fired {
                        reminder.last_fired = Some(now.to_rfc3339());
                        dirty = true;
                        fired.push(reminder.clone());
                    }
                    retained.push(reminder);
                }
            }
        }

        if dirty {
            self.persist(&retained).await?;
            tracing::info!(count = fired.len(), "reminders fired");
        }
        Ok(fired)
    }

    async fn load(&self) -> Result<Vec<Reminder>> {
        match self.store.read(REMINDERS_KEY).await? {
            Some(file) => serde_json::from_str(&file.content)
                .context("failed to parse reminder index"),
            None => Ok(Vec::new()),
        }
    }

    async fn persist(&self, reminders: &[Reminder]) -> Result<()> {
        let json = serde_json::to_string_pretty(reminders)?;
        self.store.write(REMINDERS_KEY, &json).await?;
        Ok(())
    }
}

fn same_utc_minute(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year()
        && a.month() == b.month()
        && a.day() == b.day()
        && a.hour() == b.hour()
        && a.minute() == b.minute()
}

// ── Cron matching ────────────────────────────────────────────────────────

/// Evaluate a 5-field cron expression (`minute hour day-of-month month
/// day-of-week`, UTC) against an instant. Invalid expressions match
/// nothing.
pub fn cron_matches(expression: &str, at: DateTime<Utc>) -> bool {
    let Some(expr) = CronExpr::parse(expression) else {
        return false;
    };
    expr.matches(at)
}

struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    fn parse(expression: &str) -> Option<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return None;
        }
        Some(Self {
            minute: CronField::parse(fields[0], 0, 59)?,
            hour: CronField::parse(fields[1], 0, 23)?,
            day_of_month: CronField::parse(fields[2], 1, 31)?,
            month: CronField::parse(fields[3], 1, 12)?,
            // 0 and 7 both mean Sunday.
            day_of_week: CronField::parse(fields[4], 0, 7)?,
        })
    }

    fn matches(&self, at: DateTime<Utc>) -> bool {
        let dow = at.weekday().num_days_from_sunday();
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && (self.day_of_week.matches(dow) || (dow == 0 && self.day_of_week.matches(7)))
    }
}

struct CronField {
    elements: Vec<FieldElement>,
}

enum FieldElement {
    Any,
    Exact(u32),
    Range(u32, u32),
    /// `*/N` — matches any value divisible by N.
    Step(u32),
}

impl CronField {
    fn parse(field: &str, min: u32, max: u32) -> Option<Self> {
        let mut elements = Vec::new();
        for part in field.split(',') {
            elements.push(FieldElement::parse(part, min, max)?);
        }
        if elements.is_empty() {
            return None;
        }
        Some(Self { elements })
    }

    fn matches(&self, value: u32) -> bool {
        self.elements.iter().any(|e| e.matches(value))
    }
}

impl FieldElement {
    fn parse(part: &str, min: u32, max: u32) -> Option<Self> {
        if part == "*" {
            return Some(Self::Any);
        }
        if let Some(step) = part.strip_prefix("*/") {
            let step: u32 = step.parse().ok()?;
            if step == 0 {
                return None;
            }
            return Some(Self::Step(step));
        }
        if let Some((lo, hi)) = part.split_once('-') {
            let lo: u32 = lo.parse().ok()?;
            let hi: u32 = hi.parse().ok()?;
            if lo < min || hi > max || lo > hi {
                return None;
            }
            return Some(Self::Range(lo, hi));
        }
        let value: u32 = part.parse().ok()?;
        if value < min || value > max {
            return None;
        }
        Some(Self::Exact(value))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(n) => value == *n,
            Self::Range(lo, hi) => (*lo..=*hi).contains(&value),
            Self::Step(n) => value % n == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn wildcard_matches_everything() {
        assert!(cron_matches("* * * * *", utc(2026, 8, 2, 14, 37, 12)));
    }

    #[test]
    fn exact_fields_match_only_their_minute() {
        assert!(cron_matches("0 9 * * *", utc(2026, 8, 2, 9, 0, 0)));
        assert!(cron_matches("0 9 * * *", utc(2026, 8, 2, 9, 0, 59)));
        assert!(!cron_matches("0 9 * * *", utc(2026, 8, 2, 9, 1, 0)));
        assert!(!cron_matches("0 9 * * *", utc(2026, 8, 2, 10, 0, 0)));
    }

    #[test]
    fn step_matches_divisible_values() {
        // `*/2` in the hour field fires on even hours only
        assert!(cron_matches("0 */2 * * *", utc(2026, 8, 2, 0, 0, 0)));
        assert!(cron_matches("0 */2 * * *", utc(2026, 8, 2, 14, 0, 0)));
        assert!(!cron_matches("0 */2 * * *", utc(2026, 8, 2, 13, 0, 0)));
    }

    #[test]
    fn ranges_and_lists() {
        assert!(cron_matches("0-15 * * * *", utc(2026, 8, 2, 3, 10, 0)));
        assert!(!cron_matches("0-15 * * * *", utc(2026, 8, 2, 3, 20, 0)));
        assert!(cron_matches("0,30 * * * *", utc(2026, 8, 2, 3, 30, 0)));
        assert!(!cron_matches("0,30 * * * *", utc(2026, 8, 2, 3, 15, 0)));
        assert!(cron_matches("5,10-12,*/20 * * * *", utc(2026, 8, 2, 3, 40, 0)));
    }

    #[test]
    fn day_of_week_sunday_is_zero_or_seven() {
        // 2026-08-02 is a Sunday
        assert!(cron_matches("0 9 * * 0", utc(2026, 8, 2, 9, 0, 0)));
        assert!(cron_matches("0 9 * * 7", utc(2026, 8, 2, 9, 0, 0)));
        assert!(!cron_matches("0 9 * * 1", utc(2026, 8, 2, 9, 0, 0)));
        assert!(cron_matches("0 9 * * 1", utc(2026, 8, 3, 9, 0, 0)));
    }

    #[test]
    fn invalid_expressions_never_match() {
        let at = utc(2026, 8, 2, 9, 0, 0);
        assert!(!cron_matches("", at));
        assert!(!cron_matches("0 9 * *", at)); // four fields
        assert!(!cron_matches("0 9 * * * *", at)); // six fields
        assert!(!cron_matches("61 * * * *", at)); // out of range
        assert!(!cron_matches("0 25 * * *", at));
        assert!(!cron_matches("x * * * *", at));
        assert!(!cron_matches("*/0 * * * *", at));
        assert!(!cron_matches("9-3 * * * *", at)); // inverted range
    }

    mod scheduler {
        use super::*;
        use crate::store::fs::FsStore;

        fn test_scheduler() -> (tempfile::TempDir, ReminderScheduler) {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(FsStore::open(dir.path(), 5).unwrap());
            (dir, ReminderScheduler::new(store))
        }

        fn cron_request(id: &str, expression: &str) -> ScheduleRequest {
            ScheduleRequest {
                id: Some(id.to_string()),
                kind: ReminderKind::Cron,
                expression: expression.to_string(),
                description: "test reminder".to_string(),
                payload: None,
            }
        }

        #[tokio::test]
        async fn schedule_upserts_by_id() {
            let (_dir, scheduler) = test_scheduler();
            scheduler.schedule(cron_request("r1", "0 9 * * *")).await.unwrap();
            scheduler.schedule(cron_request("r1", "0 10 * * *")).await.unwrap();

            let all = scheduler.list().await.unwrap();
            assert_eq!(all.len(), 1);
            assert_eq!(all[0].expression, "0 10 * * *");
        }

        #[tokio::test]
        async fn schedule_generates_id_when_missing() {
            let (_dir, scheduler) = test_scheduler();
            let reminder = scheduler
                .schedule(ScheduleRequest {
                    id: None,
                    kind: ReminderKind::Once,
                    expression: "2099-01-01T00:00:00Z".to_string(),
                    description: "far future".to_string(),
                    payload: None,
                })
                .await
                .unwrap();
            assert!(!reminder.id.is_empty());
            assert!(scheduler.get(&reminder.id).await.unwrap().is_some());
        }

        #[tokio::test]
        async fn once_fires_and_is_removed() {
            let (_dir, scheduler) = test_scheduler();
            scheduler
                .schedule(ScheduleRequest {
                    id: Some("o1".into()),
                    kind: ReminderKind::Once,
                    expression: "2026-01-01T12:00:00Z".into(),
                    description: "past due".into(),
                    payload: None,
                })
                .await
                .unwrap();

            let now = utc(2026, 1, 1, 12, 30, 0);
            let fired = scheduler.check_at(now).await.unwrap();
            assert_eq!(fired.len(), 1);
            assert_eq!(fired[0].id, "o1");
            // Gone after firing
            assert!(scheduler.get("o1").await.unwrap().is_none());
            assert!(scheduler.check_at(now).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn once_in_future_does_not_fire() {
            let (_dir, scheduler) = test_scheduler();
            scheduler
                .schedule(ScheduleRequest {
                    id: Some("o2".into()),
                    kind: ReminderKind::Once,
                    expression: "2027-01-01T00:00:00Z".into(),
                    description: "future".into(),
                    payload: None,
                })
                .await
                .unwrap();

            let fired = scheduler.check_at(utc(2026, 8, 2, 9, 0, 0)).await.unwrap();
            assert!(fired.is_empty());
            assert!(scheduler.get("o2").await.unwrap().is_some());
        }

        #[tokio::test]
        async fn cron_fires_at_most_once_per_minute() {
            let (_dir, scheduler) = test_scheduler();
            scheduler.schedule(cron_request("r", "0 9 * * *")).await.unwrap();

            // 09:00:00 — fires
            let fired = scheduler.check_at(utc(2026, 8, 2, 9, 0, 0)).await.unwrap();
            assert_eq!(fired.len(), 1);
            assert_eq!(fired[0].id, "r");

            // 09:00:30 — same minute, guard holds
            let fired = scheduler.check_at(utc(2026, 8, 2, 9, 0, 30)).await.unwrap();
            assert!(fired.is_empty());

            // Next day 09:00:00 — fires again
            let fired = scheduler.check_at(utc(2026, 8, 3, 9, 0, 0)).await.unwrap();
            assert_eq!(fired.len(), 1);
        }

        #[tokio::test]
        async fn minute_guard_survives_reload() {
            let dir = tempfile::tempdir().unwrap();
            let store: Arc<dyn ObjectStore> = Arc::new(FsStore::open(dir.path(), 5).unwrap());

            let scheduler = ReminderScheduler::new(store.clone());
            scheduler.schedule(cron_request("r", "* * * * *")).await.unwrap();
            let fired = scheduler.check_at(utc(2026, 8, 2, 9, 0, 0)).await.unwrap();
            assert_eq!(fired.len(), 1);

            // A fresh scheduler over the same blob sees the persisted
            // last_fired — no double fire within the minute.
            let restarted = ReminderScheduler::new(store);
            let fired = restarted.check_at(utc(2026, 8, 2, 9, 0, 45)).await.unwrap();
            assert!(fired.is_empty());
        }

        #[tokio::test]
        async fn invalid_cron_is_retained_but_silent() {
            let (_dir, scheduler) = test_scheduler();
            scheduler.schedule(cron_request("bad", "not a cron")).await.unwrap();

            let fired = scheduler.check_at(utc(2026, 8, 2, 9, 0, 0)).await.unwrap();
            assert!(fired.is_empty());
            assert!(scheduler.get("bad").await.unwrap().is_some());
        }

        #[tokio::test]
        async fn remove_deletes_reminder() {
            let (_dir, scheduler) = test_scheduler();
            scheduler.schedule(cron_request("r", "0 9 * * *")).await.unwrap();
            assert!(scheduler.remove("r").await.unwrap());
            assert!(!scheduler.remove("r").await.unwrap());
            assert!(scheduler.list().await.unwrap().is_empty());
        }
    }
}
