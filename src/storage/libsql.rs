//! LibSQL storage backend
//!
//! Persists food events, patterns, insights, the risk cache, profiles,
//! subscription counters and lesson completions in a single libSQL
//! database. Schema changes live in `migrations/libsql` and are tracked in
//! `_migrations_applied`.

use crate::error::{PipelineError, Result};
use crate::services::lessons::{LessonCompletion, LessonProgress};
use crate::services::subscriptions::SubscriptionService;
use crate::storage::{EventStore, StorageBackend};
use crate::types::{
    EventId, FoodEvent, Insight, InsightId, Pattern, PatternId, RiskScore, UserId, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use libsql::{params, Builder, Connection, Database};
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, info};

const MIGRATIONS: &[(&str, &str)] = &[(
    "001_initial_schema.sql",
    include_str!("../../migrations/libsql/001_initial_schema.sql"),
)];

const PATTERN_COLUMNS: &str = "id, user_id, kind, description, confidence, trigger_json, \
     evidence_json, source_json, preliminary, active, deactivation, discovered_at";

const INSIGHT_COLUMNS: &str = "id, user_id, pattern_id, title, body, action, kind, seen, \
     locked, rotation_day, text_source, created_at";

const RISK_COLUMNS: &str = "user_id, risk_date, level, score, contributing_json, time_window, \
     recommendation, computed_at";

/// Parse SQL file into individual statements, handling multi-line constructs like triggers
fn parse_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;

    for line in sql.lines() {
        let trimmed = line.trim();

        if current.is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) {
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        let upper = trimmed.to_uppercase();
        if upper.starts_with("BEGIN") || upper.contains(" BEGIN") {
            depth += 1;
        }
        if upper.starts_with("END") {
            depth = depth.saturating_sub(1);
        }

        if trimmed.ends_with(';') && depth == 0 {
            statements.push(std::mem::take(&mut current));
        }
    }

    if !current.trim().is_empty() {
        statements.push(current);
    }

    statements
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PipelineError::Database(format!("Invalid timestamp '{}': {}", raw, e)))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| PipelineError::Database(format!("Invalid date '{}': {}", raw, e)))
}

fn parse_column<T>(raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|e: T::Err| PipelineError::Database(e.to_string()))
}

fn row_to_event(row: &libsql::Row) -> Result<FoodEvent> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let mood: Option<String> = row.get(4)?;
    let context: Option<String> = row.get(5)?;
    let occurred_at: String = row.get(6)?;

    Ok(FoodEvent {
        id: EventId::from_string(&id)?,
        user_id: UserId::from_string(&user_id)?,
        raw_text: row.get(2)?,
        calories: row.get::<i64>(3)?.max(0) as u32,
        mood: mood.as_deref().map(parse_column).transpose()?,
        context: context.as_deref().map(parse_column).transpose()?,
        timestamp: parse_ts(&occurred_at)?,
        day_of_week: row.get::<i64>(7)? as u8,
        hour: row.get::<i64>(8)? as u8,
    })
}

fn row_to_pattern(row: &libsql::Row) -> Result<Pattern> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let trigger_json: String = row.get(5)?;
    let evidence_json: String = row.get(6)?;
    let source_json: String = row.get(7)?;
    let deactivation: Option<String> = row.get(10)?;
    let discovered_at: String = row.get(11)?;

    Ok(Pattern {
        id: PatternId::from_string(&id)?,
        user_id: UserId::from_string(&user_id)?,
        kind: parse_column(&kind)?,
        description: row.get(3)?,
        confidence: row.get(4)?,
        trigger: serde_json::from_str(&trigger_json)?,
        evidence: serde_json::from_str(&evidence_json)?,
        source: serde_json::from_str(&source_json)?,
        preliminary: row.get::<i64>(8)? != 0,
        active: row.get::<i64>(9)? != 0,
        deactivation: deactivation.as_deref().map(parse_column).transpose()?,
        discovered_at: parse_ts(&discovered_at)?,
    })
}

fn row_to_insight(row: &libsql::Row) -> Result<Insight> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let pattern_id: Option<String> = row.get(2)?;
    let kind: String = row.get(6)?;
    let text_source: String = row.get(10)?;
    let created_at: String = row.get(11)?;

    Ok(Insight {
        id: InsightId::from_string(&id)?,
        user_id: UserId::from_string(&user_id)?,
        pattern_id: pattern_id
            .as_deref()
            .map(PatternId::from_string)
            .transpose()?,
        title: row.get(3)?,
        body: row.get(4)?,
        action: row.get(5)?,
        kind: parse_column(&kind)?,
        seen: row.get::<i64>(7)? != 0,
        locked: row.get::<i64>(8)? != 0,
        rotation_day: row.get::<i64>(9)? as u8,
        text_source: serde_json::from_value(serde_json::Value::String(text_source))?,
        created_at: parse_ts(&created_at)?,
    })
}

fn row_to_risk(row: &libsql::Row) -> Result<RiskScore> {
    let user_id: String = row.get(0)?;
    let date: String = row.get(1)?;
    let level: String = row.get(2)?;
    let contributing_json: String = row.get(4)?;
    let computed_at: String = row.get(7)?;

    Ok(RiskScore {
        user_id: UserId::from_string(&user_id)?,
        date: parse_date(&date)?,
        level: parse_column(&level)?,
        score: row.get(3)?,
        contributing_patterns: serde_json::from_str(&contributing_json)?,
        time_window: row.get(5)?,
        recommendation: row.get(6)?,
        computed_at: parse_ts(&computed_at)?,
    })
}

fn text_source_str(insight: &Insight) -> Result<String> {
    match serde_json::to_value(insight.text_source)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(PipelineError::Other(format!(
            "unexpected text source encoding: {}",
            other
        ))),
    }
}

/// LibSQL storage backend
pub struct LibsqlStorage {
    db: Database,
    /// In-memory databases live only as long as a connection, so that mode
    /// keeps one open and hands out clones of it
    shared: Option<Connection>,
}

/// Database connection mode
#[derive(Debug, Clone)]
pub enum ConnectionMode {
    /// Local file-based database
    Local(String),
    /// In-memory database (for testing)
    InMemory,
}

impl LibsqlStorage {
    /// Open the database, creating it (and its parent directory) when
    /// `create_if_missing` is set, then apply pending migrations.
    pub async fn new_with_validation(mode: ConnectionMode, create_if_missing: bool) -> Result<Self> {
        info!(
            "Connecting to LibSQL database: {:?} (create_if_missing: {})",
            mode, create_if_missing
        );

        let (db, shared) = match mode {
            ConnectionMode::Local(ref path) => {
                let file = std::path::Path::new(path);
                if !file.exists() && !create_if_missing {
                    return Err(PipelineError::Database(format!(
                        "Database file not found at '{}'. Run 'nutrimind serve' or pass --db-path to create one.",
                        path
                    )));
                }
                if create_if_missing {
                    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            PipelineError::Database(format!(
                                "Failed to create database directory {}: {}",
                                parent.display(),
                                e
                            ))
                        })?;
                    }
                }

                let db = Builder::new_local(path).build().await.map_err(|e| {
                    PipelineError::Database(format!("Failed to create local database: {}", e))
                })?;
                (db, None)
            }
            ConnectionMode::InMemory => {
                let db = Builder::new_local(":memory:").build().await.map_err(|e| {
                    PipelineError::Database(format!("Failed to create in-memory database: {}", e))
                })?;
                let conn = db.connect()?;
                (db, Some(conn))
            }
        };

        let storage = Self { db, shared };
        storage.run_migrations().await?;

        info!("LibSQL database connection established");
        Ok(storage)
    }

    /// Open or create a local database file
    pub async fn new_local(path: &str) -> Result<Self> {
        Self::new_with_validation(ConnectionMode::Local(path.to_string()), true).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new_with_validation(ConnectionMode::InMemory, true).await
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations_applied (
                migration_name TEXT PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
            params![],
        )
        .await
        .map_err(|e| PipelineError::Migration(format!("Failed to create migrations table: {}", e)))?;

        for (name, sql) in MIGRATIONS {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM _migrations_applied WHERE migration_name = ?",
                    params![*name],
                )
                .await?;

            let already_applied = match rows.next().await? {
                Some(row) => row.get::<i64>(0)?,
                None => 0,
            };
            if already_applied > 0 {
                debug!("Skipping already applied migration: {}", name);
                continue;
            }

            let statements = parse_sql_statements(sql);
            debug!("Parsed {} statements from {}", statements.len(), name);
            for (i, statement) in statements.iter().enumerate() {
                let statement = statement.trim();
                if statement.is_empty() {
                    continue;
                }
                conn.execute(statement, params![]).await.map_err(|e| {
                    PipelineError::Migration(format!(
                        "Failed to execute statement #{} in {}: {}\nStatement: {}",
                        i + 1,
                        name,
                        e,
                        &statement[..statement.len().min(300)]
                    ))
                })?;
            }

            conn.execute(
                "INSERT INTO _migrations_applied (migration_name, applied_at) VALUES (?, ?)",
                params![*name, Utc::now().timestamp()],
            )
            .await
            .map_err(|e| PipelineError::Migration(format!("Failed to record migration: {}", e)))?;

            info!("Executed migration: {}", name);
        }

        info!("Database migrations completed");
        Ok(())
    }

    /// Get a connection from the database
    fn get_conn(&self) -> Result<Connection> {
        if let Some(conn) = &self.shared {
            return Ok(conn.clone());
        }
        self.db
            .connect()
            .map_err(|e| PipelineError::Database(format!("Failed to get connection: {}", e)))
    }

    async fn query_patterns(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<Pattern>> {
        let conn = self.get_conn()?;
        let mut rows = conn.query(sql, params).await?;
        let mut patterns = Vec::new();
        while let Some(row) = rows.next().await? {
            patterns.push(row_to_pattern(&row)?);
        }
        Ok(patterns)
    }

    async fn query_insight(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Option<Insight>> {
        let conn = self.get_conn()?;
        let mut rows = conn.query(sql, params).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_insight(&row)?)),
            None => Ok(None),
        }
    }

    async fn query_risk(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<RiskScore>> {
        let conn = self.get_conn()?;
        let mut rows = conn.query(sql, params).await?;
        let mut scores = Vec::new();
        while let Some(row) = rows.next().await? {
            scores.push(row_to_risk(&row)?);
        }
        Ok(scores)
    }
}

#[async_trait]
impl EventStore for LibsqlStorage {
    async fn append_event(&self, event: &FoodEvent) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO food_events (id, user_id, raw_text, calories, mood, context, occurred_at, day_of_week, hour)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                event.id.to_string(),
                event.user_id.to_string(),
                event.raw_text.clone(),
                i64::from(event.calories),
                event.mood.map(|m| m.as_str().to_string()),
                event.context.map(|c| c.as_str().to_string()),
                ts(event.timestamp),
                i64::from(event.day_of_week),
                i64::from(event.hour)
            ],
        )
        .await?;
        debug!("Stored food event {} for {}", event.id, event.user_id);
        Ok(())
    }

    async fn list_events(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<FoodEvent>> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT id, user_id, raw_text, calories, mood, context, occurred_at, day_of_week, hour
                 FROM food_events
                 WHERE user_id = ? AND occurred_at >= ? AND occurred_at < ?
                 ORDER BY occurred_at, id",
                params![user_id.to_string(), ts(since), ts(until)],
            )
            .await?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }

    async fn count_events(&self, user_id: UserId) -> Result<u64> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM food_events WHERE user_id = ?",
                params![user_id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0) as u64),
            None => Ok(0),
        }
    }

    async fn list_users(&self) -> Result<Vec<UserId>> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT DISTINCT user_id FROM food_events ORDER BY user_id",
                params![],
            )
            .await?;

        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            users.push(UserId::from_string(&id)?);
        }
        Ok(users)
    }
}

#[async_trait]
impl StorageBackend for LibsqlStorage {
    async fn replace_active_patterns(&self, user_id: UserId, patterns: &[Pattern]) -> Result<usize> {
        let conn = self.get_conn()?;
        let tx = conn.transaction().await?;

        let superseded = tx
            .execute(
                "UPDATE patterns SET active = 0, deactivation = 'superseded'
                 WHERE user_id = ? AND active = 1",
                params![user_id.to_string()],
            )
            .await?;

        for pattern in patterns {
            tx.execute(
                &format!(
                    "INSERT INTO patterns ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    PATTERN_COLUMNS
                ),
                params![
                    pattern.id.to_string(),
                    pattern.user_id.to_string(),
                    pattern.kind.as_str(),
                    pattern.description.clone(),
                    pattern.confidence,
                    serde_json::to_string(&pattern.trigger)?,
                    serde_json::to_string(&pattern.evidence)?,
                    serde_json::to_string(&pattern.source)?,
                    i64::from(pattern.preliminary),
                    i64::from(pattern.active),
                    pattern.deactivation.map(|d| d.as_str().to_string()),
                    ts(pattern.discovered_at)
                ],
            )
            .await?;
        }

        tx.commit().await.map_err(|e| {
            PipelineError::Database(format!("Pattern replace commit failed: {}", e))
        })?;

        debug!(
            "Replaced active patterns for {}: {} superseded, {} inserted",
            user_id,
            superseded,
            patterns.len()
        );
        Ok(superseded as usize)
    }

    async fn get_pattern(&self, id: PatternId) -> Result<Pattern> {
        self.query_patterns(
            &format!("SELECT {} FROM patterns WHERE id = ?", PATTERN_COLUMNS),
            params![id.to_string()],
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::NotFound(format!("pattern {}", id)))
    }

    async fn update_pattern(&self, pattern: &Pattern) -> Result<()> {
        let conn = self.get_conn()?;
        let changed = conn
            .execute(
                "UPDATE patterns SET confidence = ?, active = ?, deactivation = ?, description = ?
                 WHERE id = ?",
                params![
                    pattern.confidence,
                    i64::from(pattern.active),
                    pattern.deactivation.map(|d| d.as_str().to_string()),
                    pattern.description.clone(),
                    pattern.id.to_string()
                ],
            )
            .await?;
        if changed == 0 {
            return Err(PipelineError::NotFound(format!("pattern {}", pattern.id)));
        }
        Ok(())
    }

    async fn list_patterns(&self, user_id: UserId, include_inactive: bool) -> Result<Vec<Pattern>> {
        let filter = if include_inactive { "" } else { " AND active = 1" };
        self.query_patterns(
            &format!(
                "SELECT {} FROM patterns WHERE user_id = ?{}
                 ORDER BY confidence DESC, discovered_at ASC, id ASC",
                PATTERN_COLUMNS, filter
            ),
            params![user_id.to_string()],
        )
        .await
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT user_id, cluster_id, rotation_day, rotation_date, created_at
                 FROM user_profiles WHERE user_id = ?",
                params![user_id.to_string()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let rotation_date: Option<String> = row.get(3)?;
        let created_at: String = row.get(4)?;

        Ok(Some(UserProfile {
            user_id,
            cluster_id: row.get(1)?,
            rotation_day: row.get::<i64>(2)? as u8,
            rotation_date: rotation_date.as_deref().map(parse_date).transpose()?,
            created_at: parse_ts(&created_at)?,
        }))
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO user_profiles (user_id, cluster_id, rotation_day, rotation_date, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                cluster_id = excluded.cluster_id,
                rotation_day = excluded.rotation_day,
                rotation_date = excluded.rotation_date",
            params![
                profile.user_id.to_string(),
                profile.cluster_id.clone(),
                i64::from(profile.rotation_day),
                profile.rotation_date.map(|d| d.to_string()),
                ts(profile.created_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn insert_insight(&self, insight: &Insight) -> Result<bool> {
        let conn = self.get_conn()?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO insights ({}, insight_date) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(user_id, insight_date) DO NOTHING",
                INSIGHT_COLUMNS
            ),
            params![
                insight.id.to_string(),
                insight.user_id.to_string(),
                insight.pattern_id.map(|p| p.to_string()),
                insight.title.clone(),
                insight.body.clone(),
                insight.action.clone(),
                insight.kind.as_str(),
                i64::from(insight.seen),
                i64::from(insight.locked),
                i64::from(insight.rotation_day),
                text_source_str(insight)?,
                ts(insight.created_at),
                insight.date().to_string()
            ],
        )
        .await?;
        if inserted == 0 {
            debug!("Insight for {} on {} already stored", insight.user_id, insight.date());
        }
        Ok(inserted > 0)
    }

    async fn get_insight(&self, id: InsightId) -> Result<Insight> {
        self.query_insight(
            &format!("SELECT {} FROM insights WHERE id = ?", INSIGHT_COLUMNS),
            params![id.to_string()],
        )
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("insight {}", id)))
    }

    async fn insight_for_day(&self, user_id: UserId, date: NaiveDate) -> Result<Option<Insight>> {
        self.query_insight(
            &format!(
                "SELECT {} FROM insights WHERE user_id = ? AND insight_date = ?
                 ORDER BY created_at ASC LIMIT 1",
                INSIGHT_COLUMNS
            ),
            params![user_id.to_string(), date.to_string()],
        )
        .await
    }

    async fn latest_insight(&self, user_id: UserId) -> Result<Option<Insight>> {
        self.query_insight(
            &format!(
                "SELECT {} FROM insights WHERE user_id = ? ORDER BY created_at DESC LIMIT 1",
                INSIGHT_COLUMNS
            ),
            params![user_id.to_string()],
        )
        .await
    }

    async fn mark_insight_seen(&self, id: InsightId) -> Result<Insight> {
        let conn = self.get_conn()?;
        let changed = conn
            .execute(
                "UPDATE insights SET seen = 1 WHERE id = ?",
                params![id.to_string()],
            )
            .await?;
        if changed == 0 {
            return Err(PipelineError::NotFound(format!("insight {}", id)));
        }
        self.get_insight(id).await
    }

    async fn put_risk(&self, score: &RiskScore) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO risk_cache ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                RISK_COLUMNS
            ),
            params![
                score.user_id.to_string(),
                score.date.to_string(),
                score.level.as_str(),
                score.score,
                serde_json::to_string(&score.contributing_patterns)?,
                score.time_window.clone(),
                score.recommendation.clone(),
                ts(score.computed_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_risk(&self, user_id: UserId, date: NaiveDate) -> Result<Option<RiskScore>> {
        Ok(self
            .query_risk(
                &format!(
                    "SELECT {} FROM risk_cache WHERE user_id = ? AND risk_date = ?",
                    RISK_COLUMNS
                ),
                params![user_id.to_string(), date.to_string()],
            )
            .await?
            .into_iter()
            .next())
    }

    async fn latest_risk(&self, user_id: UserId) -> Result<Option<RiskScore>> {
        Ok(self
            .query_risk(
                &format!(
                    "SELECT {} FROM risk_cache WHERE user_id = ? ORDER BY risk_date DESC LIMIT 1",
                    RISK_COLUMNS
                ),
                params![user_id.to_string()],
            )
            .await?
            .into_iter()
            .next())
    }

    async fn clear_risk(&self, user_id: UserId, date: NaiveDate) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "DELETE FROM risk_cache WHERE user_id = ? AND risk_date = ?",
            params![user_id.to_string(), date.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn risk_history(
        &self,
        user_id: UserId,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<RiskScore>> {
        self.query_risk(
            &format!(
                "SELECT {} FROM risk_cache WHERE user_id = ? AND risk_date >= ? AND risk_date <= ?
                 ORDER BY risk_date ASC",
                RISK_COLUMNS
            ),
            params![user_id.to_string(), since.to_string(), until.to_string()],
        )
        .await
    }
}

#[async_trait]
impl SubscriptionService for LibsqlStorage {
    async fn insights_received_count(&self, user_id: UserId) -> Result<u64> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT insights_received FROM subscriptions WHERE user_id = ?",
                params![user_id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0) as u64),
            None => Ok(0),
        }
    }

    async fn is_premium(&self, user_id: UserId) -> Result<bool> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT premium FROM subscriptions WHERE user_id = ?",
                params![user_id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? != 0),
            None => Ok(false),
        }
    }

    async fn record_insight_delivered(&self, user_id: UserId, insight_id: InsightId) -> Result<u64> {
        let conn = self.get_conn()?;
        let tx = conn.transaction().await?;

        let first_delivery = tx
            .execute(
                "INSERT INTO insight_deliveries (insight_id, user_id, delivered_at) VALUES (?, ?, ?)
                 ON CONFLICT(insight_id) DO NOTHING",
                params![insight_id.to_string(), user_id.to_string(), ts(Utc::now())],
            )
            .await?;
        if first_delivery > 0 {
            tx.execute(
                "INSERT INTO subscriptions (user_id, premium, insights_received) VALUES (?, 0, 1)
                 ON CONFLICT(user_id) DO UPDATE SET insights_received = insights_received + 1",
                params![user_id.to_string()],
            )
            .await?;
        }

        tx.commit().await.map_err(|e| {
            PipelineError::Database(format!("Insight delivery commit failed: {}", e))
        })?;
        self.insights_received_count(user_id).await
    }

    async fn set_premium(&self, user_id: UserId, premium: bool) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO subscriptions (user_id, premium, insights_received) VALUES (?, ?, 0)
             ON CONFLICT(user_id) DO UPDATE SET premium = excluded.premium",
            params![user_id.to_string(), i64::from(premium)],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LessonProgress for LibsqlStorage {
    async fn completed_lessons(&self, user_id: UserId) -> Result<Vec<LessonCompletion>> {
        let conn = self.get_conn()?;
        let mut rows = conn
            .query(
                "SELECT lesson_id, completed_at FROM lesson_completions
                 WHERE user_id = ? ORDER BY completed_at",
                params![user_id.to_string()],
            )
            .await?;

        let mut done = Vec::new();
        while let Some(row) = rows.next().await? {
            let completed_at: String = row.get(1)?;
            done.push(LessonCompletion {
                lesson_id: row.get(0)?,
                completed_at: parse_ts(&completed_at)?,
            });
        }
        Ok(done)
    }

    async fn complete_lesson(
        &self,
        user_id: UserId,
        lesson_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO lesson_completions (user_id, lesson_id, completed_at)
             VALUES (?, ?, ?)",
            params![user_id.to_string(), lesson_id.to_string(), ts(at)],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sql_statements_skips_comments() {
        let sql = "-- header\n\nCREATE TABLE a (id TEXT);\n\nCREATE INDEX i ON a(id);\n";
        let statements = parse_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE"));
    }

    #[test]
    fn test_parse_sql_statements_keeps_trigger_body() {
        let sql = "CREATE TRIGGER t AFTER INSERT ON a\nBEGIN\n  UPDATE b SET n = n + 1;\nEND;\nSELECT 1;";
        let statements = parse_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("UPDATE b"));
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let early = "2024-05-06T09:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let late = "2024-05-06T10:30:00.250Z".parse::<DateTime<Utc>>().unwrap();
        assert!(ts(early) < ts(late));
        assert_eq!(parse_ts(&ts(late)).unwrap(), late);
    }

    #[tokio::test]
    async fn test_in_memory_mode_keeps_schema() {
        let storage = LibsqlStorage::in_memory().await.unwrap();
        let user = UserId::new();
        assert_eq!(storage.count_events(user).await.unwrap(), 0);
        assert!(storage.get_profile(user).await.unwrap().is_none());

        // Second run is a no-op
        storage.run_migrations().await.unwrap();
    }
}
