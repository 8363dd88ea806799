use crate::rules::{LogicalOperator, Rule, RuleCondition};
use crate::transfer::{Schedule, ScheduleKind, Task, TaskFilter, TransferSummary};
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Rough per-file saving used in the aggregate report: the time a user
/// would have spent moving one file by hand.
const SECONDS_SAVED_PER_FILE: i64 = 6;

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create the database directory if it doesn't exist
        if !database_url.contains(":memory:") {
            let path = database_url.strip_prefix("sqlite://").unwrap_or(database_url);
            if let Some(parent) = Path::new(path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // In-memory databases exist per connection; a single connection
        // keeps every query on the same database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                destination TEXT NOT NULL,
                extension TEXT,
                rule_json TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                schedule_kind TEXT NOT NULL DEFAULT 'never',
                next_run_time INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                conditions_json TEXT NOT NULL,
                logical_op TEXT NOT NULL,
                destination TEXT NOT NULL,
                preset INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfer_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                destination TEXT NOT NULL,
                extension TEXT NOT NULL,
                file_count BIGINT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tasks_active ON tasks(active, schedule_kind);
            CREATE INDEX IF NOT EXISTS idx_stats_extension ON transfer_stats(extension);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ---- Task repository ----

    pub async fn add_task(&self, task: &Task) -> Result<()> {
        let (extension, rule_json) = filter_columns(&task.filter)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (id, source, destination, extension, rule_json,
                               active, schedule_kind, next_run_time)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&task.id)
        .bind(&task.source)
        .bind(&task.destination)
        .bind(extension)
        .bind(rule_json)
        .bind(task.active as i64)
        .bind(task.schedule.kind.as_str())
        .bind(task.schedule.next_run_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            "SELECT id, source, destination, extension, rule_json, active, schedule_kind, next_run_time
             FROM tasks WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TaskRow::into_task).transpose()
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT id, source, destination, extension, rule_json, active, schedule_kind, next_run_time
             FROM tasks ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// Tasks the scheduler polls: active, with a schedule attached.
    pub async fn list_scheduled_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT id, source, destination, extension, rule_json, active, schedule_kind, next_run_time
             FROM tasks WHERE active = 1 AND schedule_kind != 'never' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    pub async fn update_task(&self, task: &Task) -> Result<()> {
        let (extension, rule_json) = filter_columns(&task.filter)?;

        sqlx::query(
            r#"
            UPDATE tasks
            SET source = ?2, destination = ?3, extension = ?4, rule_json = ?5,
                active = ?6, schedule_kind = ?7, next_run_time = ?8,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?1
            "#,
        )
        .bind(&task.id)
        .bind(&task.source)
        .bind(&task.destination)
        .bind(extension)
        .bind(rule_json)
        .bind(task.active as i64)
        .bind(task.schedule.kind.as_str())
        .bind(task.schedule.next_run_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- Rule repository ----

    pub async fn add_rule(&self, rule: &Rule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rules (id, name, conditions_json, logical_op, destination, preset)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.name)
        .bind(serde_json::to_string(&rule.conditions)?)
        .bind(logical_op_str(rule.logical_operator))
        .bind(&rule.destination)
        .bind(rule.preset as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_rules(&self) -> Result<Vec<Rule>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            "SELECT id, name, conditions_json, logical_op, destination, preset
             FROM rules ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RuleRow::into_rule).collect()
    }

    pub async fn update_rule(&self, rule: &Rule) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE rules
            SET name = ?2, conditions_json = ?3, logical_op = ?4, destination = ?5, preset = ?6
            WHERE id = ?1
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.name)
        .bind(serde_json::to_string(&rule.conditions)?)
        .bind(logical_op_str(rule.logical_operator))
        .bind(&rule.destination)
        .bind(rule.preset as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_rule(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM rules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// One-time seeding: insert the preset rules iff the table is still
    /// empty. Returns the number of rules inserted.
    pub async fn seed_presets(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rules")
            .fetch_one(&self.pool)
            .await?;
        if count > 0 {
            return Ok(0);
        }

        let presets = crate::rules::preset_rules();
        for rule in &presets {
            self.add_rule(rule).await?;
        }
        info!("Seeded {} preset rules", presets.len());
        Ok(presets.len())
    }

    // ---- Stats sink ----

    /// Append one transfer summary. Returns the raw `sqlx::Error` so the
    /// engine can fold it into its own taxonomy.
    pub async fn record_summary(&self, summary: &TransferSummary) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO transfer_stats (source, destination, extension, file_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&summary.source)
        .bind(&summary.destination)
        .bind(&summary.extension)
        .bind(summary.file_count as i64)
        .bind(summary.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load_summaries(&self) -> Result<Vec<TransferSummary>> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            "SELECT source, destination, extension, file_count, created_at
             FROM transfer_stats ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SummaryRow::into_summary).collect())
    }

    pub async fn aggregate_report(&self) -> Result<StatsReport> {
        let total_files_moved: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(file_count), 0) FROM transfer_stats")
                .fetch_one(&self.pool)
                .await?;

        let most_used = |column: &str| {
            format!(
                "SELECT {column}, SUM(file_count) AS total FROM transfer_stats
                 WHERE file_count > 0 GROUP BY {column} ORDER BY total DESC LIMIT 1"
            )
        };

        let mut report = StatsReport {
            total_files_moved: total_files_moved as u64,
            approx_minutes_saved: (total_files_moved * SECONDS_SAVED_PER_FILE / 60) as u64,
            most_used_source: None,
            most_used_destination: None,
            most_moved_extension: None,
        };

        if let Some(row) = sqlx::query(&most_used("source"))
            .fetch_optional(&self.pool)
            .await?
        {
            report.most_used_source = Some(row.get("source"));
        }
        if let Some(row) = sqlx::query(&most_used("destination"))
            .fetch_optional(&self.pool)
            .await?
        {
            report.most_used_destination = Some(row.get("destination"));
        }
        if let Some(row) = sqlx::query(&most_used("extension"))
            .fetch_optional(&self.pool)
            .await?
        {
            report.most_moved_extension = Some(row.get("extension"));
        }

        Ok(report)
    }
}

/// Aggregate view over all recorded transfer summaries.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsReport {
    pub most_used_source: Option<String>,
    pub most_used_destination: Option<String>,
    pub most_moved_extension: Option<String>,
    pub total_files_moved: u64,
    pub approx_minutes_saved: u64,
}

fn filter_columns(filter: &TaskFilter) -> Result<(Option<String>, Option<String>)> {
    Ok(match filter {
        TaskFilter::Extension(ext) => (Some(ext.clone()), None),
        TaskFilter::Rule(rule) => (None, Some(serde_json::to_string(rule)?)),
    })
}

fn logical_op_str(op: LogicalOperator) -> &'static str {
    match op {
        LogicalOperator::And => "and",
        LogicalOperator::Or => "or",
    }
}

fn parse_logical_op(raw: &str) -> LogicalOperator {
    match raw {
        "and" => LogicalOperator::And,
        _ => LogicalOperator::Or,
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: String,
    source: String,
    destination: String,
    extension: Option<String>,
    rule_json: Option<String>,
    active: i64,
    schedule_kind: String,
    next_run_time: Option<i64>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        let filter = match self.rule_json {
            Some(json) => TaskFilter::Rule(serde_json::from_str(&json)?),
            None => TaskFilter::Extension(self.extension.unwrap_or_default()),
        };
        Ok(Task {
            id: self.id,
            source: self.source,
            destination: self.destination,
            filter,
            active: self.active != 0,
            schedule: Schedule {
                kind: ScheduleKind::parse(&self.schedule_kind),
                next_run_time: self.next_run_time,
            },
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RuleRow {
    id: String,
    name: String,
    conditions_json: String,
    logical_op: String,
    destination: String,
    preset: i64,
}

impl RuleRow {
    fn into_rule(self) -> Result<Rule> {
        let conditions: Vec<RuleCondition> = serde_json::from_str(&self.conditions_json)?;
        Ok(Rule {
            id: self.id,
            name: self.name,
            conditions,
            logical_operator: parse_logical_op(&self.logical_op),
            destination: self.destination,
            preset: self.preset != 0,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    source: String,
    destination: String,
    extension: String,
    file_count: i64,
    created_at: i64,
}

impl SummaryRow {
    fn into_summary(self) -> TransferSummary {
        TransferSummary {
            source: self.source,
            destination: self.destination,
            extension: self.extension,
            file_count: self.file_count as u64,
            timestamp: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ConditionOperator, ConditionType};

    async fn storage() -> Storage {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        storage.run_migrations().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn task_crud_round_trips() {
        let storage = storage().await;
        let mut task = Task::new("/inbox", "/music", TaskFilter::Extension("mp3".to_string()));
        task.schedule = Schedule {
            kind: ScheduleKind::Daily,
            next_run_time: Some(1_700_000_000_000),
        };

        storage.add_task(&task).await.unwrap();

        let loaded = storage.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.source, "/inbox");
        assert!(matches!(loaded.filter, TaskFilter::Extension(ref e) if e == "mp3"));
        assert_eq!(loaded.schedule.kind, ScheduleKind::Daily);
        assert_eq!(loaded.schedule.next_run_time, Some(1_700_000_000_000));

        let mut updated = loaded;
        updated.active = false;
        storage.update_task(&updated).await.unwrap();
        assert!(!storage.get_task(&task.id).await.unwrap().unwrap().active);

        storage.delete_task(&task.id).await.unwrap();
        assert!(storage.get_task(&task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rule_filter_round_trips_through_json() {
        let storage = storage().await;
        let rule = Rule::new(
            "docs",
            vec![RuleCondition {
                condition_type: ConditionType::FileType,
                value: "pdf".to_string(),
                operator: ConditionOperator::Equals,
            }],
            LogicalOperator::Or,
            "/Documents",
        );
        let task = Task::new("/inbox", "/Documents", TaskFilter::Rule(rule));
        storage.add_task(&task).await.unwrap();

        let loaded = storage.get_task(&task.id).await.unwrap().unwrap();
        match loaded.filter {
            TaskFilter::Rule(rule) => {
                assert_eq!(rule.name, "docs");
                assert_eq!(rule.conditions.len(), 1);
                assert_eq!(rule.logical_operator, LogicalOperator::Or);
            }
            other => panic!("expected rule filter, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scheduled_listing_skips_inactive_and_unscheduled() {
        let storage = storage().await;

        let mut scheduled = Task::new("/a", "/b", TaskFilter::Extension("mp3".to_string()));
        scheduled.schedule = Schedule {
            kind: ScheduleKind::Once,
            next_run_time: Some(1),
        };
        storage.add_task(&scheduled).await.unwrap();

        let unscheduled = Task::new("/c", "/d", TaskFilter::Extension("jpg".to_string()));
        storage.add_task(&unscheduled).await.unwrap();

        let mut inactive = Task::new("/e", "/f", TaskFilter::Extension("png".to_string()));
        inactive.active = false;
        inactive.schedule = Schedule {
            kind: ScheduleKind::Daily,
            next_run_time: Some(1),
        };
        storage.add_task(&inactive).await.unwrap();

        let listed = storage.list_scheduled_tasks().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, scheduled.id);
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let storage = storage().await;
        assert_eq!(storage.seed_presets().await.unwrap(), 4);
        assert_eq!(storage.seed_presets().await.unwrap(), 0);

        let rules = storage.list_rules().await.unwrap();
        assert_eq!(rules.len(), 4);
        assert!(rules.iter().all(|r| r.preset));
    }

    #[tokio::test]
    async fn aggregate_report_picks_the_heaviest_buckets() {
        let storage = storage().await;

        for (source, dest, ext, count) in [
            ("/downloads", "/music", "mp3", 8),
            ("/downloads", "/pictures", "jpg", 2),
            ("/desktop", "/music", "mp3", 3),
        ] {
            storage
                .record_summary(&TransferSummary {
                    source: source.to_string(),
                    destination: dest.to_string(),
                    extension: ext.to_string(),
                    file_count: count,
                    timestamp: 1_700_000_000,
                })
                .await
                .unwrap();
        }

        let report = storage.aggregate_report().await.unwrap();
        assert_eq!(report.total_files_moved, 13);
        assert_eq!(report.most_used_source.as_deref(), Some("/downloads"));
        assert_eq!(report.most_used_destination.as_deref(), Some("/music"));
        assert_eq!(report.most_moved_extension.as_deref(), Some("mp3"));
        assert_eq!(report.approx_minutes_saved, 13 * 6 / 60);
    }

    #[tokio::test]
    async fn summaries_are_append_only_and_ordered() {
        let storage = storage().await;
        for count in [0, 5] {
            storage
                .record_summary(&TransferSummary {
                    source: "/s".to_string(),
                    destination: "/d".to_string(),
                    extension: "mp3".to_string(),
                    file_count: count,
                    timestamp: 1_700_000_000,
                })
                .await
                .unwrap();
        }

        let summaries = storage.load_summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].file_count, 0);
        assert_eq!(summaries[1].file_count, 5);
    }
}
