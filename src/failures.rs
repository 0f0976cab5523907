//! Durable failure recording and the analytics queries over it.
//!
//! The request path never waits on the database: terminal failures are
//! pushed onto a bounded in-memory queue and a background writer drains
//! it into SQLite. Under sustained overload the queue drops its oldest
//! entry (and logs the drop) rather than applying back-pressure. Writes
//! are deliberately not cancelled by request completion.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::models::FailureRecord;

/// What the orchestrator knows about a failed search.
#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub original_query: String,
    pub normalized_query: String,
    pub candidates: Vec<String>,
    pub attempted_count: i64,
    pub error_message: String,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
}

// ============ Bounded queue ============

struct FailureQueue {
    entries: Mutex<VecDeque<FailureEvent>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl FailureQueue {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, event: FailureEvent) {
        {
            let mut entries = self.entries.lock().expect("failure queue poisoned");
            if entries.len() >= self.capacity {
                entries.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped_total = dropped, "failure queue full; oldest entry dropped");
            }
            entries.push_back(event);
        }
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<FailureEvent> {
        self.entries.lock().expect("failure queue poisoned").pop_front()
    }

    async fn pop_wait(&self) -> FailureEvent {
        loop {
            if let Some(event) = self.try_pop() {
                return event;
            }
            self.notify.notified().await;
        }
    }
}

/// Cheap handle for the request path. Recording never blocks and never
/// fails the caller.
#[derive(Clone)]
pub struct FailureSink {
    queue: Arc<FailureQueue>,
}

impl FailureSink {
    pub fn record(&self, event: FailureEvent) {
        self.queue.push(event);
    }

    /// Drain without a database. Used by tests and the CLI dry path.
    #[cfg(test)]
    pub fn drain(&self) -> Vec<FailureEvent> {
        let mut out = Vec::new();
        while let Some(e) = self.queue.try_pop() {
            out.push(e);
        }
        out
    }
}

/// Build the sink and spawn the background writer.
///
/// The writer task is owned by the runtime, not by any request, so
/// in-flight writes survive request completion and cancellation.
pub fn spawn_recorder(pool: SqlitePool, queue_capacity: usize) -> FailureSink {
    let queue = Arc::new(FailureQueue::new(queue_capacity));
    let sink = FailureSink {
        queue: queue.clone(),
    };

    tokio::spawn(async move {
        loop {
            let event = queue.pop_wait().await;
            if let Err(e) = insert_failure(&pool, &event).await {
                tracing::warn!(error = %e, "failure record write failed; entry lost");
            }
        }
    });

    sink
}

/// Sink with no writer attached; events queue up and age out. Used when
/// the engine runs without a database (one-shot CLI searches).
pub fn detached_sink(queue_capacity: usize) -> FailureSink {
    FailureSink {
        queue: Arc::new(FailureQueue::new(queue_capacity)),
    }
}

// ============ Store ============

pub async fn insert_failure(pool: &SqlitePool, event: &FailureEvent) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    let candidates = serde_json::to_string(&event.candidates)?;

    let result = sqlx::query(
        r#"
        INSERT INTO search_failures
            (original_query, normalized_query, candidates, attempted_count,
             error_message, category, brand, model, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(&event.original_query)
    .bind(&event.normalized_query)
    .bind(&candidates)
    .bind(event.attempted_count)
    .bind(&event.error_message)
    .bind(&event.category)
    .bind(&event.brand)
    .bind(&event.model)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Aggregate failure counts for the dashboard.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FailureStats {
    pub total: i64,
    pub pending: i64,
    pub resolved: i64,
    pub by_category: Vec<CategoryCount>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

pub async fn stats(pool: &SqlitePool, window_days: i64) -> Result<FailureStats> {
    let since = chrono::Utc::now().timestamp() - window_days * 86_400;

    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM search_failures WHERE created_at >= ?")
            .bind(since)
            .fetch_one(pool)
            .await?;
    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM search_failures WHERE created_at >= ? AND status = 'pending'",
    )
    .bind(since)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query(
        r#"
        SELECT COALESCE(category, 'unknown') AS category, COUNT(*) AS count
        FROM search_failures
        WHERE created_at >= ? AND status = 'pending'
        GROUP BY COALESCE(category, 'unknown')
        ORDER BY count DESC
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    let by_category = rows
        .iter()
        .map(|r| CategoryCount {
            category: r.get("category"),
            count: r.get("count"),
        })
        .collect();

    Ok(FailureStats {
        total,
        pending,
        resolved: total - pending,
        by_category,
    })
}

/// A repeated failing query pattern.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CommonFailure {
    pub original_query: String,
    pub normalized_query: String,
    pub category: Option<String>,
    pub failure_count: i64,
}

pub async fn common_failures(pool: &SqlitePool, limit: i64) -> Result<Vec<CommonFailure>> {
    let rows = sqlx::query(
        r#"
        SELECT original_query, normalized_query, category, COUNT(*) AS failure_count
        FROM search_failures
        WHERE status = 'pending'
        GROUP BY original_query, normalized_query, category
        ORDER BY failure_count DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| CommonFailure {
            original_query: r.get("original_query"),
            normalized_query: r.get("normalized_query"),
            category: r.get("category"),
            failure_count: r.get("failure_count"),
        })
        .collect())
}

/// Rule-improvement suggestion derived from repeated failures.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Suggestion {
    pub pattern: String,
    pub normalized: String,
    pub category: Option<String>,
    pub occurrences: i64,
    pub priority: String,
    pub suggestion: String,
}

/// Patterns failing at least three times, ranked by frequency.
/// Priority: ≥5 HIGH, 4 MEDIUM, 3 LOW.
pub async fn suggestions(pool: &SqlitePool) -> Result<Vec<Suggestion>> {
    let common = common_failures(pool, 50).await?;

    Ok(common
        .into_iter()
        .filter(|c| c.failure_count >= 3)
        .map(|c| {
            let priority = if c.failure_count >= 5 {
                "HIGH"
            } else if c.failure_count >= 4 {
                "MEDIUM"
            } else {
                "LOW"
            };
            Suggestion {
                suggestion: format!(
                    "Consider a hard-mapping or synonym rule for: {}",
                    c.original_query
                ),
                pattern: c.original_query,
                normalized: c.normalized_query,
                category: c.category,
                occurrences: c.failure_count,
                priority: priority.to_string(),
            }
        })
        .collect())
}

pub async fn recent_failures(
    pool: &SqlitePool,
    days: i64,
    limit: i64,
) -> Result<Vec<FailureRecord>> {
    let since = chrono::Utc::now().timestamp() - days * 86_400;
    let rows = sqlx::query(
        r#"
        SELECT id, original_query, normalized_query, candidates, attempted_count,
               error_message, category, brand, model, status,
               correct_name, correct_product_id, created_at, updated_at
        FROM search_failures
        WHERE created_at >= ?
        ORDER BY created_at DESC
        LIMIT ?
        "#,
    )
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_record).collect())
}

/// Resolve a failure row from the curation UI. Returns the updated row,
/// or `None` for an unknown id.
pub async fn mark_resolved(
    pool: &SqlitePool,
    id: i64,
    status: &str,
    correct_name: Option<&str>,
    correct_product_id: Option<&str>,
) -> Result<Option<FailureRecord>> {
    let now = chrono::Utc::now().timestamp();
    let updated = sqlx::query(
        r#"
        UPDATE search_failures
        SET status = ?,
            correct_name = COALESCE(?, correct_name),
            correct_product_id = COALESCE(?, correct_product_id),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status)
    .bind(correct_name)
    .bind(correct_product_id)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Ok(None);
    }

    let row = sqlx::query(
        r#"
        SELECT id, original_query, normalized_query, candidates, attempted_count,
               error_message, category, brand, model, status,
               correct_name, correct_product_id, created_at, updated_at
        FROM search_failures WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    Ok(Some(row_to_record(&row)))
}

/// Export recent failures as JSON or CSV for offline rule curation.
pub async fn export(pool: &SqlitePool, format: &str, days: i64, limit: i64) -> Result<String> {
    let records = recent_failures(pool, days, limit).await?;

    match format {
        "json" => Ok(serde_json::to_string_pretty(&records)?),
        "csv" => {
            let mut out = String::from(
                "id,original_query,normalized_query,category,brand,model,error,status,created_at\n",
            );
            for r in &records {
                out.push_str(&format!(
                    "{},{},{},{},{},{},{},{},{}\n",
                    r.id,
                    csv_field(&r.original_query),
                    csv_field(&r.normalized_query),
                    csv_field(r.category.as_deref().unwrap_or("")),
                    csv_field(r.brand.as_deref().unwrap_or("")),
                    csv_field(r.model.as_deref().unwrap_or("")),
                    csv_field(r.error_message.as_deref().unwrap_or("")),
                    r.status,
                    r.created_at,
                ));
            }
            Ok(out)
        }
        other => anyhow::bail!("Unknown export format: {}. Use json or csv.", other),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> FailureRecord {
    FailureRecord {
        id: row.get("id"),
        original_query: row.get("original_query"),
        normalized_query: row.get("normalized_query"),
        candidates: row.get("candidates"),
        attempted_count: row.get("attempted_count"),
        error_message: row.get("error_message"),
        category: row.get("category"),
        brand: row.get("brand"),
        model: row.get("model"),
        status: row.get("status"),
        correct_name: row.get("correct_name"),
        correct_product_id: row.get("correct_product_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations_on(&pool).await.unwrap();
        pool
    }

    fn event(original: &str) -> FailureEvent {
        FailureEvent {
            original_query: original.to_string(),
            normalized_query: crate::textnorm::normalize(original),
            candidates: vec![crate::textnorm::normalize(original)],
            attempted_count: 2,
            error_message: "no product matched".to_string(),
            category: Some("audio".to_string()),
            brand: None,
            model: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_stats() {
        let pool = test_pool().await;
        insert_failure(&pool, &event("이상한 이어폰 X9")).await.unwrap();
        insert_failure(&pool, &event("이상한 이어폰 X9")).await.unwrap();
        insert_failure(&pool, &event("없는 라면")).await.unwrap();

        let s = stats(&pool, 7).await.unwrap();
        assert_eq!(s.total, 3);
        assert_eq!(s.pending, 3);
        assert_eq!(s.resolved, 0);
        assert_eq!(s.by_category[0].category, "audio");
    }

    #[tokio::test]
    async fn test_common_failures_grouped() {
        let pool = test_pool().await;
        for _ in 0..3 {
            insert_failure(&pool, &event("이상한 이어폰 X9")).await.unwrap();
        }
        insert_failure(&pool, &event("없는 라면")).await.unwrap();

        let common = common_failures(&pool, 10).await.unwrap();
        assert_eq!(common[0].original_query, "이상한 이어폰 X9");
        assert_eq!(common[0].failure_count, 3);
        assert_eq!(common.len(), 2);
    }

    #[tokio::test]
    async fn test_suggestions_thresholds() {
        let pool = test_pool().await;
        for _ in 0..5 {
            insert_failure(&pool, &event("매번 실패하는 상품")).await.unwrap();
        }
        for _ in 0..3 {
            insert_failure(&pool, &event("가끔 실패하는 상품")).await.unwrap();
        }
        insert_failure(&pool, &event("한 번 실패")).await.unwrap();

        let list = suggestions(&pool).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].priority, "HIGH");
        assert_eq!(list[0].occurrences, 5);
        assert_eq!(list[1].priority, "LOW");
    }

    #[tokio::test]
    async fn test_mark_resolved() {
        let pool = test_pool().await;
        let id = insert_failure(&pool, &event("이상한 이어폰 X9")).await.unwrap();

        let updated = mark_resolved(&pool, id, "manual_fixed", Some("정상 이어폰 X9"), Some("123"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, "manual_fixed");
        assert_eq!(updated.correct_name.as_deref(), Some("정상 이어폰 X9"));

        let s = stats(&pool, 7).await.unwrap();
        assert_eq!(s.pending, 0);
        assert_eq!(s.resolved, 1);

        assert!(mark_resolved(&pool, 9999, "manual_fixed", None, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_export_formats() {
        let pool = test_pool().await;
        insert_failure(&pool, &event("쉼표, 들어간 상품")).await.unwrap();

        let json = export(&pool, "json", 7, 100).await.unwrap();
        assert!(json.contains("쉼표, 들어간 상품"));

        let csv = export(&pool, "csv", 7, 100).await.unwrap();
        assert!(csv.starts_with("id,original_query"));
        assert!(csv.contains("\"쉼표, 들어간 상품\""));

        assert!(export(&pool, "xml", 7, 100).await.is_err());
    }

    #[tokio::test]
    async fn test_queue_drops_oldest_under_overload() {
        let sink = detached_sink(2);
        sink.record(event("첫번째"));
        sink.record(event("두번째"));
        sink.record(event("세번째"));

        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].original_query, "두번째");
        assert_eq!(drained[1].original_query, "세번째");
    }

    #[tokio::test]
    async fn test_spawned_recorder_writes_through() {
        let pool = test_pool().await;
        let sink = spawn_recorder(pool.clone(), 16);
        sink.record(event("배경 기록"));

        // The writer drains asynchronously.
        let mut found = false;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if stats(&pool, 7).await.unwrap().total == 1 {
                found = true;
                break;
            }
        }
        assert!(found, "background writer never persisted the event");
    }
}
