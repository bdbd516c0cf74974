//! Outbox for best-effort side effects (notification email, for now).
//!
//! Instead of firing and forgetting, callers enqueue a job row in the same
//! transaction as their primary write. A background drainer delivers queued
//! jobs and records every failure: a job is retried with a delay until the
//! attempt cap, then parked as `failed` with its last error kept for
//! inspection.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::config::{EmailConfig, OutboxConfig};
use crate::core::shared::schema::outbox_jobs;
use crate::core::shared::utils::DbPool;

pub const KIND_EMAIL: &str = "email";

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = outbox_jobs)]
pub struct DbOutboxJob {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Queue a job. Best-effort: an enqueue failure is logged, the caller's
/// request is not failed for it.
pub fn enqueue(
    conn: &mut PgConnection,
    tenant_id: Option<Uuid>,
    kind: &str,
    payload: serde_json::Value,
) {
    let now = Utc::now();
    let job = DbOutboxJob {
        id: Uuid::new_v4(),
        tenant_id,
        kind: kind.to_string(),
        payload,
        status: "queued".to_string(),
        attempts: 0,
        last_error: None,
        scheduled_at: now,
        sent_at: None,
        created_at: now,
    };
    if let Err(e) = diesel::insert_into(outbox_jobs::table)
        .values(&job)
        .execute(conn)
    {
        warn!("outbox enqueue failed for kind {kind}: {e}");
    }
}

pub fn enqueue_email(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    to: &str,
    subject: &str,
    body: &str,
) {
    enqueue(
        conn,
        Some(tenant_id),
        KIND_EMAIL,
        serde_json::json!({ "to": to, "subject": subject, "body": body }),
    );
}

// ============================================================================
// DELIVERY
// ============================================================================

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Delivers over SMTP via lettre.
pub struct EmailNotifier {
    transport: lettre::SmtpTransport,
    from: String,
}

impl EmailNotifier {
    pub fn new(cfg: &EmailConfig) -> anyhow::Result<Self> {
        use lettre::transport::smtp::authentication::Credentials;

        let transport = lettre::SmtpTransport::relay(&cfg.smtp_server)?
            .port(cfg.smtp_port)
            .credentials(Credentials::new(
                cfg.username.clone(),
                cfg.password.clone(),
            ))
            .build();
        Ok(Self {
            transport,
            from: cfg.from.clone(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        use lettre::Transport;

        let email = lettre::Message::builder()
            .from(self.from.parse()?)
            .to(to.parse()?)
            .subject(subject)
            .body(body.to_string())?;
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&email)).await??;
        Ok(())
    }
}

/// Stand-in when SMTP is not configured: deliveries are logged only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        info!("notification (email disabled) to {to}: {subject}");
        Ok(())
    }
}

// ============================================================================
// DRAIN LOOP
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// Try again after a backoff delay.
    Retry { delay_secs: i64 },
    /// Attempt cap reached, park the job.
    Fail,
}

/// Bookkeeping for a failed delivery: linear backoff until the cap.
pub fn retry_disposition(attempts_after_failure: i32, max_attempts: i32) -> JobOutcome {
    if attempts_after_failure >= max_attempts {
        JobOutcome::Fail
    } else {
        JobOutcome::Retry {
            delay_secs: 60 * i64::from(attempts_after_failure),
        }
    }
}

fn due_jobs(conn: &mut PgConnection, limit: i64) -> QueryResult<Vec<DbOutboxJob>> {
    outbox_jobs::table
        .filter(outbox_jobs::status.eq("queued"))
        .filter(outbox_jobs::scheduled_at.le(Utc::now()))
        .order(outbox_jobs::scheduled_at.asc())
        .limit(limit)
        .load(conn)
}

fn mark_sent(conn: &mut PgConnection, id: Uuid) -> QueryResult<usize> {
    diesel::update(outbox_jobs::table.find(id))
        .set((
            outbox_jobs::status.eq("sent"),
            outbox_jobs::sent_at.eq(Some(Utc::now())),
        ))
        .execute(conn)
}

fn mark_failed_attempt(
    conn: &mut PgConnection,
    job: &DbOutboxJob,
    error: &str,
    max_attempts: i32,
) -> QueryResult<usize> {
    let attempts = job.attempts + 1;
    match retry_disposition(attempts, max_attempts) {
        JobOutcome::Retry { delay_secs } => diesel::update(outbox_jobs::table.find(job.id))
            .set((
                outbox_jobs::attempts.eq(attempts),
                outbox_jobs::last_error.eq(Some(error.to_string())),
                outbox_jobs::scheduled_at.eq(Utc::now() + Duration::seconds(delay_secs)),
            ))
            .execute(conn),
        JobOutcome::Fail => diesel::update(outbox_jobs::table.find(job.id))
            .set((
                outbox_jobs::status.eq("failed"),
                outbox_jobs::attempts.eq(attempts),
                outbox_jobs::last_error.eq(Some(error.to_string())),
            ))
            .execute(conn),
    }
}

async fn deliver(notifier: &dyn Notifier, job: &DbOutboxJob) -> anyhow::Result<()> {
    match job.kind.as_str() {
        KIND_EMAIL => {
            let to = job.payload["to"].as_str().unwrap_or_default();
            let subject = job.payload["subject"].as_str().unwrap_or_default();
            let body = job.payload["body"].as_str().unwrap_or_default();
            if to.is_empty() {
                anyhow::bail!("email job {} has no recipient", job.id);
            }
            notifier.notify(to, subject, body).await
        }
        other => anyhow::bail!("unknown outbox kind: {other}"),
    }
}

pub struct OutboxDrainer {
    pool: DbPool,
    notifier: Arc<dyn Notifier>,
    config: OutboxConfig,
}

impl OutboxDrainer {
    pub fn new(pool: DbPool, notifier: Arc<dyn Notifier>, config: OutboxConfig) -> Self {
        Self {
            pool,
            notifier,
            config,
        }
    }

    async fn drain_once(&self) {
        let pool = self.pool.clone();
        let batch = tokio::task::spawn_blocking(move || -> Result<Vec<DbOutboxJob>, String> {
            let mut conn = pool.get().map_err(|e| e.to_string())?;
            due_jobs(&mut conn, 20).map_err(|e| e.to_string())
        })
        .await;
        let batch = match batch {
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => {
                warn!("outbox fetch failed: {e}");
                return;
            }
            Err(e) => {
                warn!("outbox fetch task failed: {e}");
                return;
            }
        };

        for job in batch {
            let result = deliver(self.notifier.as_ref(), &job).await;
            let pool = self.pool.clone();
            let max_attempts = self.config.max_attempts;
            let write = tokio::task::spawn_blocking(move || -> Result<usize, String> {
                let mut conn = pool.get().map_err(|e| e.to_string())?;
                match &result {
                    Ok(()) => mark_sent(&mut conn, job.id).map_err(|e| e.to_string()),
                    Err(e) => {
                        warn!(
                            "outbox job {} attempt {} failed: {e}",
                            job.id,
                            job.attempts + 1
                        );
                        mark_failed_attempt(&mut conn, &job, &e.to_string(), max_attempts)
                            .map_err(|e| e.to_string())
                    }
                }
            })
            .await;
            match write {
                Ok(Err(e)) => warn!("outbox bookkeeping failed: {e}"),
                Err(e) => warn!("outbox bookkeeping task failed: {e}"),
                Ok(Ok(_)) => {}
            }
        }
    }

    /// Spawn the polling loop. Runs for the lifetime of the process.
    pub fn spawn(self) {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(self.config.poll_secs));
            loop {
                interval.tick().await;
                self.drain_once().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_jobs_retry_until_the_cap() {
        assert_eq!(
            retry_disposition(1, 5),
            JobOutcome::Retry { delay_secs: 60 }
        );
        assert_eq!(
            retry_disposition(4, 5),
            JobOutcome::Retry { delay_secs: 240 }
        );
        assert_eq!(retry_disposition(5, 5), JobOutcome::Fail);
        assert_eq!(retry_disposition(9, 5), JobOutcome::Fail);
    }

    #[tokio::test]
    async fn unknown_kinds_are_rejected() {
        let job = DbOutboxJob {
            id: Uuid::new_v4(),
            tenant_id: None,
            kind: "carrier_pigeon".to_string(),
            payload: serde_json::json!({}),
            status: "queued".to_string(),
            attempts: 0,
            last_error: None,
            scheduled_at: Utc::now(),
            sent_at: None,
            created_at: Utc::now(),
        };
        assert!(deliver(&LogNotifier, &job).await.is_err());
    }

    #[tokio::test]
    async fn email_jobs_require_a_recipient() {
        let job = DbOutboxJob {
            id: Uuid::new_v4(),
            tenant_id: None,
            kind: KIND_EMAIL.to_string(),
            payload: serde_json::json!({ "subject": "hi", "body": "text" }),
            status: "queued".to_string(),
            attempts: 0,
            last_error: None,
            scheduled_at: Utc::now(),
            sent_at: None,
            created_at: Utc::now(),
        };
        assert!(deliver(&LogNotifier, &job).await.is_err());

        let ok = DbOutboxJob {
            payload: serde_json::json!({ "to": "a@b.c", "subject": "hi", "body": "text" }),
            ..job
        };
        assert!(deliver(&LogNotifier, &ok).await.is_ok());
    }
}
