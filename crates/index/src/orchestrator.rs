//! Crawl orchestration
//!
//! Owns the crawl session lifecycle. Sessions queue through an mpsc
//! channel and a small worker pool executes them one at a time per
//! worker; at most one queued-or-running session may exist per
//! `(tenant, site, mode)`. Cancellation is cooperative: in-flight page
//! fetches complete and the session drains before it flips to
//! `cancelled`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::indexer::{content_hash, IncrementalIndexer, LastCrawlInfo, SessionKind};
use crate::IndexError;

/// Queue capacity for pending sessions
const QUEUE_CAPACITY: usize = 64;

/// Retention for terminal sessions in the registry
const SESSION_RETENTION_SECS: i64 = 3600;

/// Crawl session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    Queued,
    Running,
    Cancelled,
    Failed,
    Completed,
}

impl CrawlStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CrawlStatus::Cancelled | CrawlStatus::Failed | CrawlStatus::Completed)
    }
}

/// A crawl submission
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub site_url: String,
    pub kind: SessionKind,
    /// Caller-provided URL set for selective sessions
    pub urls: Option<Vec<String>>,
    pub last_crawl: Option<LastCrawlInfo>,
}

struct CrawlSession {
    id: Uuid,
    tenant_id: Uuid,
    site_id: Uuid,
    site_url: String,
    kind: SessionKind,
    urls: Option<Vec<String>>,
    last_crawl: Option<LastCrawlInfo>,
    status: CrawlStatus,
    queued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    processed_pages: usize,
    error: Option<String>,
    last_crawl_time: Option<DateTime<Utc>>,
    last_sitemap_check: Option<DateTime<Utc>>,
    last_crawl_hash: Option<String>,
    cancel: Arc<AtomicBool>,
}

/// Serializable snapshot of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSessionView {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub kind: SessionKind,
    pub status: CrawlStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub processed_pages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_crawl_time: Option<DateTime<Utc>>,
    pub last_sitemap_check: Option<DateTime<Utc>>,
    pub last_crawl_hash: Option<String>,
}

impl CrawlSession {
    fn view(&self) -> CrawlSessionView {
        CrawlSessionView {
            id: self.id,
            tenant_id: self.tenant_id,
            site_id: self.site_id,
            kind: self.kind,
            status: self.status,
            queued_at: self.queued_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            processed_pages: self.processed_pages,
            error: self.error.clone(),
            last_crawl_time: self.last_crawl_time,
            last_sitemap_check: self.last_sitemap_check,
            last_crawl_hash: self.last_crawl_hash.clone(),
        }
    }
}

/// Result of a cancel call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlCancelOutcome {
    pub status: CrawlStatus,
    pub cancelled_at: DateTime<Utc>,
    pub processed_pages: usize,
}

/// Tenant-scoped orchestrator statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub sessions: usize,
    pub pages_processed: usize,
    pub errors: usize,
    /// A session is currently queued or running
    pub processing: bool,
    /// Most recent successful crawl
    pub last_crawl_time: Option<DateTime<Utc>>,
}

/// The crawl orchestrator
pub struct CrawlOrchestrator {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<CrawlSession>>>>,
    queue_tx: mpsc::Sender<Uuid>,
    indexer: Arc<IncrementalIndexer>,
}

impl CrawlOrchestrator {
    /// Build the orchestrator and spawn its worker pool
    pub fn start(indexer: Arc<IncrementalIndexer>, workers: usize) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        let orchestrator = Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            queue_tx,
            indexer,
        });

        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        for worker in 0..workers.max(1) {
            let orchestrator = Arc::clone(&orchestrator);
            let queue_rx = Arc::clone(&queue_rx);
            tokio::spawn(async move {
                loop {
                    let next = { queue_rx.lock().await.recv().await };
                    match next {
                        Some(session_id) => orchestrator.run_session(session_id).await,
                        None => {
                            tracing::info!(worker, "Crawl worker shutting down");
                            break;
                        },
                    }
                }
            });
        }

        orchestrator
    }

    /// Submit a crawl session
    ///
    /// Rejects with `AlreadyRunning` while a session with the same
    /// `(tenant, site, mode)` is queued or running.
    pub async fn submit(&self, request: CrawlRequest) -> Result<Uuid, IndexError> {
        let session_id = {
            let mut sessions = self.sessions.write();

            self.prune_expired(&mut sessions);

            let duplicate = sessions.values().any(|slot| {
                let session = slot.lock();
                session.tenant_id == request.tenant_id
                    && session.site_id == request.site_id
                    && session.kind == request.kind
                    && !session.status.is_terminal()
            });
            if duplicate {
                return Err(IndexError::AlreadyRunning {
                    mode: request.kind.as_str().to_string(),
                });
            }

            let session_id = Uuid::new_v4();
            sessions.insert(
                session_id,
                Arc::new(Mutex::new(CrawlSession {
                    id: session_id,
                    tenant_id: request.tenant_id,
                    site_id: request.site_id,
                    site_url: request.site_url,
                    kind: request.kind,
                    urls: request.urls,
                    last_crawl: request.last_crawl,
                    status: CrawlStatus::Queued,
                    queued_at: Utc::now(),
                    started_at: None,
                    ended_at: None,
                    processed_pages: 0,
                    error: None,
                    last_crawl_time: None,
                    last_sitemap_check: None,
                    last_crawl_hash: None,
                    cancel: Arc::new(AtomicBool::new(false)),
                })),
            );
            session_id
        };

        self.queue_tx
            .send(session_id)
            .await
            .map_err(|_| IndexError::Store("crawl queue is closed".to_string()))?;

        tracing::info!(session_id = %session_id, "Crawl session queued");
        Ok(session_id)
    }

    /// Fetch a tenant's session snapshot
    pub fn get(&self, session_id: Uuid, tenant_id: Uuid) -> Result<CrawlSessionView, IndexError> {
        let sessions = self.sessions.read();
        let slot = sessions
            .get(&session_id)
            .ok_or_else(|| IndexError::NotFound(format!("crawl session {}", session_id)))?;
        let session = slot.lock();
        if session.tenant_id != tenant_id {
            return Err(IndexError::Forbidden);
        }
        Ok(session.view())
    }

    /// Request cooperative cancellation
    pub fn cancel(
        &self,
        session_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<CrawlCancelOutcome, IndexError> {
        let sessions = self.sessions.read();
        let slot = sessions
            .get(&session_id)
            .ok_or_else(|| IndexError::NotFound(format!("crawl session {}", session_id)))?;
        let mut session = slot.lock();
        if session.tenant_id != tenant_id {
            return Err(IndexError::Forbidden);
        }

        match session.status {
            CrawlStatus::Queued => {
                session.status = CrawlStatus::Cancelled;
                session.ended_at = Some(Utc::now());
            },
            CrawlStatus::Running => {
                // The worker flips the status once the pool drains.
                session.cancel.store(true, Ordering::Relaxed);
            },
            _ => {},
        }

        Ok(CrawlCancelOutcome {
            status: session.status,
            cancelled_at: Utc::now(),
            processed_pages: session.processed_pages,
        })
    }

    /// Aggregate statistics for a tenant
    pub fn stats(&self, tenant_id: Uuid) -> CrawlStats {
        let sessions = self.sessions.read();
        let mut stats = CrawlStats::default();
        for slot in sessions.values() {
            let session = slot.lock();
            if session.tenant_id != tenant_id {
                continue;
            }
            stats.sessions += 1;
            stats.pages_processed += session.processed_pages;
            if session.status == CrawlStatus::Failed {
                stats.errors += 1;
            }
            if !session.status.is_terminal() {
                stats.processing = true;
            }
            if let Some(crawl_time) = session.last_crawl_time {
                stats.last_crawl_time = Some(match stats.last_crawl_time {
                    Some(existing) => existing.max(crawl_time),
                    None => crawl_time,
                });
            }
        }
        stats
    }

    /// The orchestrator is healthy while its queue accepts work
    pub fn health_check(&self) -> bool {
        !self.queue_tx.is_closed()
    }

    async fn run_session(&self, session_id: Uuid) {
        let slot = match self.sessions.read().get(&session_id) {
            Some(slot) => Arc::clone(slot),
            None => return,
        };

        let (tenant_id, site_id, site_url, kind, urls, last_crawl, cancel) = {
            let mut session = slot.lock();
            // A cancel may have landed while the session sat in the queue.
            if session.status != CrawlStatus::Queued {
                return;
            }
            session.status = CrawlStatus::Running;
            session.started_at = Some(Utc::now());
            (
                session.tenant_id,
                session.site_id,
                session.site_url.clone(),
                session.kind,
                session.urls.clone(),
                session.last_crawl.clone(),
                Arc::clone(&session.cancel),
            )
        };

        tracing::info!(session_id = %session_id, kind = kind.as_str(), "Crawl session running");

        let result = self
            .indexer
            .run(tenant_id, site_id, &site_url, kind, urls, last_crawl, cancel)
            .await;

        let now = Utc::now();
        let mut session = slot.lock();
        session.ended_at = Some(now);

        match result {
            Ok(outcome) => {
                session.processed_pages = outcome.pages_processed;
                session.last_crawl_time = Some(now);
                if kind != SessionKind::Selective {
                    session.last_sitemap_check = Some(now);
                }
                session.last_crawl_hash = Some(content_hash(&format!(
                    "{}:{}:{}",
                    site_id,
                    outcome.pages_processed,
                    now.timestamp_millis()
                )));
                session.status = if outcome.cancelled {
                    CrawlStatus::Cancelled
                } else {
                    CrawlStatus::Completed
                };
                tracing::info!(
                    session_id = %session_id,
                    status = ?session.status,
                    processed = outcome.pages_processed,
                    "Crawl session ended"
                );
            },
            Err(e) => {
                session.status = CrawlStatus::Failed;
                session.error = Some(e.to_string());
                tracing::error!(session_id = %session_id, error = %e, "Crawl session failed");
            },
        }
    }

    fn prune_expired(&self, sessions: &mut HashMap<Uuid, Arc<Mutex<CrawlSession>>>) {
        let cutoff = Utc::now() - chrono::Duration::seconds(SESSION_RETENTION_SECS);
        sessions.retain(|_, slot| {
            let session = slot.lock();
            !(session.status.is_terminal()
                && session.ended_at.map(|t| t < cutoff).unwrap_or(false))
        });
    }
}

#[async_trait::async_trait]
impl sitevoice_core::HealthCheckable for CrawlOrchestrator {
    async fn health_check(&self) -> bool {
        CrawlOrchestrator::health_check(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{IncrementalIndexer, IndexerConfig};
    use crate::testing::{MemoryIndexStore, MockEmbedder, ScriptedDriver};
    use std::time::Duration;

    fn orchestrator_with(driver: Arc<ScriptedDriver>) -> Arc<CrawlOrchestrator> {
        let indexer = Arc::new(IncrementalIndexer::new(
            Arc::new(MemoryIndexStore::new()),
            Arc::new(MockEmbedder::new(4)),
            driver,
            IndexerConfig { parallelism: 2, retry_attempts: 1, ..Default::default() },
        ));
        CrawlOrchestrator::start(indexer, 1)
    }

    fn request(tenant: Uuid, site: Uuid, kind: SessionKind) -> CrawlRequest {
        CrawlRequest {
            tenant_id: tenant,
            site_id: site,
            site_url: "https://s.example".to_string(),
            kind,
            urls: None,
            last_crawl: None,
        }
    }

    async fn wait_terminal(
        orchestrator: &CrawlOrchestrator,
        session_id: Uuid,
        tenant: Uuid,
    ) -> CrawlSessionView {
        for _ in 0..200 {
            let view = orchestrator.get(session_id, tenant).unwrap();
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never reached a terminal status");
    }

    #[tokio::test]
    async fn test_session_completes() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let driver = Arc::new(ScriptedDriver::new());
        driver.set_page("https://s.example/a", "Page a body.");
        driver.set_page("https://s.example/b", "Page b body.");
        let orchestrator = orchestrator_with(driver);

        let id = orchestrator.submit(request(tenant, site, SessionKind::Full)).await.unwrap();
        let view = wait_terminal(&orchestrator, id, tenant).await;

        assert_eq!(view.status, CrawlStatus::Completed);
        assert_eq!(view.processed_pages, 2);
        assert!(view.last_crawl_hash.is_some());
        assert!(view.last_sitemap_check.is_some());

        let stats = orchestrator.stats(tenant);
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.pages_processed, 2);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_duplicate_submit_rejected() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let driver = Arc::new(ScriptedDriver::new());
        driver.set_page("https://s.example/a", "Page a body.");
        driver.set_delay(Duration::from_millis(150));
        let orchestrator = orchestrator_with(driver);

        let first = orchestrator.submit(request(tenant, site, SessionKind::Full)).await.unwrap();
        let second = orchestrator.submit(request(tenant, site, SessionKind::Full)).await;
        assert!(matches!(second, Err(IndexError::AlreadyRunning { .. })));

        // A different mode for the same site is allowed.
        let delta = orchestrator.submit(request(tenant, site, SessionKind::Delta)).await;
        assert!(delta.is_ok());

        wait_terminal(&orchestrator, first, tenant).await;
    }

    #[tokio::test]
    async fn test_cancel_queued_session() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let driver = Arc::new(ScriptedDriver::new());
        driver.set_page("https://s.example/a", "Page a body.");
        driver.set_delay(Duration::from_millis(200));
        let orchestrator = orchestrator_with(driver);

        // Fill the single worker, then queue a second session and cancel it.
        let running = orchestrator.submit(request(tenant, site, SessionKind::Full)).await.unwrap();
        let queued = orchestrator.submit(request(tenant, site, SessionKind::Delta)).await.unwrap();

        let outcome = orchestrator.cancel(queued, tenant).unwrap();
        assert_eq!(outcome.status, CrawlStatus::Cancelled);

        let view = wait_terminal(&orchestrator, queued, tenant).await;
        assert_eq!(view.status, CrawlStatus::Cancelled);
        wait_terminal(&orchestrator, running, tenant).await;
    }

    #[tokio::test]
    async fn test_cross_tenant_access_denied() {
        let tenant = Uuid::new_v4();
        let site = Uuid::new_v4();
        let driver = Arc::new(ScriptedDriver::new());
        driver.set_page("https://s.example/a", "Page a body.");
        let orchestrator = orchestrator_with(driver);

        let id = orchestrator.submit(request(tenant, site, SessionKind::Full)).await.unwrap();

        let other_tenant = Uuid::new_v4();
        assert!(matches!(orchestrator.get(id, other_tenant), Err(IndexError::Forbidden)));
        assert!(matches!(orchestrator.cancel(id, other_tenant), Err(IndexError::Forbidden)));

        wait_terminal(&orchestrator, id, tenant).await;
    }

    #[tokio::test]
    async fn test_unknown_session_not_found() {
        let driver = Arc::new(ScriptedDriver::new());
        let orchestrator = orchestrator_with(driver);
        let result = orchestrator.get(Uuid::new_v4(), Uuid::new_v4());
        assert!(matches!(result, Err(IndexError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_health_check() {
        let orchestrator = orchestrator_with(Arc::new(ScriptedDriver::new()));
        assert!(orchestrator.health_check());
    }
}
