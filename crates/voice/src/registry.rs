//! Voice session registry
//!
//! Sessions live behind a per-session mutex inside a registry map
//! guarded by a RW-lock. Cross-tenant access fails with `Forbidden`
//! even when the session id is known. Sessions past `expires_at` are
//! swept asynchronously and moved to `ended`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use sitevoice_core::RealtimeClient;

use crate::session::{
    LatencyKind, SessionMetrics, VoiceInput, VoiceSessionConfig, VoiceSessionStatus,
    VoiceSessionView,
};
use crate::VoiceError;

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum concurrent sessions
    pub max_sessions: usize,
    /// Expiry sweep interval
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_sessions: 500, sweep_interval: Duration::from_secs(30) }
    }
}

struct VoiceSession {
    view: VoiceSessionView,
    provider: Option<Arc<dyn RealtimeClient>>,
    queued: Vec<VoiceInput>,
}

/// Outcome of routing an input through a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "outcome")]
pub enum InputOutcome {
    /// Delivered to the attached realtime provider
    Sent,
    /// No provider attached yet; input parked in the session queue
    Queued { depth: usize },
}

/// Registry-wide snapshot for health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStatus {
    pub active_sessions: usize,
    pub sessions_started: u64,
    pub total_turns: u64,
    pub avg_response_ms: f64,
    pub error_count: usize,
}

/// The voice session registry
pub struct VoiceSessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<VoiceSession>>>>,
    config: RegistryConfig,
    sessions_started: AtomicU64,
}

impl VoiceSessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            sessions_started: AtomicU64::new(0),
        }
    }

    /// Create a session; `expires_at = now + clamped max duration`
    pub fn create(&self, config: VoiceSessionConfig) -> Result<VoiceSessionView, VoiceError> {
        let mut sessions = self.sessions.write();

        if sessions.len() >= self.config.max_sessions {
            self.sweep_expired_locked(&mut sessions);
            if sessions.len() >= self.config.max_sessions {
                return Err(VoiceError::CapacityReached);
            }
        }

        let now = Utc::now();
        let duration = chrono::Duration::seconds(config.clamped_duration_secs() as i64);
        let view = VoiceSessionView {
            id: Uuid::new_v4(),
            tenant_id: config.tenant_id,
            site_id: config.site_id,
            user_id: config.user_id,
            status: VoiceSessionStatus::Initializing,
            locale: config.locale,
            audio: config.audio,
            created_at: now,
            expires_at: now + duration,
            last_activity: now,
            ended_at: None,
            has_provider: false,
            queued_inputs: 0,
            metrics: SessionMetrics::default(),
        };

        sessions.insert(
            view.id,
            Arc::new(Mutex::new(VoiceSession { view: view.clone(), provider: None, queued: Vec::new() })),
        );
        self.sessions_started.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            session_id = %view.id,
            tenant_id = %view.tenant_id,
            locale = %view.locale,
            expires_at = %view.expires_at,
            "Voice session created"
        );
        Ok(view)
    }

    fn slot(&self, session_id: Uuid, tenant_id: Uuid) -> Result<Arc<Mutex<VoiceSession>>, VoiceError> {
        let sessions = self.sessions.read();
        let slot = sessions
            .get(&session_id)
            .ok_or_else(|| VoiceError::NotFound(session_id.to_string()))?;
        if slot.lock().view.tenant_id != tenant_id {
            return Err(VoiceError::Forbidden);
        }
        Ok(Arc::clone(slot))
    }

    /// Fetch a session snapshot
    pub fn get(&self, session_id: Uuid, tenant_id: Uuid) -> Result<VoiceSessionView, VoiceError> {
        Ok(self.slot(session_id, tenant_id)?.lock().view.clone())
    }

    /// Bind a realtime transport and flush queued inputs through it
    pub async fn attach_provider(
        &self,
        session_id: Uuid,
        tenant_id: Uuid,
        client: Arc<dyn RealtimeClient>,
    ) -> Result<usize, VoiceError> {
        let slot = self.slot(session_id, tenant_id)?;

        let queued = {
            let mut session = slot.lock();
            if session.view.status.is_terminal() {
                return Err(VoiceError::NotFound(session_id.to_string()));
            }
            session.provider = Some(Arc::clone(&client));
            session.view.has_provider = true;
            if session.view.status == VoiceSessionStatus::Initializing {
                session.view.status = VoiceSessionStatus::Listening;
            }
            session.view.queued_inputs = 0;
            std::mem::take(&mut session.queued)
        };

        // Delivery happens outside the session lock; provider calls are
        // suspension points.
        let flushed = queued.len();
        for input in queued {
            deliver(&client, &input)
                .await
                .map_err(|e| VoiceError::Provider(e.to_string()))?;
        }
        Ok(flushed)
    }

    /// Route input through the attached provider, or queue it
    pub async fn process_input(
        &self,
        session_id: Uuid,
        tenant_id: Uuid,
        input: VoiceInput,
    ) -> Result<InputOutcome, VoiceError> {
        let slot = self.slot(session_id, tenant_id)?;

        let provider = {
            let mut session = slot.lock();
            if session.view.status.is_terminal() {
                return Err(VoiceError::NotFound(session_id.to_string()));
            }
            session.view.last_activity = Utc::now();
            match &session.provider {
                Some(provider) => Some(Arc::clone(provider)),
                None => {
                    session.queued.push(input.clone());
                    session.view.queued_inputs = session.queued.len();
                    None
                },
            }
        };

        match provider {
            Some(provider) => {
                deliver(&provider, &input)
                    .await
                    .map_err(|e| VoiceError::Provider(e.to_string()))?;
                Ok(InputOutcome::Sent)
            },
            None => {
                let depth = slot.lock().queued.len();
                Ok(InputOutcome::Queued { depth })
            },
        }
    }

    /// Apply a state-machine transition
    pub fn transition(
        &self,
        session_id: Uuid,
        tenant_id: Uuid,
        to: VoiceSessionStatus,
    ) -> Result<VoiceSessionView, VoiceError> {
        let slot = self.slot(session_id, tenant_id)?;
        let mut session = slot.lock();

        if !session.view.status.can_transition_to(to) {
            return Err(VoiceError::InvalidTransition {
                from: session.view.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        session.view.status = to;
        session.view.last_activity = Utc::now();
        if to.is_terminal() {
            session.view.ended_at = Some(Utc::now());
            session.provider = None;
            session.view.has_provider = false;
        }
        Ok(session.view.clone())
    }

    /// End a session; ending an already-ended session is idempotent
    pub fn end(&self, session_id: Uuid, tenant_id: Uuid) -> Result<VoiceSessionView, VoiceError> {
        let slot = self.slot(session_id, tenant_id)?;
        let mut session = slot.lock();

        if session.view.status != VoiceSessionStatus::Ended {
            session.view.status = VoiceSessionStatus::Ended;
            session.view.ended_at = Some(Utc::now());
            session.provider = None;
            session.view.has_provider = false;
            tracing::info!(session_id = %session_id, "Voice session ended");
        }
        Ok(session.view.clone())
    }

    /// Refresh the activity timestamp
    pub fn heartbeat(&self, session_id: Uuid, tenant_id: Uuid) -> Result<(), VoiceError> {
        let slot = self.slot(session_id, tenant_id)?;
        let mut session = slot.lock();
        if session.view.status.is_terminal() {
            return Err(VoiceError::NotFound(session_id.to_string()));
        }
        session.view.last_activity = Utc::now();
        Ok(())
    }

    /// Record a completed conversation turn
    pub fn record_turn(
        &self,
        session_id: Uuid,
        tenant_id: Uuid,
        response_ms: u64,
    ) -> Result<(), VoiceError> {
        let slot = self.slot(session_id, tenant_id)?;
        slot.lock().view.metrics.record_turn(response_ms);
        Ok(())
    }

    /// Record a latency sample
    pub fn record_latency(
        &self,
        session_id: Uuid,
        tenant_id: Uuid,
        kind: LatencyKind,
        ms: u64,
    ) -> Result<(), VoiceError> {
        let slot = self.slot(session_id, tenant_id)?;
        slot.lock().view.metrics.record_latency(kind, ms);
        Ok(())
    }

    /// Record a session-scoped error
    pub fn record_error(
        &self,
        session_id: Uuid,
        tenant_id: Uuid,
        message: &str,
    ) -> Result<(), VoiceError> {
        let slot = self.slot(session_id, tenant_id)?;
        slot.lock().view.metrics.record_error(message);
        Ok(())
    }

    /// End sessions past their expiry; returns how many were swept
    pub fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.write();
        self.sweep_expired_locked(&mut sessions)
    }

    fn sweep_expired_locked(
        &self,
        sessions: &mut HashMap<Uuid, Arc<Mutex<VoiceSession>>>,
    ) -> usize {
        let now = Utc::now();
        let mut swept = 0;

        // Terminal sessions older than their expiry leave the map; live
        // ones past expiry are auto-ended first and collected next sweep.
        sessions.retain(|id, slot| {
            let mut session = slot.lock();
            if session.view.status.is_terminal() {
                let expired = session.view.expires_at < now;
                if expired {
                    tracing::debug!(session_id = %id, "Dropping finished voice session");
                }
                return !expired;
            }
            if session.view.expires_at < now {
                session.view.status = VoiceSessionStatus::Ended;
                session.view.ended_at = Some(now);
                session.provider = None;
                session.view.has_provider = false;
                swept += 1;
                tracing::info!(session_id = %id, "Voice session expired");
            }
            true
        });
        swept
    }

    /// Spawn the background expiry sweeper; returns its shutdown handle
    pub fn start_sweeper(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(self);
        let interval = registry.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = registry.sweep_expired();
                        if swept > 0 {
                            tracing::info!(swept, "Voice session sweep ended expired sessions");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Voice session sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Registry-wide snapshot used by health checks
    pub fn status(&self) -> RegistryStatus {
        let sessions = self.sessions.read();
        let mut active = 0;
        let mut turns = 0;
        let mut response_sum = 0u64;
        let mut response_count = 0usize;
        let mut errors = 0;

        for slot in sessions.values() {
            let session = slot.lock();
            if !session.view.status.is_terminal() {
                active += 1;
            }
            turns += session.view.metrics.total_turns;
            response_sum += session.view.metrics.response_times_ms.iter().sum::<u64>();
            response_count += session.view.metrics.response_times_ms.len();
            errors += session.view.metrics.errors.len();
        }

        RegistryStatus {
            active_sessions: active,
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            total_turns: turns,
            avg_response_ms: if response_count == 0 {
                0.0
            } else {
                response_sum as f64 / response_count as f64
            },
            error_count: errors,
        }
    }
}

#[async_trait::async_trait]
impl sitevoice_core::StatsReportable for VoiceSessionRegistry {
    async fn stats_snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self.status()).unwrap_or_default()
    }
}

async fn deliver(client: &Arc<dyn RealtimeClient>, input: &VoiceInput) -> sitevoice_core::Result<()> {
    match input {
        VoiceInput::Text(text) => client.send_text(text).await,
        VoiceInput::Audio(audio) => client.send_audio(audio).await,
    }
}
