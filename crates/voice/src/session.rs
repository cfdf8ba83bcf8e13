//! Voice session state
//!
//! ```text
//! initializing -> listening -> processing -> speaking -> listening ...
//!                     |            \-> listening
//!                     \-> paused -> listening
//! ended    terminal from any state
//! error    terminal from any non-ended state
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session duration bounds in seconds
pub const MIN_DURATION_SECS: u64 = 60;
pub const MAX_DURATION_SECS: u64 = 1800;

/// Voice session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceSessionStatus {
    Initializing,
    Listening,
    Processing,
    Speaking,
    Paused,
    Ended,
    Error,
}

impl VoiceSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceSessionStatus::Initializing => "initializing",
            VoiceSessionStatus::Listening => "listening",
            VoiceSessionStatus::Processing => "processing",
            VoiceSessionStatus::Speaking => "speaking",
            VoiceSessionStatus::Paused => "paused",
            VoiceSessionStatus::Ended => "ended",
            VoiceSessionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VoiceSessionStatus::Ended | VoiceSessionStatus::Error)
    }

    /// Whether the state machine allows this transition
    pub fn can_transition_to(&self, to: VoiceSessionStatus) -> bool {
        use VoiceSessionStatus::*;
        if self.is_terminal() {
            return false;
        }
        match to {
            Ended => true,
            Error => *self != Ended,
            Listening => matches!(self, Initializing | Processing | Speaking | Paused),
            Processing => matches!(self, Listening),
            Speaking => matches!(self, Processing),
            Paused => matches!(self, Listening),
            Initializing => false,
        }
    }
}

/// Audio channel parameters, passed through to the realtime provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u32,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_encoding() -> String {
    "pcm16".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { sample_rate_hz: default_sample_rate(), encoding: default_encoding() }
    }
}

/// Parameters for creating a session
#[derive(Debug, Clone)]
pub struct VoiceSessionConfig {
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub user_id: Option<String>,
    /// BCP-47 tag for TTS/STT
    pub locale: String,
    /// Requested duration, clamped to [60, 1800] seconds
    pub max_duration_secs: u64,
    pub audio: AudioConfig,
}

impl VoiceSessionConfig {
    /// Effective session duration after clamping
    pub fn clamped_duration_secs(&self) -> u64 {
        self.max_duration_secs.clamp(MIN_DURATION_SECS, MAX_DURATION_SECS)
    }
}

/// Latency metric channels tracked per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyKind {
    FirstToken,
    Partial,
    BargeIn,
}

/// Per-session metric accounting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub total_turns: u64,
    /// Response times in milliseconds, one per turn
    pub response_times_ms: Vec<u64>,
    pub errors: Vec<String>,
    pub first_token_ms: Vec<u64>,
    pub partial_ms: Vec<u64>,
    pub barge_in_ms: Vec<u64>,
}

impl SessionMetrics {
    pub fn record_turn(&mut self, response_ms: u64) {
        self.total_turns += 1;
        self.response_times_ms.push(response_ms);
    }

    pub fn record_latency(&mut self, kind: LatencyKind, ms: u64) {
        match kind {
            LatencyKind::FirstToken => self.first_token_ms.push(ms),
            LatencyKind::Partial => self.partial_ms.push(ms),
            LatencyKind::BargeIn => self.barge_in_ms.push(ms),
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn avg_response_ms(&self) -> f64 {
        if self.response_times_ms.is_empty() {
            return 0.0;
        }
        self.response_times_ms.iter().sum::<u64>() as f64 / self.response_times_ms.len() as f64
    }
}

/// Input routed through the session
#[derive(Debug, Clone)]
pub enum VoiceInput {
    Text(String),
    Audio(Vec<u8>),
}

/// Serializable snapshot of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSessionView {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub user_id: Option<String>,
    pub status: VoiceSessionStatus,
    pub locale: String,
    pub audio: AudioConfig,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub has_provider: bool,
    pub queued_inputs: usize,
    pub metrics: SessionMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use VoiceSessionStatus::*;
        assert!(Initializing.can_transition_to(Listening));
        assert!(Listening.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Speaking));
        assert!(Speaking.can_transition_to(Listening));
        assert!(Listening.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Listening));
        assert!(Listening.can_transition_to(Ended));
    }

    #[test]
    fn test_error_reachable_from_non_terminal_only() {
        use VoiceSessionStatus::*;
        assert!(Initializing.can_transition_to(Error));
        assert!(Speaking.can_transition_to(Error));
        assert!(!Ended.can_transition_to(Error));
        assert!(!Error.can_transition_to(Listening));
    }

    #[test]
    fn test_illegal_transitions() {
        use VoiceSessionStatus::*;
        assert!(!Listening.can_transition_to(Speaking));
        assert!(!Speaking.can_transition_to(Processing));
        assert!(!Paused.can_transition_to(Processing));
        assert!(!Ended.can_transition_to(Listening));
        assert!(!Listening.can_transition_to(Initializing));
    }

    #[test]
    fn test_duration_clamping() {
        let mut config = VoiceSessionConfig {
            tenant_id: Uuid::new_v4(),
            site_id: Uuid::new_v4(),
            user_id: None,
            locale: "en-US".to_string(),
            max_duration_secs: 10,
            audio: AudioConfig::default(),
        };
        assert_eq!(config.clamped_duration_secs(), MIN_DURATION_SECS);
        config.max_duration_secs = 7200;
        assert_eq!(config.clamped_duration_secs(), MAX_DURATION_SECS);
        config.max_duration_secs = 300;
        assert_eq!(config.clamped_duration_secs(), 300);
    }

    #[test]
    fn test_metrics_accounting() {
        let mut metrics = SessionMetrics::default();
        metrics.record_turn(100);
        metrics.record_turn(300);
        metrics.record_latency(LatencyKind::FirstToken, 40);
        metrics.record_error("asr timeout");

        assert_eq!(metrics.total_turns, 2);
        assert_eq!(metrics.avg_response_ms(), 200.0);
        assert_eq!(metrics.first_token_ms, vec![40]);
        assert_eq!(metrics.errors.len(), 1);
    }
}
