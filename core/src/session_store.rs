//! Session persistence.
//!
//! The orchestrator only ever writes through `SessionRecorder`; nothing in
//! the step loop reads sessions back. `JsonSessionStore` keeps one pretty
//! JSON document per session and rewrites it on every update.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::history::{HistoryTurn, Role};
use crate::orchestrator::TaskOutcome;

/// Stands in for screenshot bytes in stored turns.
pub const IMAGE_MARKER: &str = "[screenshot]";

#[async_trait]
pub trait SessionRecorder: Send + Sync {
    async fn begin(&self, session_id: &str, goal: &str) -> Result<()>;
    async fn record_turn(&self, session_id: &str, turn: &HistoryTurn) -> Result<()>;
    async fn finish(&self, session_id: &str, outcome: &TaskOutcome, steps: usize) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SessionTurn {
    fn from_history(turn: &HistoryTurn) -> Self {
        Self {
            role: turn.role,
            content: turn.text.clone().unwrap_or_default(),
            image: turn.image.as_ref().map(|_| IMAGE_MARKER.to_string()),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    MaxStepsReached,
    Stopped,
    Failed,
}

impl From<&TaskOutcome> for SessionStatus {
    fn from(outcome: &TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Completed { .. } => SessionStatus::Completed,
            TaskOutcome::MaxStepsReached => SessionStatus::MaxStepsReached,
            TaskOutcome::UserStopped => SessionStatus::Stopped,
            TaskOutcome::Error { .. } => SessionStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub goal: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub turns: Vec<SessionTurn>,
    pub steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_message: Option<String>,
}

impl Session {
    pub fn new(id: &str, goal: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            goal: goal.to_string(),
            created_at: now,
            updated_at: now,
            status: SessionStatus::Active,
            turns: Vec::new(),
            steps: 0,
            outcome_message: None,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

pub struct JsonSessionStore {
    base_dir: PathBuf,
    sessions: Mutex<HashMap<String, Session>>,
}

impl JsonSessionStore {
    pub fn new(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir).context("Failed to create session directory")?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".device_pilot")
            .join("sessions")
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", id))
    }

    fn write(&self, session: &Session) -> Result<()> {
        let path = self.session_path(&session.id);
        let json = serde_json::to_string_pretty(session).context("Failed to serialize session")?;
        fs::write(&path, json).with_context(|| format!("Failed to write session to {}", path.display()))?;
        debug!("[Session] Saved {}", session.id);
        Ok(())
    }

    /// Applies `update` to the cached session and writes it out.
    fn update<F>(&self, id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut Session),
    {
        let snapshot = {
            let mut sessions = self
                .sessions
                .lock()
                .map_err(|_| anyhow::anyhow!("Session cache poisoned"))?;
            let session = sessions
                .get_mut(id)
                .with_context(|| format!("Unknown session {}", id))?;
            update(session);
            session.touch();
            session.clone()
        };
        self.write(&snapshot)
    }

    pub fn load(&self, id: &str) -> Result<Option<Session>> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let session = serde_json::from_str(&json).context("Failed to parse session JSON")?;
        Ok(Some(session))
    }

    /// Every readable session on disk, newest first. Unparseable files are
    /// skipped.
    pub fn list(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(session) = fs::read_to_string(&path)
                    .ok()
                    .and_then(|json| serde_json::from_str::<Session>(&json).ok())
                {
                    sessions.push(session);
                }
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Deletes finished sessions older than `max_age_days`.
    pub fn cleanup_old(&self, max_age_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days);
        let mut removed = 0;
        for session in self.list()? {
            if session.status != SessionStatus::Active && session.updated_at < cutoff {
                fs::remove_file(self.session_path(&session.id))?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("[Session] Removed {} old sessions", removed);
        }
        Ok(removed)
    }
}

#[async_trait]
impl SessionRecorder for JsonSessionStore {
    async fn begin(&self, session_id: &str, goal: &str) -> Result<()> {
        let session = Session::new(session_id, goal);
        self.sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("Session cache poisoned"))?
            .insert(session_id.to_string(), session.clone());
        self.write(&session)
    }

    async fn record_turn(&self, session_id: &str, turn: &HistoryTurn) -> Result<()> {
        let turn = SessionTurn::from_history(turn);
        self.update(session_id, |s| s.turns.push(turn))
    }

    async fn finish(&self, session_id: &str, outcome: &TaskOutcome, steps: usize) -> Result<()> {
        self.update(session_id, |s| {
            s.status = SessionStatus::from(outcome);
            s.steps = steps;
            s.outcome_message = outcome.message().map(str::to_string);
        })?;
        // Finished sessions are only needed on disk.
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(session_id);
        }
        Ok(())
    }
}
