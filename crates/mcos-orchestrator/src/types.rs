use serde::{Deserialize, Serialize};

/// The three background job kinds C6 schedules from `RecordTurn` (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Summarize,
    ProfileExtract,
    VectorUpload,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobKind::Summarize => "summarize",
            JobKind::ProfileExtract => "profile-extract",
            JobKind::VectorUpload => "vector-upload",
        };
        write!(f, "{s}")
    }
}

/// One in-process unit of background work, keyed by `(userId, chatId)`.
///
/// Spec §4.6 keys jobs by `(userId, chatId, turnId)`; the handlers below
/// always act on the chat's current uncovered/unuploaded state at execution
/// time rather than a single turn, so the turn id that triggered enqueue
/// does not need to travel with the job itself.
#[derive(Debug, Clone)]
pub struct Job {
    pub kind: JobKind,
    pub user_id: String,
    pub chat_id: String,
    /// 1-based attempt counter. Dead-lettered at [`crate::schedule::MAX_ATTEMPTS`].
    pub attempt: u32,
    /// Set by `EndChat`: `Summarize`/`VectorUpload` ignore their usual
    /// triggers/cooldown and run unconditionally.
    pub force: bool,
}

impl Job {
    pub fn new(kind: JobKind, user_id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            kind,
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            attempt: 1,
            force: false,
        }
    }

    pub fn forced(kind: JobKind, user_id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            force: true,
            ..Self::new(kind, user_id, chat_id)
        }
    }

    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// A dead-lettered job, persisted for operator visibility across restarts
/// (spec §4.6/§7: "Logged structurally, incremented into a metrics counter,
/// and dropped from the queue. Data remains in C1 and will be retried on
/// next `RecordTurn`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: String,
    pub kind: String,
    pub user_id: String,
    pub chat_id: String,
    pub attempts: u32,
    pub reason: String,
    pub created_at: String,
}
