//! Data model shared by every MCOS component (spec §3).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of interests a [`UserProfile`] retains (spec §4.3 `Merge`).
pub const MAX_INTERESTS: usize = 50;
/// Hard cap on [`MemoryMetadata::content`], in bytes (spec §3 `MemoryRecord`).
pub const MAX_CONTENT_BYTES: usize = 8 * 1024;

/// Which half of a [`Turn`] (or which kind of vector-store record) a role names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Summary,
    Profile,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Summary => "summary",
            Role::Profile => "profile",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "summary" => Ok(Role::Summary),
            "profile" => Ok(Role::Profile),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The `kind` discriminant on a [`MemoryRecord`] (spec §3, §6 persisted layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Conversation,
    Summary,
    Profile,
}

impl RecordKind {
    /// Tie-break priority used by C4 query ordering (spec §4.4): lower sorts first.
    pub fn tie_break_rank(self) -> u8 {
        match self {
            RecordKind::Summary => 0,
            RecordKind::Conversation => 1,
            RecordKind::Profile => 2,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordKind::Conversation => "conversation",
            RecordKind::Summary => "summary",
            RecordKind::Profile => "profile",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(RecordKind::Conversation),
            "summary" => Ok(RecordKind::Summary),
            "profile" => Ok(RecordKind::Profile),
            other => Err(format!("unknown record kind: {other}")),
        }
    }
}

/// An artifact produced alongside a turn (spec §3 `Turn.artifacts`).
///
/// `url` always points into `ObjectStore`; MCOS never carries inline bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub url: String,
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Document,
}

/// One exchange in a chat — the atomic memory unit (spec §3 `Turn`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Deterministic per-turn id (host computes, e.g. a hash of
    /// `userId|chatId|seq|createdAt`); duplicate insertion is a no-op.
    pub id: String,
    pub user_id: String,
    pub chat_id: String,
    /// Monotonically increasing within `(user_id, chat_id)`, assigned by C1.
    pub seq: u64,
    /// Millisecond timestamp, non-decreasing within a chat.
    pub created_at: i64,
    pub user_text: String,
    pub assistant_text: String,
    pub artifacts: Vec<Artifact>,
    /// Absent until C6's summarize job computes it.
    pub derived_summary: Option<String>,
}

impl Turn {
    /// Spec §3: "either may be empty if a turn is single-sided, but not both."
    pub fn is_valid_halves(&self) -> bool {
        !(self.user_text.is_empty() && self.assistant_text.is_empty())
    }
}

/// Compressed representation of turns up to `covered_through_seq` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingSummary {
    pub text: String,
    pub key_facts: Vec<String>,
    /// The largest `seq` whose content this summary represents.
    pub covered_through_seq: i64,
    pub updated_at: DateTime<Utc>,
}

/// Transient per-`(userId, chatId)` state held in C1 (spec §3 `ChatSession`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub user_id: String,
    pub chat_id: String,
    pub turns: Vec<Turn>,
    pub rolling_summary: Option<RollingSummary>,
    pub last_upload_at: Option<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
    pub next_seq: u64,
}

impl ChatSession {
    pub fn new(user_id: impl Into<String>, chat_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            turns: Vec::new(),
            rolling_summary: None,
            last_upload_at: None,
            last_accessed_at: now,
            next_seq: 0,
        }
    }

    /// Number of turns appended after `rolling_summary.covered_through_seq`
    /// (spec §3: "content in `turns` beyond `coveredThroughSeq` is uncovered").
    pub fn uncovered_count(&self) -> usize {
        let covered = self
            .rolling_summary
            .as_ref()
            .map(|s| s.covered_through_seq)
            .unwrap_or(-1);
        self.turns
            .iter()
            .filter(|t| t.seq as i64 > covered)
            .count()
    }
}

/// Per-field evidence backing a [`UserProfile`] value (spec §3 `fieldProvenance`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub turn_id: String,
    pub chat_id: String,
    pub confidence: f64,
}

/// Durable per-user record (spec §3 `UserProfile`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub interests: HashSet<String>,
    pub preferences: HashMap<String, String>,
    pub background: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub field_provenance: HashMap<String, FieldProvenance>,
}

impl UserProfile {
    pub fn empty(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            role: None,
            interests: HashSet::new(),
            preferences: HashMap::new(),
            background: None,
            created_at: now,
            updated_at: now,
            field_provenance: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.role.is_none()
            && self.interests.is_empty()
            && self.preferences.is_empty()
            && self.background.is_none()
    }
}

/// A partial profile update produced by C6's extraction job (spec §4.3 `Merge`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileExtraction {
    pub display_name: Option<ExtractedField<String>>,
    pub role: Option<ExtractedField<String>>,
    pub interests: Vec<ExtractedField<String>>,
    pub preferences: HashMap<String, ExtractedField<String>>,
    pub background: Option<ExtractedField<String>>,
}

impl ProfileExtraction {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.role.is_none()
            && self.interests.is_empty()
            && self.preferences.is_empty()
            && self.background.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedField<T> {
    pub value: T,
    /// 0.0..=1.0. The `ModelAdapter` must emit this (spec §9 open question).
    pub confidence: f64,
    pub turn_id: String,
    pub chat_id: String,
}

/// A unit stored in C4's vector store (spec §3 `MemoryRecord`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// `"{userId}:{chatId}:{turnId}:{role}"`; `kind=profile` omits `chatId`/`turnId`.
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: MemoryMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub user_id: String,
    pub chat_id: Option<String>,
    pub turn_id: Option<String>,
    pub role: Role,
    pub seq: Option<i64>,
    pub created_at: i64,
    pub has_artifact: bool,
    pub artifact_url: Option<String>,
    pub kind: RecordKind,
    /// The embedded text, truncated to [`MAX_CONTENT_BYTES`].
    pub content: String,
}

impl MemoryMetadata {
    /// Spec §3 invariant: `kind=profile` records must not carry `chatId`/`turnId`/`seq`.
    pub fn is_well_formed(&self) -> bool {
        if self.kind == RecordKind::Profile {
            self.chat_id.is_none() && self.turn_id.is_none() && self.seq.is_none()
        } else {
            true
        }
    }
}

/// A metadata filter scope for C4 queries and deletes (spec §3 `Scope`, glossary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Scope {
    WholeUser { user_id: String },
    ChatOnly { user_id: String, chat_id: String },
    ProfileOnly { user_id: String },
}

impl Scope {
    pub fn user_id(&self) -> &str {
        match self {
            Scope::WholeUser { user_id }
            | Scope::ChatOnly { user_id, .. }
            | Scope::ProfileOnly { user_id } => user_id,
        }
    }
}

/// A chunk of retrieved or document text ready for prompt assembly (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub score: f32,
    pub source_id: String,
    pub kind: RecordKind,
    pub seq: Option<i64>,
}

/// In-process ledger state for one chat (spec §3 `UploadLedger entry`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub uploaded_turn_ids: HashSet<String>,
    pub last_upload_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
}
