//! `mcos` — the MCOS container: wires C1-C6 into one library surface
//! (spec §2, §5, §6).
//!
//! A host constructs one [`Mcos`] per process — mirroring the teacher's
//! `skynet-gateway::app::AppState`, a single struct of `Arc`-shared
//! subsystem handles built once at startup — and calls its six public
//! operations: [`Mcos::assemble_context`], [`Mcos::record_turn`],
//! [`Mcos::end_chat`], [`Mcos::save_all`], [`Mcos::delete_chat`],
//! [`Mcos::delete_user`]. Everything named out of scope by spec §1 (the
//! chat HTTP surface, the generative model itself, the concrete
//! vector/document/object stores) is the host's responsibility, plugged in
//! here only as the trait objects from `mcos_core::adapters`.

use std::sync::Arc;
use std::time::Duration;

use mcos_core::adapters::{DocumentCache, ModelAdapter, ProfileDocStore, VectorStore};
use mcos_core::{McosConfig, McosError, Result};
use mcos_ledger::UploadLedger;
use mcos_orchestrator::{OrchestratorConfig, PersistenceOrchestrator};
use mcos_profile::{ProfileStore, SqliteProfileDocStore};
use mcos_session::SessionStore;
use mcos_vector::VectorMemory;
use rusqlite::Connection;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub use mcos_context::{AssembleOptions, ContextAssembler, ContextBundle, ContextError};
pub use mcos_core::types::{
    Artifact, ArtifactKind, ChatSession, Chunk, MemoryMetadata, MemoryRecord, RecordKind, Role,
    Scope, Turn, UserProfile,
};
pub use mcos_orchestrator::OrchestratorError;

/// Everything a host must supply to construct an [`Mcos`] (spec §6): the
/// generative model's narrow `embed`/`summarize`/`classifyIntent` surface
/// and the backing vector store are required; a `ProfileDocStore` and
/// `DocumentCache` are optional — omitted, `Mcos` falls back to its own
/// SQLite-backed default (profile) or simply skips the feature (document
/// cache, optional per spec §4.5 step 6).
pub struct McosDeps {
    pub model: Arc<dyn ModelAdapter>,
    pub vector_store: Arc<dyn VectorStore>,
    pub profile_doc_store: Option<Arc<dyn ProfileDocStore>>,
    pub document_cache: Option<Arc<dyn DocumentCache>>,
}

/// The MCOS container: one instance per process, combining C1-C6 behind
/// the six operations named in spec §2/§4.
///
/// Grounded on the teacher's `AppState` — a single struct of `Arc`
/// subsystem handles constructed once at startup and shared by every
/// caller — minus the HTTP router, which MCOS does not own (spec §1).
pub struct Mcos {
    pub session: Arc<SessionStore>,
    pub ledger: Arc<UploadLedger>,
    pub profile: Arc<ProfileStore>,
    pub vector: Arc<VectorMemory>,
    pub context: ContextAssembler,
    pub orchestrator: PersistenceOrchestrator,
    config: McosConfig,
}

impl Mcos {
    /// Wire every component from `config` and the host-supplied
    /// collaborators. Opens its own SQLite connections against
    /// `config.database.path` for the profile store (when no
    /// `ProfileDocStore` override is given) and the orchestrator's
    /// dead-letter log — one `Connection` per manager against a shared
    /// file, the same convention as the teacher's
    /// `skynet-gateway::mcp_bridge::spawn_bridge` (`Connection::open(path)`
    /// then `MemoryManager::new(conn)`).
    pub fn new(config: McosConfig, deps: McosDeps) -> Result<Self> {
        let session = Arc::new(SessionStore::new(config.session_turn_cap));
        let ledger = Arc::new(UploadLedger::new());

        let profile_doc_store = match deps.profile_doc_store {
            Some(store) => store,
            None => {
                let conn = open_db(&config.database.path)?;
                mcos_profile::db::init_db(&conn).map_err(|e| McosError::Database(e.to_string()))?;
                Arc::new(SqliteProfileDocStore::new(conn))
            }
        };
        let profile = Arc::new(
            ProfileStore::new(profile_doc_store)
                .with_vector_embedding(Arc::clone(&deps.vector_store), Arc::clone(&deps.model))
                .with_turn_liveness(Arc::clone(&session)),
        );

        let vector = Arc::new(VectorMemory::new(
            Arc::clone(&deps.vector_store),
            Arc::clone(&deps.model),
            config.embed_concurrency,
            config.retrieval_min_score,
        ));

        let mut context = ContextAssembler::new(
            Arc::clone(&session),
            Arc::clone(&profile),
            Arc::clone(&vector),
            Arc::clone(&deps.model),
            config.retrieval_topk,
            config.context_token_cap,
        );
        if let Some(cache) = deps.document_cache {
            context = context.with_document_cache(cache);
        }

        let dead_letter_conn = open_db(&config.database.path)?;
        let orchestrator = PersistenceOrchestrator::new(
            Arc::clone(&session),
            Arc::clone(&ledger),
            Arc::clone(&profile),
            Arc::clone(&vector),
            Arc::clone(&deps.vector_store),
            Arc::clone(&deps.model),
            dead_letter_conn,
            OrchestratorConfig::from(&config),
        )
        .map_err(McosError::from)?;

        Ok(Self {
            session,
            ledger,
            profile,
            vector,
            context,
            orchestrator,
            config,
        })
    }

    /// `AssembleContext(userId, chatId, userMessage, opts) -> ContextBundle` (spec §4.5).
    pub async fn assemble_context(
        &self,
        user_id: &str,
        chat_id: &str,
        user_message: &str,
        opts: AssembleOptions,
    ) -> std::result::Result<ContextBundle, ContextError> {
        self.context
            .assemble_context(user_id, chat_id, user_message, opts)
            .await
    }

    /// `RecordTurn(userId, chatId, userText, assistantText, artifacts) -> turnId` (spec §4.6).
    pub async fn record_turn(
        &self,
        user_id: &str,
        chat_id: &str,
        user_text: impl Into<String>,
        assistant_text: impl Into<String>,
        artifacts: Vec<Artifact>,
    ) -> std::result::Result<String, OrchestratorError> {
        self.orchestrator
            .record_turn(user_id, chat_id, user_text, assistant_text, artifacts)
            .await
    }

    /// `EndChat(userId, chatId, force) -> ()` (spec §4.6).
    pub async fn end_chat(
        &self,
        user_id: &str,
        chat_id: &str,
        force: bool,
    ) -> std::result::Result<(), OrchestratorError> {
        self.orchestrator.end_chat(user_id, chat_id, force).await
    }

    /// `SaveAll(userId, chatIds) -> ()` (spec §4.6).
    pub async fn save_all(
        &self,
        user_id: &str,
        chat_ids: &[String],
    ) -> std::result::Result<(), OrchestratorError> {
        self.orchestrator.save_all(user_id, chat_ids).await
    }

    /// `DeleteChat(userId, chatId) -> ()` (spec §4.6).
    pub async fn delete_chat(
        &self,
        user_id: &str,
        chat_id: &str,
    ) -> std::result::Result<(), OrchestratorError> {
        self.orchestrator.delete_chat(user_id, chat_id).await
    }

    /// `DeleteUser(userId) -> ()` (spec §4.6).
    pub async fn delete_user(&self, user_id: &str) -> std::result::Result<(), OrchestratorError> {
        self.orchestrator.delete_user(user_id).await
    }

    pub fn config(&self) -> &McosConfig {
        &self.config
    }

    /// Spawn the session-TTL janitor (spec §4.1: "invoked at most once per
    /// minute"; eviction flushes via `EndChat(force=true)` first). Grounded
    /// on the teacher's `SchedulerEngine::run` — a `tokio::time::interval`
    /// loop selecting against a `watch::Receiver<bool>` shutdown signal,
    /// rather than a detached `setInterval`. Returns a [`JanitorHandle`];
    /// drop it or call `shutdown` to stop the loop.
    pub fn spawn_janitor(self: &Arc<Self>) -> JanitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let join = tokio::spawn(async move {
            info!("MCOS janitor started");
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = this.orchestrator.run_janitor().await {
                            error!(error = %e, "janitor sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("MCOS janitor shutting down");
                            break;
                        }
                    }
                }
            }
        });
        JanitorHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

/// Handle returned by [`Mcos::spawn_janitor`]. Dropping it leaves the loop
/// running (detached, as `tokio::spawn` intends); call [`Self::shutdown`]
/// for an orderly stop.
pub struct JanitorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl JanitorHandle {
    /// Signal the janitor loop to stop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

fn open_db(path: &str) -> Result<Connection> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| McosError::Database(format!("creating {}: {e}", parent.display())))?;
        }
    }
    Connection::open(path).map_err(|e| McosError::Database(e.to_string()))
}
