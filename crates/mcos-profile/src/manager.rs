use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use mcos_core::adapters::{ModelAdapter, ProfileDocStore, VectorStore};
use mcos_core::types::{
    FieldProvenance, MemoryMetadata, MemoryRecord, ProfileExtraction, RecordKind, Role, Scope,
    UserProfile, MAX_INTERESTS,
};
use mcos_core::validate_id;
use mcos_session::SessionStore;
use tracing::{debug, instrument, warn};

use crate::error::{from_doc_store_error, ProfileError, Result};

/// How many times `Merge` retries the read-modify-write cycle on an
/// optimistic-lock conflict before giving up.
const MAX_MERGE_RETRIES: u32 = 3;

/// Durable per-user profile store with confidence-monotonic field
/// provenance (spec §4.3). Backed by a pluggable [`ProfileDocStore`]; when a
/// [`VectorStore`] and [`ModelAdapter`] are also supplied, every successful
/// `Merge` re-embeds the rendered profile into C4 with `kind=profile` (spec
/// §4.3 "Persistence") so it surfaces in retrieval for brand-new chats
/// without a separate profile lookup.
pub struct ProfileStore {
    doc_store: Arc<dyn ProfileDocStore>,
    vector_store: Option<Arc<dyn VectorStore>>,
    model_adapter: Option<Arc<dyn ModelAdapter>>,
    session: Option<Arc<SessionStore>>,
    max_interests: usize,
}

impl ProfileStore {
    pub fn new(doc_store: Arc<dyn ProfileDocStore>) -> Self {
        Self {
            doc_store,
            vector_store: None,
            model_adapter: None,
            session: None,
            max_interests: MAX_INTERESTS,
        }
    }

    pub fn with_vector_embedding(
        mut self,
        vector_store: Arc<dyn VectorStore>,
        model_adapter: Arc<dyn ModelAdapter>,
    ) -> Self {
        self.vector_store = Some(vector_store);
        self.model_adapter = Some(model_adapter);
        self
    }

    /// Gives `Merge` access to C1 so a field's backing evidence turn can be
    /// checked for deletion (spec §4.3: deleted evidence overrides the
    /// confidence-monotonic rule). Without this, liveness is assumed and
    /// `Merge` falls back to the pure confidence comparison.
    pub fn with_turn_liveness(mut self, session: Arc<SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    /// `Get(userId) -> UserProfile` (spec §4.3). A default empty profile is
    /// returned when none has been stored yet.
    #[instrument(skip(self), fields(user_id))]
    pub async fn get(&self, user_id: &str) -> Result<UserProfile> {
        if !validate_id(user_id) {
            return Err(ProfileError::InvalidInput(format!("invalid userId: {user_id}")));
        }
        match self
            .doc_store
            .read(user_id)
            .await
            .map_err(from_doc_store_error)?
        {
            Some(row) => Ok(serde_json::from_str(&row.profile_json)?),
            None => Ok(UserProfile::empty(user_id, Utc::now())),
        }
    }

    /// `Merge(userId, extracted)` (spec §4.3). Applies field-by-field:
    /// overwrite iff `extracted.confidence >= existing.confidence`;
    /// `interests` unions with the existing set, capped at `max_interests`.
    /// Only ever invoked from background extraction, never the request path.
    #[instrument(skip(self, extracted), fields(user_id))]
    pub async fn merge(&self, user_id: &str, extracted: ProfileExtraction) -> Result<UserProfile> {
        if !validate_id(user_id) {
            return Err(ProfileError::InvalidInput(format!("invalid userId: {user_id}")));
        }
        if extracted.is_empty() {
            return self.get(user_id).await;
        }

        let mut attempt = 0;
        loop {
            let existing_row = self
                .doc_store
                .read(user_id)
                .await
                .map_err(from_doc_store_error)?;

            let (mut profile, expected_updated_at) = match &existing_row {
                Some(row) => (
                    serde_json::from_str::<UserProfile>(&row.profile_json)?,
                    Some(row.updated_at),
                ),
                None => (UserProfile::empty(user_id, Utc::now()), None),
            };

            apply_extraction(&mut profile, &extracted, self.max_interests, self.session.as_deref());
            profile.updated_at = Utc::now();

            let body = serde_json::to_string(&profile)?;
            match self
                .doc_store
                .write(user_id, &body, expected_updated_at)
                .await
            {
                Ok(()) => {
                    self.reembed(&profile).await;
                    return Ok(profile);
                }
                Err(e) if e.code() == "STALE_WRITE" => {
                    attempt += 1;
                    if attempt >= MAX_MERGE_RETRIES {
                        warn!(user_id, attempt, "giving up on profile merge after repeated conflicts");
                        return Err(ProfileError::StaleWrite {
                            user_id: user_id.to_string(),
                        });
                    }
                    debug!(user_id, attempt, "profile write conflict, retrying merge");
                    continue;
                }
                Err(e) => return Err(from_doc_store_error(e)),
            }
        }
    }

    /// `Delete(userId)` (spec §4.3). Removes the profile row and issues
    /// `VectorMemory.DeleteByScope({userId, kind: profile})`.
    #[instrument(skip(self), fields(user_id))]
    pub async fn delete(&self, user_id: &str) -> Result<()> {
        if !validate_id(user_id) {
            return Err(ProfileError::InvalidInput(format!("invalid userId: {user_id}")));
        }
        self.doc_store
            .delete(user_id)
            .await
            .map_err(from_doc_store_error)?;

        if let Some(vector_store) = &self.vector_store {
            let scope = Scope::ProfileOnly {
                user_id: user_id.to_string(),
            };
            if let Err(e) = vector_store.delete(&scope).await {
                warn!(user_id, error = %e, "failed to delete profile vector records");
            }
        }
        Ok(())
    }

    async fn reembed(&self, profile: &UserProfile) {
        let (Some(vector_store), Some(model_adapter)) = (&self.vector_store, &self.model_adapter)
        else {
            return;
        };
        let text = render_profile(profile);
        let vector = match model_adapter.embed(&text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(user_id = %profile.user_id, error = %e, "profile embedding failed, skipping re-index");
                return;
            }
        };
        let record = MemoryRecord {
            id: format!("{}:profile", profile.user_id),
            vector,
            metadata: MemoryMetadata {
                user_id: profile.user_id.clone(),
                chat_id: None,
                turn_id: None,
                role: Role::Profile,
                seq: None,
                created_at: profile.updated_at.timestamp_millis(),
                has_artifact: false,
                artifact_url: None,
                kind: RecordKind::Profile,
                content: text,
            },
        };
        if let Err(e) = vector_store.upsert(&[record]).await {
            warn!(user_id = %profile.user_id, error = %e, "profile upsert into C4 failed");
        }
    }
}

fn apply_extraction(
    profile: &mut UserProfile,
    extracted: &ProfileExtraction,
    max_interests: usize,
    liveness: Option<&SessionStore>,
) {
    let user_id = profile.user_id.clone();
    if let Some(field) = &extracted.display_name {
        apply_scalar(
            &mut profile.display_name,
            &mut profile.field_provenance,
            "display_name",
            field,
            &user_id,
            liveness,
        );
    }
    if let Some(field) = &extracted.role {
        apply_scalar(
            &mut profile.role,
            &mut profile.field_provenance,
            "role",
            field,
            &user_id,
            liveness,
        );
    }
    if let Some(field) = &extracted.background {
        apply_scalar(
            &mut profile.background,
            &mut profile.field_provenance,
            "background",
            field,
            &user_id,
            liveness,
        );
    }
    for field in &extracted.interests {
        let prov_key = format!("interests:{}", field.value);
        let existing_conf = existing_confidence(&profile.field_provenance, &prov_key, &user_id, liveness);
        if field.confidence >= existing_conf {
            profile.interests.insert(field.value.clone());
            profile.field_provenance.insert(
                prov_key,
                FieldProvenance {
                    turn_id: field.turn_id.clone(),
                    chat_id: field.chat_id.clone(),
                    confidence: field.confidence,
                },
            );
        }
    }
    while profile.interests.len() > max_interests {
        // Evict the interest with the oldest provenance confidence on file;
        // deterministic enough for the union-with-cap rule without keeping
        // a separate insertion-order log.
        let weakest = profile
            .interests
            .iter()
            .min_by(|a, b| {
                let ca = profile
                    .field_provenance
                    .get(&format!("interests:{a}"))
                    .map(|p| p.confidence)
                    .unwrap_or(0.0);
                let cb = profile
                    .field_provenance
                    .get(&format!("interests:{b}"))
                    .map(|p| p.confidence)
                    .unwrap_or(0.0);
                ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned();
        match weakest {
            Some(w) => {
                profile.interests.remove(&w);
                profile.field_provenance.remove(&format!("interests:{w}"));
            }
            None => break,
        }
    }
    for (key, field) in &extracted.preferences {
        let prov_key = format!("preferences:{key}");
        let existing_conf = existing_confidence(&profile.field_provenance, &prov_key, &user_id, liveness);
        if field.confidence >= existing_conf {
            profile.preferences.insert(key.clone(), field.value.clone());
            profile.field_provenance.insert(
                prov_key,
                FieldProvenance {
                    turn_id: field.turn_id.clone(),
                    chat_id: field.chat_id.clone(),
                    confidence: field.confidence,
                },
            );
        }
    }
}

/// The confidence a new field must meet or beat to overwrite `key`'s current
/// value (spec §4.3). If C1 is wired in and the existing field's evidence
/// turn no longer exists there, the field is treated as having no prior
/// confidence at all — any extraction, however weak, may overwrite it.
fn existing_confidence(
    provenance: &HashMap<String, FieldProvenance>,
    key: &str,
    user_id: &str,
    liveness: Option<&SessionStore>,
) -> f64 {
    let Some(existing) = provenance.get(key) else {
        return f64::MIN;
    };
    let evidence_alive = liveness
        .map(|session| session.turn_exists(user_id, &existing.chat_id, &existing.turn_id))
        .unwrap_or(true);
    if evidence_alive {
        existing.confidence
    } else {
        f64::MIN
    }
}

fn apply_scalar(
    slot: &mut Option<String>,
    provenance: &mut HashMap<String, FieldProvenance>,
    name: &str,
    field: &mcos_core::types::ExtractedField<String>,
    user_id: &str,
    liveness: Option<&SessionStore>,
) {
    let existing_conf = existing_confidence(provenance, name, user_id, liveness);
    if field.confidence >= existing_conf {
        *slot = Some(field.value.clone());
        provenance.insert(
            name.to_string(),
            FieldProvenance {
                turn_id: field.turn_id.clone(),
                chat_id: field.chat_id.clone(),
                confidence: field.confidence,
            },
        );
    }
}

/// Render a profile into the text that gets embedded for C4 retrieval.
fn render_profile(profile: &UserProfile) -> String {
    let mut out = String::new();
    if let Some(name) = &profile.display_name {
        out.push_str(&format!("Name: {name}\n"));
    }
    if let Some(role) = &profile.role {
        out.push_str(&format!("Role: {role}\n"));
    }
    if !profile.interests.is_empty() {
        let mut interests: Vec<&String> = profile.interests.iter().collect();
        interests.sort();
        out.push_str(&format!(
            "Interests: {}\n",
            interests
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if !profile.preferences.is_empty() {
        let mut prefs: Vec<(&String, &String)> = profile.preferences.iter().collect();
        prefs.sort_by_key(|(k, _)| k.as_str());
        for (k, v) in prefs {
            out.push_str(&format!("Preference ({k}): {v}\n"));
        }
    }
    if let Some(bg) = &profile.background {
        out.push_str(&format!("Background: {bg}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcos_core::types::ExtractedField;

    struct InMemoryDocStore {
        rows: std::sync::Mutex<std::collections::HashMap<String, mcos_core::adapters::ProfileDocRow>>,
    }

    impl InMemoryDocStore {
        fn new() -> Self {
            Self {
                rows: std::sync::Mutex::new(std::collections::HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ProfileDocStore for InMemoryDocStore {
        async fn read(&self, user_id: &str) -> mcos_core::error::Result<Option<mcos_core::adapters::ProfileDocRow>> {
            Ok(self.rows.lock().unwrap().get(user_id).cloned())
        }

        async fn write(
            &self,
            user_id: &str,
            profile_json: &str,
            expected_updated_at: Option<i64>,
        ) -> mcos_core::error::Result<()> {
            let mut rows = self.rows.lock().unwrap();
            let current = rows.get(user_id).map(|r| r.updated_at);
            if current != expected_updated_at {
                return Err(mcos_core::McosError::StaleWrite {
                    user_id: user_id.to_string(),
                });
            }
            rows.insert(
                user_id.to_string(),
                mcos_core::adapters::ProfileDocRow {
                    profile_json: profile_json.to_string(),
                    updated_at: expected_updated_at.unwrap_or(0) + 1,
                },
            );
            Ok(())
        }

        async fn delete(&self, user_id: &str) -> mcos_core::error::Result<()> {
            self.rows.lock().unwrap().remove(user_id);
            Ok(())
        }
    }

    fn field(value: &str, confidence: f64) -> ExtractedField<String> {
        ExtractedField {
            value: value.to_string(),
            confidence,
            turn_id: "t1".into(),
            chat_id: "c1".into(),
        }
    }

    #[tokio::test]
    async fn get_returns_empty_profile_when_unset() {
        let store = ProfileStore::new(Arc::new(InMemoryDocStore::new()));
        let profile = store.get("u1").await.unwrap();
        assert!(profile.is_empty());
    }

    #[tokio::test]
    async fn merge_overwrites_on_higher_confidence() {
        let store = ProfileStore::new(Arc::new(InMemoryDocStore::new()));
        let mut extraction = ProfileExtraction::default();
        extraction.display_name = Some(field("Ada", 0.6));
        store.merge("u1", extraction).await.unwrap();

        let mut extraction2 = ProfileExtraction::default();
        extraction2.display_name = Some(field("Ada Lovelace", 0.9));
        let profile = store.merge("u1", extraction2).await.unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ada Lovelace"));
    }

    #[tokio::test]
    async fn merge_rejects_lower_confidence_overwrite() {
        let store = ProfileStore::new(Arc::new(InMemoryDocStore::new()));
        let mut extraction = ProfileExtraction::default();
        extraction.display_name = Some(field("Ada", 0.9));
        store.merge("u1", extraction).await.unwrap();

        let mut extraction2 = ProfileExtraction::default();
        extraction2.display_name = Some(field("Someone Else", 0.2));
        let profile = store.merge("u1", extraction2).await.unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn merge_allows_lower_confidence_once_evidence_turn_is_deleted() {
        let session = Arc::new(mcos_session::SessionStore::new(200));
        session
            .append(
                "u1",
                "c1",
                mcos_core::types::Turn {
                    id: "t1".into(),
                    user_id: "u1".into(),
                    chat_id: "c1".into(),
                    seq: 0,
                    created_at: 0,
                    user_text: "my name is Ada".into(),
                    assistant_text: "noted".into(),
                    artifacts: vec![],
                    derived_summary: None,
                },
                Utc::now(),
            )
            .unwrap();

        let store = ProfileStore::new(Arc::new(InMemoryDocStore::new())).with_turn_liveness(session.clone());

        let mut extraction = ProfileExtraction::default();
        extraction.display_name = Some(field("Ada", 0.9)); // turn_id "t1", chat_id "c1"
        store.merge("u1", extraction).await.unwrap();

        // While the evidence turn is still live, a weaker extraction is rejected.
        let mut extraction2 = ProfileExtraction::default();
        extraction2.display_name = Some(field("Someone Else", 0.2));
        let profile = store.merge("u1", extraction2.clone()).await.unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ada"));

        // Once the backing turn is deleted (e.g. via DeleteChat), the same
        // weaker extraction is allowed to override the orphaned value.
        session.purge("u1", Some("c1")).unwrap();
        let profile = store.merge("u1", extraction2).await.unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Someone Else"));
    }

    #[tokio::test]
    async fn merge_unions_interests_up_to_cap() {
        let store = ProfileStore::new(Arc::new(InMemoryDocStore::new()));
        for i in 0..60 {
            let mut extraction = ProfileExtraction::default();
            extraction.interests.push(field(&format!("interest-{i}"), 0.5 + (i as f64) / 1000.0));
            store.merge("u1", extraction).await.unwrap();
        }
        let profile = store.get("u1").await.unwrap();
        assert_eq!(profile.interests.len(), MAX_INTERESTS);
    }

    #[tokio::test]
    async fn delete_removes_profile() {
        let store = ProfileStore::new(Arc::new(InMemoryDocStore::new()));
        let mut extraction = ProfileExtraction::default();
        extraction.display_name = Some(field("Ada", 0.9));
        store.merge("u1", extraction).await.unwrap();
        store.delete("u1").await.unwrap();
        assert!(store.get("u1").await.unwrap().is_empty());
    }
}
