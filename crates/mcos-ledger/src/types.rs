use serde::{Deserialize, Serialize};

/// Composite key identifying one chat's ledger entry, mirroring C1's
/// `ChatKey` so the two components' striping is consistent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatKey {
    pub user_id: String,
    pub chat_id: String,
}

impl ChatKey {
    pub fn new(user_id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id: chat_id.into(),
        }
    }
}
