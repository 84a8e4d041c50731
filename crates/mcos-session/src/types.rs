use serde::{Deserialize, Serialize};

/// Composite key identifying one `ChatSession` in the striped store.
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

impl std::fmt::Display for ChatKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.chat_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_user_slash_chat() {
        let k = ChatKey::new("u-1", "c-1");
        assert_eq!(k.to_string(), "u-1/c-1");
    }
}
