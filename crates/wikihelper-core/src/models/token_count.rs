use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub prompt_tokens: u64,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub completion_tokens: u64,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Reported total, or the sum of the parts when the service left it out.
    pub fn total(&self) -> u64 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.prompt_tokens + self.completion_tokens
        }
    }
}
