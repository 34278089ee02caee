use serde::{Deserialize, Serialize};

/// A knowledge-base segment the service cited while answering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub dataset_id: String,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub dataset_name: String,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub document_name: String,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub segment_id: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub content: String,
    #[serde(default)]
    pub position: Option<u32>,
}

impl Reference {
    /// `document: content`, the form shown under an answer.
    pub fn label(&self) -> String {
        if self.content.is_empty() {
            self.document_name.clone()
        } else {
            format!("{}: {}", self.document_name, self.content)
        }
    }
}
