use serde::{Deserialize, Serialize};

use super::{Item, OutputModalities};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Cancelled,
    Failed,
    Incomplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(default)]
    pub object: Option<String>,
    pub status: ResponseStatus,
    #[serde(default)]
    pub status_details: Option<ResponseStatusDetails>,
    #[serde(default)]
    pub output: Option<Vec<Item>>,
    #[serde(default)]
    pub output_modalities: Option<OutputModalities>,
}

impl Response {
    #[must_use]
    pub fn new(id: impl Into<String>, status: ResponseStatus) -> Self {
        Self {
            id: id.into(),
            object: Some("realtime.response".to_string()),
            status,
            status_details: None,
            output: None,
            output_modalities: None,
        }
    }

    /// True when every output item is a function call, i.e. nothing was spoken.
    #[must_use]
    pub fn is_tool_only(&self) -> bool {
        self.output
            .as_deref()
            .is_some_and(|items| !items.is_empty() && items.iter().all(Item::is_function_call))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseStatusDetails {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub error: Option<crate::error::ServerError>,
}
