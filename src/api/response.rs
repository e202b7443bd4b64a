use serde::{Deserialize, Serialize};

/// Result envelope returned by every fetch function.
///
/// A rejected future and `success: false` are treated the same way by
/// the query engine: the failure message is surfaced to the consumer
/// and previously cached data is preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl<T> ApiResponse<T> {
    /// A successful envelope carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            pagination: None,
            message: None,
        }
    }

    /// A failed envelope carrying only a message.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            pagination: None,
            message: Some(message.into()),
        }
    }

    /// The failure message, with a generic fallback when the envelope
    /// carries none.
    pub fn error_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "An error occurred".to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
