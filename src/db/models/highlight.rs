//! Highlight data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted, page-tagged text annotation.
///
/// `text` already carries the `P[<page>]: ` prefix; rows are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub id: i64,
    pub document_id: String,
    pub page: u32,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Per-document rollup used by the quick-access list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub document_id: String,
    pub highlight_count: u32,
    pub last_highlighted_at: DateTime<Utc>,
}

pub fn format_highlight_text(page: u32, text: &str) -> String {
    format!("P[{page}]: {text}")
}
