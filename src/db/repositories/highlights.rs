use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{params, Row};

use crate::db::{
    helpers::{format_timestamp, parse_datetime, to_u32},
    models::{DocumentSummary, Highlight},
    Database,
};

fn row_to_highlight(row: &Row) -> Result<Highlight> {
    let timestamp: String = row.get("timestamp")?;

    Ok(Highlight {
        id: row.get("id")?,
        document_id: row.get("pdf_id")?,
        page: to_u32(row.get("page")?, "page")?,
        text: row.get("text")?,
        created_at: parse_datetime(&timestamp, "timestamp")?,
    })
}

impl Database {
    /// Insert a highlight and return the stored row.
    /// `text` is stored verbatim; formatting happens upstream.
    pub async fn insert_highlight(
        &self,
        document_id: String,
        page: u32,
        text: String,
    ) -> Result<Highlight> {
        if page == 0 {
            return Err(anyhow!("highlight page must be at least 1"));
        }
        if text.trim().is_empty() {
            return Err(anyhow!("highlight text must not be empty"));
        }

        self.execute(move |conn| {
            let created_at = Utc::now();

            conn.execute(
                "INSERT INTO highlights (pdf_id, page, text, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![document_id, page, text, format_timestamp(created_at)],
            )?;

            let highlight_id = conn.last_insert_rowid();

            let mut stmt = conn.prepare(
                "SELECT id, pdf_id, page, text, timestamp
                 FROM highlights
                 WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![highlight_id])?;
            let highlight = match rows.next()? {
                Some(row) => row_to_highlight(row)?,
                None => return Err(anyhow!("Highlight not found after insert")),
            };

            Ok(highlight)
        })
        .await
    }

    /// All highlights for one document, oldest first.
    pub async fn get_highlights_for_document(&self, document_id: &str) -> Result<Vec<Highlight>> {
        let document_id = document_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, pdf_id, page, text, timestamp
                 FROM highlights
                 WHERE pdf_id = ?1
                 ORDER BY timestamp ASC, id ASC",
            )?;

            let mut rows = stmt.query(params![document_id])?;
            let mut highlights = Vec::new();
            while let Some(row) = rows.next()? {
                highlights.push(row_to_highlight(row)?);
            }

            Ok(highlights)
        })
        .await
    }

    pub async fn count_highlights_for_document(&self, document_id: &str) -> Result<u32> {
        let document_id = document_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM highlights WHERE pdf_id = ?1",
                params![document_id],
                |row| row.get(0),
            )?;
            to_u32(count, "count")
        })
        .await
    }

    /// Documents that have at least one highlight, most recently annotated first.
    pub async fn list_annotated_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT pdf_id, COUNT(*) AS highlight_count, MAX(timestamp) AS last_at
                 FROM highlights
                 GROUP BY pdf_id
                 ORDER BY last_at DESC",
            )?;

            let mut rows = stmt.query([])?;
            let mut summaries = Vec::new();
            while let Some(row) = rows.next()? {
                let last_at: String = row.get("last_at")?;
                summaries.push(DocumentSummary {
                    document_id: row.get("pdf_id")?,
                    highlight_count: to_u32(row.get("highlight_count")?, "highlight_count")?,
                    last_highlighted_at: parse_datetime(&last_at, "timestamp")?,
                });
            }

            Ok(summaries)
        })
        .await
    }
}
