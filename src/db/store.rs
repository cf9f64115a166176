//! Durable ledger of per-document highlights.
//!
//! The store starts closed; `open` spins up the SQLite worker and every other
//! operation reports [`ViewerError::StoreUnavailable`] until it has run.

use std::path::PathBuf;

use log::info;
use tokio::sync::RwLock;

use crate::error::{ViewerError, ViewerResult};

use super::{models::format_highlight_text, Database, DocumentSummary, Highlight};

pub struct AnnotationStore {
    path: PathBuf,
    db: RwLock<Option<Database>>,
}

impl AnnotationStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            db: RwLock::new(None),
        }
    }

    /// Opens or creates the backing file. Calling it again is a no-op.
    pub async fn open(&self) -> ViewerResult<()> {
        let mut guard = self.db.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let path = self.path.clone();
        let database = tokio::task::spawn_blocking(move || Database::new(path))
            .await
            .map_err(|err| ViewerError::Storage(anyhow::anyhow!("database open task failed: {err}")))?
            .map_err(ViewerError::Storage)?;

        info!("Annotation store open at {}", self.path.display());
        *guard = Some(database);
        Ok(())
    }

    pub async fn is_open(&self) -> bool {
        self.db.read().await.is_some()
    }

    pub async fn ensure_schema(&self) -> ViewerResult<()> {
        self.database()
            .await?
            .ensure_schema()
            .await
            .map_err(ViewerError::Storage)
    }

    /// Persists `text` as-is. Use [`AnnotationStore::annotate`] for the
    /// page-prefixed form produced from a selection.
    pub async fn insert(
        &self,
        document_id: &str,
        page: u32,
        text: &str,
    ) -> ViewerResult<Highlight> {
        self.database()
            .await?
            .insert_highlight(document_id.to_string(), page, text.to_string())
            .await
            .map_err(ViewerError::Storage)
    }

    /// Formats a raw selection as `P[<page>]: <text>` and inserts it.
    pub async fn annotate(
        &self,
        document_id: &str,
        page: u32,
        selection: &str,
    ) -> ViewerResult<Highlight> {
        if selection.trim().is_empty() {
            return Err(ViewerError::Storage(anyhow::anyhow!(
                "highlight text must not be empty"
            )));
        }
        self.insert(document_id, page, &format_highlight_text(page, selection))
            .await
    }

    pub async fn list_by_document(&self, document_id: &str) -> ViewerResult<Vec<Highlight>> {
        self.database()
            .await?
            .get_highlights_for_document(document_id)
            .await
            .map_err(ViewerError::Storage)
    }

    pub async fn count_by_document(&self, document_id: &str) -> ViewerResult<u32> {
        self.database()
            .await?
            .count_highlights_for_document(document_id)
            .await
            .map_err(ViewerError::Storage)
    }

    pub async fn list_documents(&self) -> ViewerResult<Vec<DocumentSummary>> {
        self.database()
            .await?
            .list_annotated_documents()
            .await
            .map_err(ViewerError::Storage)
    }

    async fn database(&self) -> ViewerResult<Database> {
        self.db
            .read()
            .await
            .clone()
            .ok_or(ViewerError::StoreUnavailable)
    }
}
