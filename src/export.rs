//! Builds the batch the remote backend's export queue accepts. Sending it
//! is the caller's business.

use serde::Serialize;

use crate::{
    capabilities::IdentityProvider,
    db::{AnnotationStore, Highlight},
    error::{ViewerError, ViewerResult},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBatch {
    pub user_id: String,
    pub document_id: String,
    pub highlights: Vec<Highlight>,
}

impl ExportBatch {
    /// Request body for the export queue endpoint.
    pub fn request_body(&self) -> serde_json::Value {
        serde_json::json!({ "highlights": self.highlights })
    }
}

pub async fn prepare_export(
    identity: &dyn IdentityProvider,
    store: &AnnotationStore,
    document_id: &str,
) -> ViewerResult<ExportBatch> {
    let user = identity.current_user().ok_or(ViewerError::NotAuthenticated)?;
    let highlights = store.list_by_document(document_id).await?;

    Ok(ExportBatch {
        user_id: user.user_id,
        document_id: document_id.to_string(),
        highlights,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{StaticIdentity, UserContext};

    fn reader() -> StaticIdentity {
        StaticIdentity::new(Some(UserContext {
            user_id: "42".into(),
            email: Some("reader@example.com".into()),
            name: Some("Reader".into()),
        }))
    }

    #[tokio::test]
    async fn requires_logged_in_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnnotationStore::new(dir.path().join("Inscribe.db"));
        store.open().await.unwrap();

        let err = prepare_export(&StaticIdentity::default(), &store, "doc")
            .await
            .unwrap_err();
        assert!(matches!(err, ViewerError::NotAuthenticated));
    }

    #[tokio::test]
    async fn batch_carries_document_highlights_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnnotationStore::new(dir.path().join("Inscribe.db"));
        store.open().await.unwrap();
        store.annotate("doc", 2, "first").await.unwrap();
        store.annotate("other", 1, "skip").await.unwrap();
        store.annotate("doc", 1, "second").await.unwrap();

        let batch = prepare_export(&reader(), &store, "doc").await.unwrap();

        assert_eq!(batch.user_id, "42");
        let texts: Vec<_> = batch.highlights.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, ["P[2]: first", "P[1]: second"]);
        let body = batch.request_body();
        assert_eq!(body["highlights"].as_array().unwrap().len(), 2);
        assert_eq!(body["highlights"][0]["documentId"], "doc");
    }
}
