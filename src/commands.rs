//! Host-facing commands. Errors leave here as [`Notice`] values the screen
//! layer can show directly.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    bridge::{Bridge, BridgeCollaborators, BridgeOptions, RenderSession},
    capabilities::ViewerEvent,
    db::{DocumentSummary, Highlight},
    error::{Notice, ViewerError},
    export::{prepare_export, ExportBatch},
    resolver::DocumentReference,
    server::VIEWER_ENTRY,
    settings::ViewerSettings,
    AppState,
};

/// Channels handed to the embedding surface for one open document.
pub struct SessionHandle {
    pub session_id: String,
    /// Page the renderer surface should load.
    pub viewer_url: String,
    /// Raw messages posted by the renderer go in here.
    pub inbound: mpsc::Sender<String>,
    /// Commands to inject into the renderer come out here.
    pub outbound: mpsc::Receiver<String>,
    pub events: mpsc::UnboundedReceiver<ViewerEvent>,
}

pub async fn open_document(
    state: &AppState,
    reference: DocumentReference,
    document_id: Option<String>,
) -> Result<SessionHandle, Notice> {
    let base_url = state.serving.start_server().await.map_err(Notice::from)?;
    let settings = state.settings.current();
    let capacity = settings.inbound_queue_capacity.max(1);

    let session_id = Uuid::new_v4().to_string();
    let (wire_tx, wire_rx) = mpsc::channel(capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let bridge = Bridge::new(
        RenderSession::new(session_id.clone(), document_id),
        wire_tx,
        BridgeCollaborators {
            store: Arc::clone(&state.store),
            clipboard: Arc::clone(&state.clipboard),
            events: Arc::new(events_tx),
        },
        BridgeOptions::from(&settings),
    );
    bridge.begin().await;

    if let Err(err) = bridge
        .load_document(reference, &state.resolver, Some(state.serving.as_ref()))
        .await
    {
        warn!("session {session_id}: could not prepare document: {err}");
        bridge.close().await;
        state.serving.unstage(&session_id).await;
        return Err(err.into());
    }

    let runner = bridge.clone();
    let registry = Arc::clone(&state.sessions);
    let serving = Arc::clone(&state.serving);
    state.sessions.lock().await.insert(session_id.clone(), bridge);
    tokio::spawn(async move {
        runner.clone().run(inbound_rx).await;
        // Fatal renderer error, explicit close or the view dropping its sender.
        runner.close().await;
        registry.lock().await.remove(runner.session_id());
        serving.unstage(runner.session_id()).await;
        debug!("session {} deregistered", runner.session_id());
    });
    info!("Opened session {session_id}");

    Ok(SessionHandle {
        session_id,
        viewer_url: format!("{base_url}/{VIEWER_ENTRY}"),
        inbound: inbound_tx,
        outbound: wire_rx,
        events: events_rx,
    })
}

pub async fn close_document(state: &AppState, session_id: &str) -> Result<(), Notice> {
    let bridge = state
        .sessions
        .lock()
        .await
        .remove(session_id)
        .ok_or_else(|| ViewerError::SessionNotFound(session_id.to_string()))?;
    bridge.close().await;
    state.serving.unstage(session_id).await;
    Ok(())
}

pub async fn get_session(state: &AppState, session_id: &str) -> Result<RenderSession, Notice> {
    let bridge = state
        .sessions
        .lock()
        .await
        .get(session_id)
        .cloned()
        .ok_or_else(|| ViewerError::SessionNotFound(session_id.to_string()))?;
    Ok(bridge.snapshot().await)
}

pub async fn get_highlights(state: &AppState, document_id: &str) -> Result<Vec<Highlight>, Notice> {
    state
        .store
        .list_by_document(document_id)
        .await
        .map_err(Notice::from)
}

pub async fn list_documents(state: &AppState) -> Result<Vec<DocumentSummary>, Notice> {
    state.store.list_documents().await.map_err(Notice::from)
}

pub async fn export_highlights(state: &AppState, document_id: &str) -> Result<ExportBatch, Notice> {
    prepare_export(state.identity.as_ref(), &state.store, document_id)
        .await
        .map_err(Notice::from)
}

pub async fn server_base_url(state: &AppState) -> Option<String> {
    state.serving.base_url().await
}

pub fn get_settings(state: &AppState) -> ViewerSettings {
    state.settings.current()
}

/// Persists new settings. They apply to sessions opened afterwards; a port
/// change takes effect on the next server restart.
pub fn update_settings(state: &AppState, settings: ViewerSettings) -> Result<(), Notice> {
    state
        .settings
        .update(settings)
        .map_err(|err| Notice::from(ViewerError::Storage(err)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        capabilities::{MemoryClipboard, StaticIdentity, UserContext},
        db::AnnotationStore,
        resolver::{ProviderDirectories, Resolver},
        server::{BundleDir, ServingConfig, ServingContext},
        settings::SettingsStore,
    };

    async fn app_state(dir: &std::path::Path) -> AppState {
        let store = Arc::new(AnnotationStore::new(dir.join("Inscribe.db")));
        store.open().await.unwrap();
        let serving = Arc::new(ServingContext::new(
            ServingConfig {
                primary_root: dir.join("cache/www"),
                fallback_root: dir.join("data/www"),
                preferred_port: 0,
            },
            Arc::new(BundleDir::new(dir.join("bundle"))),
        ));
        let identity = Arc::new(StaticIdentity::new(Some(UserContext {
            user_id: "7".into(),
            email: None,
            name: None,
        })));

        let settings = SettingsStore::new(dir.join("settings.json")).unwrap();
        settings
            .update(ViewerSettings {
                redelivery_delay_ms: 60_000,
                ..ViewerSettings::default()
            })
            .unwrap();

        AppState::new(
            settings,
            serving,
            store,
            Resolver::with_providers(ProviderDirectories::new()),
            identity,
            Arc::new(MemoryClipboard::new()),
        )
    }

    async fn next_event(handle: &mut SessionHandle) -> ViewerEvent {
        tokio::time::timeout(Duration::from_secs(5), handle.events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn open_annotate_export_close() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path()).await;
        let document = dir.path().join("essay.pdf");
        std::fs::write(&document, b"%PDF-1.4").unwrap();

        let mut handle = open_document(
            &state,
            DocumentReference::LocalPath(document.display().to_string()),
            Some("essay.pdf".into()),
        )
        .await
        .unwrap();
        let base_url = server_base_url(&state).await.unwrap();
        assert_eq!(handle.viewer_url, format!("{base_url}/viewer.html"));
        assert!(handle.outbound.try_recv().is_err());

        handle.inbound.send(r#"{"type":"HTML_READY"}"#.into()).await.unwrap();
        let command = tokio::time::timeout(Duration::from_secs(5), handle.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(command.starts_with(r#"{"type":"LOAD_PDF","source":{"uri":"http://127.0.0.1:"#));
        assert!(command.contains("/docs/"));
        assert!(matches!(next_event(&mut handle).await, ViewerEvent::RendererReady { .. }));

        handle
            .inbound
            .send(r#"{"type":"ADD_TO_DOCS","text":"a line","page":3}"#.into())
            .await
            .unwrap();
        assert!(matches!(next_event(&mut handle).await, ViewerEvent::HighlightSaved { .. }));

        let highlights = get_highlights(&state, "essay.pdf").await.unwrap();
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].text, "P[3]: a line");
        assert_eq!(list_documents(&state).await.unwrap().len(), 1);

        let batch = export_highlights(&state, "essay.pdf").await.unwrap();
        assert_eq!(batch.user_id, "7");
        assert_eq!(batch.highlights, highlights);

        assert_eq!(get_session(&state, &handle.session_id).await.unwrap().current_page, 3);
        close_document(&state, &handle.session_id).await.unwrap();
        assert!(matches!(next_event(&mut handle).await, ViewerEvent::SessionClosed { .. }));
        let notice = close_document(&state, &handle.session_id).await.unwrap_err();
        assert_eq!(notice.kind, "session_not_found");

        state.shutdown().await;
        assert_eq!(server_base_url(&state).await, None);
    }

    fn staged_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir.join("cache/www/docs"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    async fn wait_until_deregistered(state: &AppState, session_id: &str) {
        for _ in 0..200 {
            if !state.sessions.lock().await.contains_key(session_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {session_id} still registered");
    }

    #[tokio::test]
    async fn fatal_renderer_error_ends_and_deregisters_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path()).await;
        let document = dir.path().join("essay.pdf");
        std::fs::write(&document, b"%PDF-1.4").unwrap();

        let mut handle = open_document(
            &state,
            DocumentReference::LocalPath(document.display().to_string()),
            Some("essay.pdf".into()),
        )
        .await
        .unwrap();
        assert_eq!(staged_files(dir.path()), 1);

        handle
            .inbound
            .send(r#"{"type":"ERROR","message":"boom","fatal":true}"#.into())
            .await
            .unwrap();
        let notice = next_event(&mut handle).await;
        assert!(matches!(notice, ViewerEvent::Notice { .. }));
        assert!(matches!(next_event(&mut handle).await, ViewerEvent::SessionClosed { .. }));

        wait_until_deregistered(&state, &handle.session_id).await;
        let err = get_session(&state, &handle.session_id).await.unwrap_err();
        assert_eq!(err.kind, "session_not_found");
        assert_eq!(staged_files(dir.path()), 0);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn dropped_view_deregisters_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path()).await;

        let handle = open_document(
            &state,
            DocumentReference::RemoteUri("https://example.com/a.pdf".into()),
            None,
        )
        .await
        .unwrap();
        let session_id = handle.session_id.clone();
        drop(handle);

        wait_until_deregistered(&state, &session_id).await;
        state.shutdown().await;
    }

    #[tokio::test]
    async fn closing_removes_staged_copies() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path()).await;
        let document = dir.path().join("essay.pdf");
        std::fs::write(&document, b"%PDF-1.4").unwrap();

        for _ in 0..3 {
            let handle = open_document(
                &state,
                DocumentReference::LocalPath(document.display().to_string()),
                Some("essay.pdf".into()),
            )
            .await
            .unwrap();
            assert_eq!(staged_files(dir.path()), 1);
            close_document(&state, &handle.session_id).await.unwrap();
            assert_eq!(staged_files(dir.path()), 0);
        }

        assert!(state.sessions.lock().await.is_empty());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn unresolvable_reference_is_reported_as_notice() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path()).await;

        let result = open_document(
            &state,
            DocumentReference::ContentHandle("content://provider/missing".into()),
            None,
        )
        .await;

        let notice = result.err().unwrap();
        assert_eq!(notice.kind, "unresolvable_reference");
        assert!(state.sessions.lock().await.is_empty());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn settings_round_trip_through_commands() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path()).await;

        let mut settings = get_settings(&state);
        assert_eq!(settings.redelivery_delay_ms, 60_000);
        settings.serve_local_documents = false;
        update_settings(&state, settings).unwrap();

        assert!(!get_settings(&state).serve_local_documents);
        let on_disk = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
        assert!(on_disk.contains(r#""serveLocalDocuments": false"#));
    }

    #[tokio::test]
    async fn export_without_login_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = app_state(dir.path()).await;
        state.identity = Arc::new(StaticIdentity::default());

        let notice = export_highlights(&state, "essay.pdf").await.unwrap_err();
        assert_eq!(notice.kind, "not_authenticated");
    }
}
