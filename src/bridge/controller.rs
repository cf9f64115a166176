use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    capabilities::{Clipboard, ViewerEvent, ViewerEventSink},
    db::AnnotationStore,
    error::{ViewerError, ViewerResult},
    resolver::{with_file_scheme, DocumentReference, FetchTarget, Resolver},
    server::ServingContext,
    settings::ViewerSettings,
};

use super::{
    messages::{InboundEvent, LoadSource, OutboundCommand},
    session::{BridgeState, RenderSession},
};

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Delay before the single re-delivery of a load command that is still
    /// waiting on the handshake.
    pub redelivery_delay: Duration,
    pub serve_local_documents: bool,
}

impl From<&ViewerSettings> for BridgeOptions {
    fn from(settings: &ViewerSettings) -> Self {
        Self {
            redelivery_delay: settings.redelivery_delay(),
            serve_local_documents: settings.serve_local_documents,
        }
    }
}

#[derive(Clone)]
pub struct BridgeCollaborators {
    pub store: Arc<AnnotationStore>,
    pub clipboard: Arc<dyn Clipboard>,
    pub events: Arc<dyn ViewerEventSink>,
}

/// Owns the handshake and message routing for one render session.
///
/// Inbound messages are handled one at a time by [`Bridge::run`]; outbound
/// commands go to `wire`, which the embedding surface injects into the
/// renderer.
#[derive(Clone)]
pub struct Bridge {
    session_id: String,
    session: Arc<Mutex<RenderSession>>,
    wire: mpsc::Sender<String>,
    collaborators: BridgeCollaborators,
    options: BridgeOptions,
    redelivery: Arc<Mutex<Option<JoinHandle<()>>>>,
    cancel: CancellationToken,
}

impl Bridge {
    pub fn new(
        session: RenderSession,
        wire: mpsc::Sender<String>,
        collaborators: BridgeCollaborators,
        options: BridgeOptions,
    ) -> Self {
        Self {
            session_id: session.session_id.clone(),
            session: Arc::new(Mutex::new(session)),
            wire,
            collaborators,
            options,
            redelivery: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn snapshot(&self) -> RenderSession {
        self.session.lock().await.clone()
    }

    pub async fn state(&self) -> BridgeState {
        self.session.lock().await.state
    }

    /// The renderer page has been pointed at the viewer entry.
    pub async fn begin(&self) {
        self.session.lock().await.begin_loading();
    }

    /// Resolve `reference`, turn it into a load source and send (or queue)
    /// the `LOAD_PDF` command.
    pub async fn load_document(
        &self,
        reference: DocumentReference,
        resolver: &Resolver,
        serving: Option<&ServingContext>,
    ) -> ViewerResult<LoadSource> {
        let target = resolver.resolve(reference).await?;
        let source = self.load_source_for(target, serving).await?;
        self.send_command(OutboundCommand::LoadPdf {
            source: source.clone(),
        })
        .await?;
        Ok(source)
    }

    async fn load_source_for(
        &self,
        target: FetchTarget,
        serving: Option<&ServingContext>,
    ) -> ViewerResult<LoadSource> {
        let local_file = target.local_file();
        match target {
            FetchTarget::InlineBytes(payload) => Ok(LoadSource::Base64(payload)),
            FetchTarget::RemoteUri(uri) => Ok(LoadSource::Uri(uri)),
            FetchTarget::LocalPath(path) => {
                if let (true, Some(serving), Some(file)) =
                    (self.options.serve_local_documents, serving, local_file)
                {
                    if serving.is_running().await {
                        let url = serving.stage_document(&file, &self.session_id).await?;
                        return Ok(LoadSource::Uri(url));
                    }
                    warn!("local server not running; handing renderer a file URI");
                }
                Ok(LoadSource::Uri(with_file_scheme(&path)))
            }
        }
    }

    /// Send now when the renderer is ready, otherwise hold the command and arm
    /// the one-shot redelivery timer.
    pub async fn send_command(&self, command: OutboundCommand) -> ViewerResult<()> {
        let payload = command.encode()?;
        let released = {
            let mut session = self.session.lock().await;
            if session.is_closed() {
                return Err(ViewerError::SessionClosed(self.session_id.clone()));
            }
            session.queue_or_release(payload)
        };

        match released {
            Some(payload) => self.deliver(payload).await,
            None => {
                debug!("session {} not ready; load command queued", self.session_id);
                self.schedule_redelivery().await;
                Ok(())
            }
        }
    }

    async fn deliver(&self, payload: String) -> ViewerResult<()> {
        self.wire
            .send(payload)
            .await
            .map_err(|_| ViewerError::SessionClosed(self.session_id.clone()))
    }

    async fn schedule_redelivery(&self) {
        let mut guard = self.redelivery.lock().await;
        if guard.is_some() {
            return;
        }

        let session = Arc::clone(&self.session);
        let wire = self.wire.clone();
        let cancel = self.cancel.clone();
        let delay = self.options.redelivery_delay;
        let session_id = self.session_id.clone();

        *guard = Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = time::sleep(delay) => {
                    let payload = session.lock().await.pending_for_redelivery();
                    if let Some(payload) = payload {
                        info!("session {session_id}: no handshake after {delay:?}, re-sending load");
                        if wire.send(payload).await.is_err() {
                            warn!("session {session_id}: wire closed before redelivery");
                        }
                    }
                }
            }
        }));
    }

    async fn cancel_redelivery(&self) {
        if let Some(handle) = self.redelivery.lock().await.as_ref() {
            handle.abort();
        }
    }

    /// Process one inbound record to completion. Malformed records are
    /// dropped; only store and context failures come back as errors.
    pub async fn handle_message(&self, raw: &str) -> ViewerResult<()> {
        let event = InboundEvent::decode(raw);

        if self.session.lock().await.is_closed() {
            debug!("session {} closed; ignoring {}", self.session_id, event.tag());
            return Ok(());
        }

        match event {
            InboundEvent::Ready | InboundEvent::HtmlReady => self.on_ready().await,
            InboundEvent::LoadComplete { total_pages } => {
                self.session.lock().await.record_load_complete(total_pages);
                self.emit(ViewerEvent::LoadComplete {
                    session_id: self.session_id.clone(),
                    total_pages,
                });
                Ok(())
            }
            InboundEvent::SelectionChanged { text, page } => {
                let selection = {
                    let mut session = self.session.lock().await;
                    session.update_selection(&text, page);
                    session.selection.clone()
                };
                self.emit(ViewerEvent::SelectionChanged {
                    session_id: self.session_id.clone(),
                    show_highlight_action: selection.is_some(),
                    selection,
                });
                Ok(())
            }
            InboundEvent::PageChanged { page } => {
                let current_page = {
                    let mut session = self.session.lock().await;
                    session.set_page(page);
                    session.current_page
                };
                self.emit(ViewerEvent::PageChanged {
                    session_id: self.session_id.clone(),
                    current_page,
                });
                Ok(())
            }
            InboundEvent::CopyText { text } => {
                match self.collaborators.clipboard.set_text(&text) {
                    Ok(()) => self.emit(ViewerEvent::TextCopied {
                        session_id: self.session_id.clone(),
                    }),
                    Err(err) => warn!("clipboard write failed: {err:#}"),
                }
                Ok(())
            }
            InboundEvent::AddToDocs { text, page } => self.on_add_to_docs(&text, page).await,
            InboundEvent::Error { message, fatal } => self.on_renderer_error(message, fatal).await,
            InboundEvent::Debug { message } => {
                debug!("[renderer {}] {message}", self.session_id);
                Ok(())
            }
            InboundEvent::Unparsed { reason } => {
                warn!(
                    "{}",
                    ViewerError::BridgeParse(format!("session {}: {reason}", self.session_id))
                );
                Ok(())
            }
        }
    }

    async fn on_ready(&self) -> ViewerResult<()> {
        let released = {
            let mut session = self.session.lock().await;
            if session.state == BridgeState::Ready {
                debug!("session {}: duplicate handshake ignored", self.session_id);
                return Ok(());
            }
            session.mark_ready()
        };

        self.cancel_redelivery().await;
        info!("session {}: renderer ready", self.session_id);
        self.emit(ViewerEvent::RendererReady {
            session_id: self.session_id.clone(),
        });

        match released {
            Some(payload) => self.deliver(payload).await,
            None => Ok(()),
        }
    }

    async fn on_add_to_docs(&self, text: &str, page: u32) -> ViewerResult<()> {
        let document_id = {
            let mut session = self.session.lock().await;
            session.set_page(page);
            session.document_id.clone()
        };

        let Some(document_id) = document_id else {
            let err = ViewerError::MissingDocumentContext;
            self.notify(&err);
            return Err(err);
        };

        if page == 0 || text.trim().is_empty() {
            warn!(
                "{}",
                ViewerError::BridgeParse(format!("ADD_TO_DOCS with page {page} and empty-or-blank text"))
            );
            return Ok(());
        }

        match self
            .collaborators
            .store
            .annotate(&document_id, page, text)
            .await
        {
            Ok(highlight) => {
                info!("Highlight {} saved for {document_id}", highlight.id);
                self.emit(ViewerEvent::HighlightSaved {
                    session_id: self.session_id.clone(),
                    highlight,
                });
                Ok(())
            }
            Err(err) => {
                self.notify(&err);
                Err(err)
            }
        }
    }

    async fn on_renderer_error(&self, message: String, fatal: bool) -> ViewerResult<()> {
        let err = ViewerError::RendererLoad(message);
        self.notify(&err);
        if !fatal {
            warn!("session {}: {err}", self.session_id);
            return Ok(());
        }

        self.close().await;
        Err(err)
    }

    /// Tear the session down: cancels the redelivery timer and ignores any
    /// further traffic.
    pub async fn close(&self) {
        let was_open = {
            let mut session = self.session.lock().await;
            let was_open = !session.is_closed();
            session.close();
            was_open
        };

        self.cancel.cancel();
        self.cancel_redelivery().await;

        if was_open {
            info!("session {} closed", self.session_id);
            self.emit(ViewerEvent::SessionClosed {
                session_id: self.session_id.clone(),
            });
        }
    }

    /// Drain `inbound` sequentially until the channel closes or the session
    /// is closed.
    pub async fn run(self, mut inbound: mpsc::Receiver<String>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                message = inbound.recv() => {
                    let Some(raw) = message else { break };
                    if let Err(err) = self.handle_message(&raw).await {
                        warn!("session {}: {err}", self.session_id);
                        if err.is_fatal() {
                            break;
                        }
                    }
                }
            }
        }
        debug!("session {} inbound loop finished", self.session_id);
    }

    fn emit(&self, event: ViewerEvent) {
        self.collaborators.events.emit(event);
    }

    fn notify(&self, err: &ViewerError) {
        self.emit(ViewerEvent::Notice {
            session_id: self.session_id.clone(),
            notice: err.notice(),
        });
    }
}
