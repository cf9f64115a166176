//! Turns whatever the screen layer handed us into something the renderer can load.
//!
//! Content handles are opaque and provider-specific, so resolution walks an
//! ordered list of [`PathStrategy`] implementations, then tries passing the
//! handle through, and finally inlines the raw bytes.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{ViewerError, ViewerResult};

pub const FILE_SCHEME: &str = "file://";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentReference {
    LocalPath(String),
    ContentHandle(String),
    RemoteUri(String),
    /// Base64 payload.
    InlineBytes(String),
}

/// Terminal form of a resolved reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchTarget {
    LocalPath(String),
    RemoteUri(String),
    InlineBytes(String),
}

impl FetchTarget {
    /// Filesystem path for a local target, without any `file://` prefix.
    pub fn local_file(&self) -> Option<PathBuf> {
        match self {
            FetchTarget::LocalPath(path) => {
                Some(PathBuf::from(path.strip_prefix(FILE_SCHEME).unwrap_or(path)))
            }
            _ => None,
        }
    }
}

/// One way of turning a content handle into a real filesystem path.
pub trait PathStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn stat(&self, handle: &str) -> io::Result<PathBuf>;
}

/// Last-resort raw read of a handle's bytes.
pub trait ContentReader: Send + Sync {
    fn read_all(&self, handle: &str) -> io::Result<Vec<u8>>;
}

/// Maps provider prefixes (`content://com.example.files/`) onto the
/// directories that back them.
#[derive(Debug, Clone, Default)]
pub struct ProviderDirectories {
    roots: BTreeMap<String, PathBuf>,
}

impl ProviderDirectories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, prefix: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.roots.insert(prefix.into(), dir.into());
        self
    }

    fn locate(&self, handle: &str) -> Option<PathBuf> {
        self.roots
            .iter()
            .rev()
            .find_map(|(prefix, dir)| handle.strip_prefix(prefix.as_str()).map(|rest| dir.join(rest)))
    }
}

impl PathStrategy for ProviderDirectories {
    fn name(&self) -> &'static str {
        "provider-directories"
    }

    fn stat(&self, handle: &str) -> io::Result<PathBuf> {
        let path = self
            .locate(handle)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no provider for handle"))?;
        stat_file(&path)
    }
}

/// Treats the handle as a plain or `file://` path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStat;

impl PathStrategy for FileStat {
    fn name(&self) -> &'static str {
        "file-stat"
    }

    fn stat(&self, handle: &str) -> io::Result<PathBuf> {
        let raw = handle.strip_prefix(FILE_SCHEME).unwrap_or(handle);
        if has_scheme(raw) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "handle is not a filesystem path",
            ));
        }
        stat_file(Path::new(raw))
    }
}

/// Reads through the provider map first, then as a plain path.
#[derive(Debug, Clone, Default)]
pub struct FsContentReader {
    providers: ProviderDirectories,
}

impl FsContentReader {
    pub fn new(providers: ProviderDirectories) -> Self {
        Self { providers }
    }
}

impl ContentReader for FsContentReader {
    fn read_all(&self, handle: &str) -> io::Result<Vec<u8>> {
        let path = self
            .providers
            .locate(handle)
            .unwrap_or_else(|| PathBuf::from(handle.strip_prefix(FILE_SCHEME).unwrap_or(handle)));
        std::fs::read(path)
    }
}

fn stat_file(path: &Path) -> io::Result<PathBuf> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
    }
    path.canonicalize()
}

fn has_scheme(value: &str) -> bool {
    value
        .split_once("://")
        .map(|(scheme, _)| {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        })
        .unwrap_or(false)
}

fn is_remote(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub fn with_file_scheme(path: &str) -> String {
    if path.starts_with(FILE_SCHEME) {
        path.to_string()
    } else {
        format!("{FILE_SCHEME}{path}")
    }
}

#[derive(Clone, Default)]
pub struct Resolver {
    strategies: Arc<Vec<Box<dyn PathStrategy>>>,
    reader: Option<Arc<dyn ContentReader>>,
}

impl Resolver {
    pub fn new(strategies: Vec<Box<dyn PathStrategy>>, reader: Option<Arc<dyn ContentReader>>) -> Self {
        Self {
            strategies: Arc::new(strategies),
            reader,
        }
    }

    /// Provider map, then plain file stat, then raw read through the same map.
    pub fn with_providers(providers: ProviderDirectories) -> Self {
        Self::new(
            vec![Box::new(providers.clone()), Box::new(FileStat)],
            Some(Arc::new(FsContentReader::new(providers))),
        )
    }

    pub async fn resolve(&self, reference: DocumentReference) -> ViewerResult<FetchTarget> {
        let resolver = self.clone();
        tokio::task::spawn_blocking(move || resolver.resolve_blocking(&reference))
            .await
            .map_err(|err| ViewerError::UnresolvableReference {
                reference: "<task>".into(),
                reason: err.to_string(),
            })?
    }

    pub fn resolve_blocking(&self, reference: &DocumentReference) -> ViewerResult<FetchTarget> {
        match reference {
            DocumentReference::LocalPath(path) => Ok(FetchTarget::LocalPath(path.clone())),
            DocumentReference::RemoteUri(uri) => Ok(FetchTarget::RemoteUri(uri.clone())),
            DocumentReference::InlineBytes(payload) => Ok(FetchTarget::InlineBytes(payload.clone())),
            DocumentReference::ContentHandle(handle) => self.resolve_handle(handle),
        }
    }

    fn resolve_handle(&self, handle: &str) -> ViewerResult<FetchTarget> {
        for strategy in self.strategies.iter() {
            match strategy.stat(handle) {
                Ok(path) => {
                    let path = with_file_scheme(&path.to_string_lossy());
                    info!("Resolved {handle} via {} to {path}", strategy.name());
                    return Ok(FetchTarget::LocalPath(path));
                }
                Err(err) => debug!("{} could not stat {handle}: {err}", strategy.name()),
            }
        }

        if is_remote(handle) {
            return Ok(FetchTarget::RemoteUri(handle.to_string()));
        }
        if handle.starts_with(FILE_SCHEME) {
            return Ok(FetchTarget::LocalPath(handle.to_string()));
        }

        let unresolvable = |reason: String| ViewerError::UnresolvableReference {
            reference: handle.to_string(),
            reason,
        };
        let reader = self
            .reader
            .as_ref()
            .ok_or_else(|| unresolvable("no stat strategy succeeded and no reader available".into()))?;
        let bytes = reader
            .read_all(handle)
            .map_err(|err| unresolvable(format!("raw read failed: {err}")))?;

        info!("Inlining {} bytes for {handle}", bytes.len());
        Ok(FetchTarget::InlineBytes(BASE64.encode(bytes)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct FixedBytes(pub Vec<u8>);

    impl ContentReader for FixedBytes {
        fn read_all(&self, _handle: &str) -> io::Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    struct FailingReader;

    impl ContentReader for FailingReader {
        fn read_all(&self, _handle: &str) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    struct NeverStat;

    impl PathStrategy for NeverStat {
        fn name(&self) -> &'static str {
            "never"
        }

        fn stat(&self, _handle: &str) -> io::Result<PathBuf> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "unsupported"))
        }
    }

    #[tokio::test]
    async fn local_path_passes_through_unchanged() {
        let resolver = Resolver::with_providers(ProviderDirectories::new());
        let reference = DocumentReference::LocalPath("/tmp/no such/file.pdf".into());
        assert_eq!(
            resolver.resolve(reference).await.unwrap(),
            FetchTarget::LocalPath("/tmp/no such/file.pdf".into())
        );
    }

    #[test]
    fn remote_uri_and_inline_pass_through() {
        let resolver = Resolver::default();
        assert_eq!(
            resolver
                .resolve_blocking(&DocumentReference::RemoteUri("https://x/y.pdf".into()))
                .unwrap(),
            FetchTarget::RemoteUri("https://x/y.pdf".into())
        );
        assert_eq!(
            resolver
                .resolve_blocking(&DocumentReference::InlineBytes("JVBERg==".into()))
                .unwrap(),
            FetchTarget::InlineBytes("JVBERg==".into())
        );
    }

    #[test]
    fn provider_strategy_wins_and_gets_file_scheme() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("book.pdf"), b"%PDF").unwrap();
        let providers =
            ProviderDirectories::new().with_provider("content://downloads/", dir.path());
        let resolver = Resolver::with_providers(providers);

        let target = resolver
            .resolve_blocking(&DocumentReference::ContentHandle(
                "content://downloads/book.pdf".into(),
            ))
            .unwrap();

        let expected = dir.path().join("book.pdf").canonicalize().unwrap();
        assert_eq!(
            target,
            FetchTarget::LocalPath(format!("file://{}", expected.display()))
        );
        assert_eq!(target.local_file(), Some(expected));
    }

    #[test]
    fn file_stat_is_tried_after_provider_map() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.pdf");
        std::fs::write(&file, b"%PDF").unwrap();
        let resolver = Resolver::new(vec![Box::new(NeverStat), Box::new(FileStat)], None);

        let target = resolver
            .resolve_blocking(&DocumentReference::ContentHandle(format!(
                "file://{}",
                file.display()
            )))
            .unwrap();
        assert_eq!(target.local_file(), Some(file.canonicalize().unwrap()));
    }

    #[test]
    fn unstattable_handle_with_readable_bytes_is_inlined() {
        let resolver = Resolver::new(
            vec![Box::new(NeverStat)],
            Some(Arc::new(FixedBytes(vec![7u8; 10]))),
        );

        let target = resolver
            .resolve_blocking(&DocumentReference::ContentHandle("content://x".into()))
            .unwrap();

        match target {
            FetchTarget::InlineBytes(payload) => {
                assert!(!payload.is_empty());
                assert_eq!(BASE64.decode(payload).unwrap(), vec![7u8; 10]);
            }
            other => panic!("expected inline bytes, got {other:?}"),
        }
    }

    #[test]
    fn remote_handle_passes_through_before_reading() {
        let resolver = Resolver::new(vec![Box::new(FileStat)], Some(Arc::new(FailingReader)));
        assert_eq!(
            resolver
                .resolve_blocking(&DocumentReference::ContentHandle("https://cdn/doc.pdf".into()))
                .unwrap(),
            FetchTarget::RemoteUri("https://cdn/doc.pdf".into())
        );
    }

    #[test]
    fn exhausted_fallbacks_are_unresolvable() {
        let resolver = Resolver::new(vec![Box::new(NeverStat)], Some(Arc::new(FailingReader)));
        let err = resolver
            .resolve_blocking(&DocumentReference::ContentHandle("content://gone".into()))
            .unwrap_err();
        assert_eq!(err.kind(), "unresolvable_reference");

        let no_reader = Resolver::new(vec![], None);
        assert!(no_reader
            .resolve_blocking(&DocumentReference::ContentHandle("content://gone".into()))
            .is_err());
    }

    #[test]
    fn scheme_detection() {
        assert!(has_scheme("content://a"));
        assert!(!has_scheme("/plain/path"));
        assert!(!has_scheme("://nothing"));
    }
}
