//! Where the configuration document lives and how changes to it are noticed.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chainwatch_core::WatchError;
use notify::{EventKind, PollWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Default interval for [`WatchMode::Poll`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Keeps a change observer alive; dropping it stops observation.
pub struct SourceWatch {
    _inner: Box<dyn Send>,
}

impl SourceWatch {
    pub fn new(inner: impl Send + 'static) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

/// Durable home of the configuration document.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Read the raw document. `Ok(None)` if it does not exist yet.
    async fn read(&self) -> Result<Option<String>, WatchError>;

    /// Replace the document atomically.
    async fn write(&self, contents: &str) -> Result<(), WatchError>;

    /// Start observing external changes; each change sends `()` on `changed`.
    fn watch(&self, changed: mpsc::UnboundedSender<()>) -> Result<SourceWatch, WatchError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

// ─── File ─────────────────────────────────────────────────────────────────────

/// How a [`FileConfigSource`] detects changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// OS notifications (inotify, FSEvents, ...).
    Native,
    /// Stat the file on a fixed interval.
    Poll(Duration),
}

impl Default for WatchMode {
    fn default() -> Self {
        WatchMode::Native
    }
}

/// A JSON document on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
    mode: WatchMode,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>, mode: WatchMode) -> Self {
        Self {
            path: path.into(),
            mode,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "configuration".to_string());
        self.dir().join(format!(".{name}.tmp"))
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn read(&self) -> Result<Option<String>, WatchError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WatchError::ConfigLoad(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn write(&self, contents: &str) -> Result<(), WatchError> {
        let tmp = self.tmp_path();
        let write_err = |e: std::io::Error| WatchError::ConfigWrite(format!("{}: {e}", self.path.display()));
        tokio::fs::write(&tmp, contents).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        Ok(())
    }

    fn watch(&self, changed: mpsc::UnboundedSender<()>) -> Result<SourceWatch, WatchError> {
        let target = self.path.file_name().map(|n| n.to_os_string());
        let handler = move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) && event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == target);
                if relevant {
                    let _ = changed.send(());
                }
            }
            Err(e) => tracing::warn!(error = %e, "configuration watcher error"),
        };
        let watch_err = |e: notify::Error| WatchError::ConfigLoad(format!("watch failed: {e}"));

        // The parent directory is watched so that atomic renames over the
        // file are seen as well as in-place writes.
        let dir = self.dir();
        let guard = match self.mode {
            WatchMode::Native => {
                let mut watcher = notify::recommended_watcher(handler).map_err(watch_err)?;
                watcher
                    .watch(&dir, RecursiveMode::NonRecursive)
                    .map_err(watch_err)?;
                SourceWatch::new(watcher)
            }
            WatchMode::Poll(interval) => {
                let config = notify::Config::default().with_poll_interval(interval);
                let mut watcher = PollWatcher::new(handler, config).map_err(watch_err)?;
                watcher
                    .watch(&dir, RecursiveMode::NonRecursive)
                    .map_err(watch_err)?;
                SourceWatch::new(watcher)
            }
        };
        tracing::info!(path = %self.path.display(), mode = ?self.mode, "watching configuration for changes");
        Ok(guard)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ─── Memory ───────────────────────────────────────────────────────────────────

/// An in-process document. Every write, including the store's own, notifies
/// watchers the way a file change would.
#[derive(Default)]
pub struct MemoryConfigSource {
    contents: Mutex<Option<String>>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<()>>>,
    writes: Mutex<usize>,
}

impl MemoryConfigSource {
    /// A source with no document yet.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Mutex::new(Some(contents.into())),
            ..Default::default()
        }
    }

    /// Replace the document as an external editor would.
    pub fn set_external(&self, contents: impl Into<String>) {
        *self.contents.lock().unwrap() = Some(contents.into());
        self.notify();
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().unwrap().clone()
    }

    /// Number of writes made through [`ConfigSource::write`].
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }

    fn notify(&self) {
        self.watchers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(()).is_ok());
    }
}

#[async_trait]
impl ConfigSource for MemoryConfigSource {
    async fn read(&self) -> Result<Option<String>, WatchError> {
        Ok(self.contents())
    }

    async fn write(&self, contents: &str) -> Result<(), WatchError> {
        *self.contents.lock().unwrap() = Some(contents.to_string());
        *self.writes.lock().unwrap() += 1;
        self.notify();
        Ok(())
    }

    fn watch(&self, changed: mpsc::UnboundedSender<()>) -> Result<SourceWatch, WatchError> {
        self.watchers.lock().unwrap().push(changed);
        Ok(SourceWatch::new(()))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let src = FileConfigSource::new(dir.path().join("configuration.json"), WatchMode::Native);
        assert_eq!(src.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_replaces_without_leaving_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configuration.json");
        let src = FileConfigSource::new(&path, WatchMode::Native);

        src.write("{\"a\":1}").await.unwrap();
        src.write("{\"a\":2}").await.unwrap();

        assert_eq!(src.read().await.unwrap().as_deref(), Some("{\"a\":2}"));
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["configuration.json".to_string()]);
    }

    #[test]
    fn bare_file_name_resolves_to_cwd() {
        let src = FileConfigSource::new("configuration.json", WatchMode::default());
        assert_eq!(src.dir(), PathBuf::from("."));
        assert_eq!(src.tmp_path(), PathBuf::from("./.configuration.json.tmp"));
    }

    #[tokio::test]
    async fn poll_watch_sees_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configuration.json");
        std::fs::write(&path, "{}").unwrap();

        let src = FileConfigSource::new(&path, WatchMode::Poll(Duration::from_millis(50)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = src.watch(tx).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&path, "{\"delayBlocks\": 1, \"rules\": []}").unwrap();

        let got = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(matches!(got, Ok(Some(()))));
    }

    #[tokio::test]
    async fn memory_write_notifies_watchers() {
        let src = MemoryConfigSource::empty();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = src.watch(tx).unwrap();

        src.write("x").await.unwrap();
        src.set_external("y");

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert_eq!(src.write_count(), 1);
        assert_eq!(src.contents().as_deref(), Some("y"));
    }
}
