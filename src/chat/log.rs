/// Chat append log, a human-readable record of server activity.
///
/// One line per event, appended to a file by a background task:
///   `[LOG] 2026-01-02 15:04:05: Client 'alice' connected.`
///   `[CHAT] 2026-01-02 15:04:09: alice: hi`
///
/// Recording never waits on the file. If the file can't be written the
/// failure is reported through `tracing` and chat traffic carries on.
use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::warn;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Kind of log line; rendered as the bracketed tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Log,
    Chat,
    Error,
}

impl LogKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Log => "[LOG]",
            Self::Chat => "[CHAT]",
            Self::Error => "[ERROR]",
        }
    }
}

/// Render one log line, newline-terminated.
pub fn format_line(kind: LogKind, timestamp: &str, text: &str) -> String {
    format!("{} {timestamp}: {text}\n", kind.tag())
}

/// Cheap, cloneable handle to the append log.
#[derive(Debug, Clone)]
pub struct ChatLog {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl ChatLog {
    /// A log that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Start the writer task appending to `path`. Must be called from
    /// within a tokio runtime.
    pub fn open(path: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(path, rx));
        Self { tx: Some(tx) }
    }

    pub fn record(&self, kind: LogKind, text: &str) {
        if let Some(tx) = &self.tx {
            let now = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
            let _ = tx.send(format_line(kind, &now, text));
        }
    }

    pub fn log(&self, text: &str) {
        self.record(LogKind::Log, text);
    }

    pub fn chat(&self, text: &str) {
        self.record(LogKind::Chat, text);
    }

    pub fn error(&self, text: &str) {
        self.record(LogKind::Error, text);
    }
}

/// Append lines as they arrive. The file is reopened per line so that a
/// rotated or deleted log is recreated.
async fn write_loop(path: PathBuf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        let result = async {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!(path = %path.display(), "chat log write failed: {e}");
        }
    }
}
