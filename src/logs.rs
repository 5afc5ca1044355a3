use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

enum Scope {
    Workspace {
        workspace_id: String,
    },
    Project {
        workspace_id: String,
        project_name: String,
    },
}

/// Line-oriented log sink scoped to one lifecycle operation.
///
/// Every line is mirrored into `tracing` at info level. When the provider
/// was initialized with a logs directory, lines are also appended to the
/// per-workspace file `<logs_dir>/<workspaceId>/log` or the per-project
/// file `<logs_dir>/<workspaceId>/<projectName>/log`. File trouble never
/// fails the operation; it only logs a warning.
///
/// Callers close the sink on every exit path once the operation finishes.
pub struct LogSink {
    scope: Scope,
    file: Option<Mutex<File>>,
}

impl LogSink {
    /// Sink for a workspace-scoped operation.
    pub async fn workspace(logs_dir: Option<&Path>, workspace_id: &str) -> Self {
        let path = logs_dir.map(|dir| dir.join(workspace_id).join("log"));
        Self {
            scope: Scope::Workspace {
                workspace_id: workspace_id.to_string(),
            },
            file: Self::open(path).await,
        }
    }

    /// Sink for a project-scoped operation.
    pub async fn project(
        logs_dir: Option<&Path>,
        workspace_id: &str,
        project_name: &str,
    ) -> Self {
        let path = logs_dir.map(|dir| dir.join(workspace_id).join(project_name).join("log"));
        Self {
            scope: Scope::Project {
                workspace_id: workspace_id.to_string(),
                project_name: project_name.to_string(),
            },
            file: Self::open(path).await,
        }
    }

    async fn open(path: Option<PathBuf>) -> Option<Mutex<File>> {
        let path = path?;

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %e, "failed to create log directory");
                return None;
            }
        }

        match OpenOptions::new().create(true).append(true).open(&path).await {
            Ok(file) => Some(Mutex::new(file)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open log file");
                None
            }
        }
    }

    /// Write one diagnostic line (a trailing newline is appended).
    pub async fn write_line(&self, line: &str) {
        match &self.scope {
            Scope::Workspace { workspace_id } => {
                info!(workspace_id = %workspace_id, "{line}");
            }
            Scope::Project {
                workspace_id,
                project_name,
            } => {
                info!(workspace_id = %workspace_id, project = %project_name, "{line}");
            }
        }

        self.append(format!("{line}\n").as_bytes()).await;
    }

    /// Write raw bytes to the log file as-is.
    ///
    /// Used for terminal control sequences, which belong in the streamed
    /// file but would corrupt the structured log.
    pub async fn write_raw(&self, text: &str) {
        self.append(text.as_bytes()).await;
    }

    /// Flush buffered file output. Called on every operation exit path.
    pub async fn close(&self) {
        if let Some(file) = &self.file {
            let mut file = file.lock().await;
            if let Err(e) = file.flush().await {
                warn!(error = %e, "failed to flush log file");
            }
        }
    }

    async fn append(&self, bytes: &[u8]) {
        if let Some(file) = &self.file {
            let mut file = file.lock().await;
            if let Err(e) = file.write_all(bytes).await {
                warn!(error = %e, "failed to write log file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_workspace_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::workspace(Some(dir.path()), "ws1").await;
        sink.write_line("Creating Hetzner volume").await;
        sink.write_line("Hetzner volume created").await;
        sink.close().await;

        let contents = std::fs::read_to_string(dir.path().join("ws1").join("log")).unwrap();
        assert_eq!(
            contents,
            "Creating Hetzner volume\nHetzner volume created\n"
        );
    }

    #[tokio::test]
    async fn test_project_sink_nests_under_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::project(Some(dir.path()), "ws1", "api").await;
        sink.write_line("starting").await;
        sink.close().await;

        let path = dir.path().join("ws1").join("api").join("log");
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(path).unwrap(), "starting\n");
    }

    #[tokio::test]
    async fn test_raw_write_adds_no_newline() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::project(Some(dir.path()), "ws1", "api").await;
        sink.write_raw("\x1b[?25h\n").await;
        sink.close().await;

        let contents =
            std::fs::read_to_string(dir.path().join("ws1").join("api").join("log")).unwrap();
        assert_eq!(contents, "\x1b[?25h\n");
    }

    #[tokio::test]
    async fn test_sink_without_logs_dir_writes_no_files() {
        let sink = LogSink::workspace(None, "ws1").await;
        sink.write_line("only mirrored").await;
        sink.close().await;
        assert!(sink.file.is_none());
    }

    #[tokio::test]
    async fn test_sink_reopens_append() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sink = LogSink::workspace(Some(dir.path()), "ws1").await;
            sink.write_line("first").await;
            sink.close().await;
        }
        {
            let sink = LogSink::workspace(Some(dir.path()), "ws1").await;
            sink.write_line("second").await;
            sink.close().await;
        }

        let contents = std::fs::read_to_string(dir.path().join("ws1").join("log")).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }
}
