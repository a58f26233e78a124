//! Repository Fetcher
//!
//! Clones a remote repository into a fresh `Workspace`. The caller receives
//! the workspace guard and owns teardown from then on; if the fetch itself
//! fails, the half-built workspace is dropped (and removed) here.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use super::workspace::Workspace;
use crate::config::FetchSettings;

/// Every way a fetch can fail; all of them mean "repository unavailable"
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Malformed repository URL '{0}'")]
    InvalidUrl(String),

    #[error("Workspace I/O error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("Failed to run git: {0}")]
    Spawn(String),

    #[error("Reference '{git_ref}' not found in repository")]
    RefNotFound { git_ref: String },

    #[error("git clone failed (exit code {exit_code:?}): {stderr}")]
    CloneFailed { exit_code: Option<i32>, stderr: String },

    #[error("git clone timed out after {0:?}")]
    Timeout(Duration),
}

/// What to fetch and which workspace label to use
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub repository_url: String,
    /// Branch or tag; default branch when absent
    pub git_ref: Option<String>,
    /// Identifies the logical operation, e.g. `standard-set-<id>`
    pub label: String,
}

/// Produces a local checkout of a repository
#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    /// Fetch into a fresh workspace; contents land in `Workspace::checkout_dir()`
    async fn fetch(&self, request: &FetchRequest) -> Result<Workspace, FetchError>;
}

/// `git clone` based fetcher
pub struct GitFetcher {
    git_binary: PathBuf,
    workspace_root: PathBuf,
    timeout: Duration,
    shallow: bool,
}

impl GitFetcher {
    pub fn new(settings: &FetchSettings, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            git_binary: settings.git_binary.clone(),
            workspace_root: workspace_root.into(),
            timeout: settings.timeout(),
            shallow: settings.shallow,
        }
    }
}

#[async_trait]
impl RepositoryFetcher for GitFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Workspace, FetchError> {
        validate_repository_url(&request.repository_url)?;

        let workspace = Workspace::prepare(&self.workspace_root, &request.label)?;
        let checkout = workspace.checkout_dir();

        let mut command = Command::new(&self.git_binary);
        command.arg("clone").arg("--quiet");
        if self.shallow {
            command.args(["--depth", "1"]);
        }
        if let Some(git_ref) = &request.git_ref {
            command.args(["--branch", git_ref.as_str()]);
        }
        command
            .arg("--")
            .arg(&request.repository_url)
            .arg(&checkout)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            repository_url = %request.repository_url,
            git_ref = ?request.git_ref,
            workspace = %workspace.root().display(),
            "Cloning repository"
        );

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
            .map_err(|e| FetchError::Spawn(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::warn!(
                repository_url = %request.repository_url,
                exit_code = ?output.status.code(),
                %stderr,
                "git clone failed"
            );
            return Err(match &request.git_ref {
                Some(git_ref) if is_missing_ref(&stderr) => FetchError::RefNotFound {
                    git_ref: git_ref.clone(),
                },
                _ => FetchError::CloneFailed {
                    exit_code: output.status.code(),
                    stderr,
                },
            });
        }

        Ok(workspace)
    }
}

fn is_missing_ref(stderr: &str) -> bool {
    stderr.contains("Remote branch") && stderr.contains("not found")
}

/// Accept URLs git can clone without prompting: http(s), ssh, git, file,
/// and scp-style `user@host:path`
pub fn validate_repository_url(url: &str) -> Result<(), FetchError> {
    let invalid = || FetchError::InvalidUrl(url.to_string());

    let trimmed = url.trim();
    if trimmed.is_empty() || trimmed != url || trimmed.starts_with('-') {
        return Err(invalid());
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    if let Ok(parsed) = reqwest::Url::parse(trimmed) {
        return match parsed.scheme() {
            "http" | "https" | "ssh" | "git" => {
                if parsed.host_str().map_or(true, str::is_empty) {
                    Err(invalid())
                } else {
                    Ok(())
                }
            }
            "file" => Ok(()),
            _ => Err(invalid()),
        };
    }

    if is_scp_like(trimmed) {
        Ok(())
    } else {
        Err(invalid())
    }
}

fn is_scp_like(url: &str) -> bool {
    let Some((user_host, path)) = url.split_once(':') else {
        return false;
    };
    let Some((user, host)) = user_host.split_once('@') else {
        return false;
    };
    !user.is_empty() && !host.is_empty() && !path.is_empty() && !host.contains('/')
}
