//! Fake collaborators: a fixture-copying fetcher and a scripted LLM

use async_trait::async_trait;
use ccr_reviewer::services::prompts;
use ccr_reviewer::services::{FetchError, FetchRequest, LlmClient, LlmError, RepositoryFetcher, Workspace};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Serves local directories as if they were cloned repositories
pub struct FixtureFetcher {
    workspace_root: PathBuf,
    repos: Mutex<HashMap<String, PathBuf>>,
    failing: Mutex<HashSet<String>>,
    workspaces: Mutex<Vec<PathBuf>>,
    labels: Mutex<Vec<String>>,
}

impl FixtureFetcher {
    pub fn new(workspace_root: &Path) -> Arc<Self> {
        Arc::new(Self {
            workspace_root: workspace_root.to_path_buf(),
            repos: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            workspaces: Mutex::new(Vec::new()),
            labels: Mutex::new(Vec::new()),
        })
    }

    pub fn add_repo(&self, url: &str, dir: &Path) {
        self.repos.lock().unwrap().insert(url.to_string(), dir.to_path_buf());
    }

    /// Make every fetch of `url` fail after the workspace is created
    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Every workspace directory handed out (or created before failing)
    pub fn workspaces(&self) -> Vec<PathBuf> {
        self.workspaces.lock().unwrap().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepositoryFetcher for FixtureFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Workspace, FetchError> {
        let workspace = Workspace::prepare(&self.workspace_root, &request.label)?;
        self.workspaces.lock().unwrap().push(workspace.root().to_path_buf());
        self.labels.lock().unwrap().push(request.label.clone());

        let not_found = || FetchError::CloneFailed {
            exit_code: Some(128),
            stderr: format!("fatal: repository '{}' not found", request.repository_url),
        };

        if self.failing.lock().unwrap().contains(&request.repository_url) {
            return Err(not_found());
        }
        let source = self.repos.lock().unwrap().get(&request.repository_url).cloned();
        let Some(source) = source else {
            return Err(not_found());
        };

        copy_dir(&source, &workspace.checkout_dir())?;
        Ok(workspace)
    }
}

fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(src).map_err(io::Error::other)?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Which pipeline prompt a call carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    StandardClassification,
    CodebaseClassification,
    Compliance,
    Other,
}

#[derive(Debug, Clone)]
pub struct LlmCall {
    pub kind: CallKind,
    pub user_prompt: String,
}

type Responder = dyn Fn(&LlmCall) -> Result<String, LlmError> + Send + Sync;

/// LLM client answering through a closure and recording every call
pub struct ScriptedLlmClient {
    responder: Box<Responder>,
    delay: Option<Duration>,
    calls: Mutex<Vec<LlmCall>>,
}

impl ScriptedLlmClient {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&LlmCall) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            delay: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Sleep `delay` before answering each call
    pub fn slow<F>(delay: Duration, responder: F) -> Arc<Self>
    where
        F: Fn(&LlmCall) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            delay: Some(delay),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Answers with `tagging_reply`
    pub fn tagging() -> Arc<Self> {
        Self::new(tagging_reply)
    }

    pub fn calls(&self) -> Vec<LlmCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.kind == kind).count()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        let kind = match system_prompt {
            s if s == prompts::STANDARD_CLASSIFICATION_SYSTEM => CallKind::StandardClassification,
            s if s == prompts::CODEBASE_CLASSIFICATION_SYSTEM => CallKind::CodebaseClassification,
            s if s == prompts::COMPLIANCE_SYSTEM => CallKind::Compliance,
            _ => CallKind::Other,
        };
        let call = LlmCall {
            kind,
            user_prompt: user_prompt.to_string(),
        };
        self.calls.lock().unwrap().push(call.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(&call)
    }
}

/// Well-formed reply for any call
///
/// Classifications are read from `Tags:` lines in the prompt content; a
/// compliance reply marks every referenced standard compliant.
pub fn tagging_reply(call: &LlmCall) -> Result<String, LlmError> {
    match call.kind {
        CallKind::StandardClassification | CallKind::CodebaseClassification => {
            Ok(serde_json::json!({ "classifications": tags_in(&call.user_prompt) }).to_string())
        }
        CallKind::Compliance => {
            let standards: Vec<serde_json::Value> = (1..=compliance_refs(&call.user_prompt))
                .map(|i| {
                    serde_json::json!({
                        "standard_ref": format!("S{}", i),
                        "title": "",
                        "compliant": true,
                        "relevant_sections": ["src/index.js"],
                        "recommendations": null,
                    })
                })
                .collect();
            Ok(serde_json::json!({
                "standards": standards,
                "summary": "The codebase follows the standards.",
                "recommendations": [],
            })
            .to_string())
        }
        CallKind::Other => Err(LlmError::Unavailable("unexpected prompt".to_string())),
    }
}

/// Names listed on `Tags: a, b` lines
pub fn tags_in(text: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for line in text.lines() {
        if let Some(rest) = line.trim().strip_prefix("Tags:") {
            for tag in rest.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                if !tags.iter().any(|t: &String| t == tag) {
                    tags.push(tag.to_string());
                }
            }
        }
    }
    tags
}

/// Number of `### S<n> (` standard headings in a compliance prompt
pub fn compliance_refs(prompt: &str) -> usize {
    let mut n = 0;
    while prompt.contains(&format!("### S{} (", n + 1)) {
        n += 1;
    }
    n
}
