//! Test Helper Utilities
//!
//! Shared utilities for testing ccr-reviewer

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod db_utils;
pub mod fakes;

pub use db_utils::{count_all_rows, create_test_db, seed_classifications, write_repo};
pub use fakes::{
    compliance_refs, tagging_reply, tags_in, CallKind, FixtureFetcher, LlmCall, ScriptedLlmClient,
};

use ccr_common::events::EventBus;
use ccr_reviewer::services::{ComplianceProcessor, LlmClient, LlmGateway, StandardSetProcessor};
use ccr_reviewer::utils::RetryPolicy;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Database, fake fetcher and scratch directories for one test
pub struct TestContext {
    pub temp_dir: TempDir,
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub fetcher: Arc<FixtureFetcher>,
    pub workspace_root: PathBuf,
    pub repos_dir: PathBuf,
}

impl TestContext {
    pub async fn new() -> Self {
        let (temp_dir, db) = create_test_db().await.unwrap();
        let workspace_root = temp_dir.path().join("workspaces");
        let repos_dir = temp_dir.path().join("repos");
        std::fs::create_dir_all(&workspace_root).unwrap();
        std::fs::create_dir_all(&repos_dir).unwrap();

        Self {
            fetcher: FixtureFetcher::new(&workspace_root),
            temp_dir,
            db,
            event_bus: EventBus::new(100),
            workspace_root,
            repos_dir,
        }
    }

    /// Serve `files` from `url`
    pub fn repo(&self, url: &str, files: &[(&str, &str)]) -> PathBuf {
        let name = url.rsplit('/').next().unwrap_or("repo");
        let dir = write_repo(&self.repos_dir.join(name), files);
        self.fetcher.add_repo(url, &dir);
        dir
    }

    pub fn gateway(&self, llm: Arc<ScriptedLlmClient>) -> Arc<LlmGateway> {
        let client: Arc<dyn LlmClient> = llm;
        Arc::new(LlmGateway::new(client, 1))
    }

    pub fn standard_set_processor(&self, llm: Arc<ScriptedLlmClient>) -> StandardSetProcessor {
        StandardSetProcessor::new(
            self.db.clone(),
            self.event_bus.clone(),
            self.fetcher.clone(),
            self.gateway(llm),
            test_retry_policy(),
        )
    }

    pub fn compliance_processor(&self, llm: Arc<ScriptedLlmClient>) -> ComplianceProcessor {
        ComplianceProcessor::new(
            self.db.clone(),
            self.event_bus.clone(),
            self.fetcher.clone(),
            self.gateway(llm),
            test_retry_policy(),
        )
    }

    /// Directories left under the workspace root
    pub fn leftover_workspaces(&self) -> Vec<PathBuf> {
        list_dirs(&self.workspace_root)
    }
}

/// Two attempts, negligible backoff
pub fn test_retry_policy() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1))
}

fn list_dirs(path: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(path)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}
