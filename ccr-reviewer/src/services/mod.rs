//! Pipeline services for ccr-reviewer

pub mod classification_matcher;
pub mod compliance_processor;
pub mod content_flattener;
pub mod llm_client;
pub mod llm_gateway;
pub mod prompts;
pub mod report_renderer;
pub mod repository_fetcher;
pub mod standard_set_processor;
pub mod workspace;

pub use classification_matcher::match_classifications;
pub use compliance_processor::ComplianceProcessor;
pub use content_flattener::{FileFilter, FlatDocument, FlatEntry, WorkspaceError};
pub use llm_client::{AnthropicClient, LlmClient, LlmError};
pub use llm_gateway::{ClassificationSubject, ComplianceResult, LlmGateway};
pub use repository_fetcher::{FetchError, FetchRequest, GitFetcher, RepositoryFetcher};
pub use standard_set_processor::StandardSetProcessor;
pub use workspace::Workspace;
