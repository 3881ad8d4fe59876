//! Collaborator interfaces consumed by the runner.
//!
//! Content generation and platform publishing are external to the recovery
//! engine. The runner only needs these two traits; their wire protocols and
//! error types stay on the implementor's side of the boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error returned by a collaborator. Rendered to text with
/// [`describe_error`](crate::error::describe_error) before classification.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// What to generate for a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentRequest {
    pub campaign_id: String,
    pub topic: String,
    /// Free-form instructions passed through to the generator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl ContentRequest {
    pub fn new(campaign_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            topic: topic.into(),
            ..Self::default()
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// Produces campaign content; may be an LLM call or a template engine.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generates the text to publish.
    async fn generate(&self, request: &ContentRequest) -> CollaboratorResult<String>;
}

/// Publishes content to one destination platform.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Identifier used as the key in `platform_progress` and in step names.
    fn platform_id(&self) -> &str;

    /// Publishes and returns the URL of the published content.
    async fn publish(&self, title: &str, body: &str) -> CollaboratorResult<String>;
}
