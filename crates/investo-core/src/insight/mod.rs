//! AI commentary for a single symbol

mod llm;
mod prompts;

pub use llm::LlmInsightGenerator;
pub use prompts::InsightPrompts;

use crate::error::Result;
use crate::models::{Fundamentals, InsightSummary, NewsHeadline, Quote};
use async_trait::async_trait;

/// Turns recent news, the live quote and fundamentals into a structured
/// sentiment and valuation summary
///
/// Transport failures surface as `UpstreamUnavailable` after the generator's own
/// retries; output that cannot be interpreted is `UpstreamError`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn generate_insight(
        &self,
        symbol: &str,
        recent_news: &[NewsHeadline],
        quote: &Quote,
        fundamentals: &Fundamentals,
    ) -> Result<InsightSummary>;
}
