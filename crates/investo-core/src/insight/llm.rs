//! Insight generation backed by a chat completion provider

use super::InsightGenerator;
use super::prompts::InsightPrompts;
use crate::config::InvestoConfig;
use crate::error::{InvestoError, Result};
use crate::models::{
    Fundamentals, InsightSummary, NewsHeadline, Quote, SentimentLabel, ValuationCall,
};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::Utc;
use investo_llm::{CompletionRequest, LLMProvider, Message, StopReason};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

const PROVIDER: &str = "llm";
const TOP_HEADLINES: usize = 5;
const NO_NEWS_RATIONALE: &str = "No recent news available for analysis.";

pub struct LlmInsightGenerator {
    provider: Arc<dyn LLMProvider>,
    prompts: InsightPrompts,
    model: String,
    temperature: f32,
    max_tokens: usize,
    retry: RetryPolicy,
}

impl LlmInsightGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &InvestoConfig) -> Result<Self> {
        Ok(Self {
            provider,
            prompts: InsightPrompts::new()?,
            model: config.insight_model.clone(),
            temperature: config.insight_temperature,
            max_tokens: config.insight_max_tokens,
            retry: config.retry_policy(),
        })
    }

    async fn complete_once(&self, request: CompletionRequest) -> Result<String> {
        let response = self.provider.complete(request).await?;

        if response.stop_reason == StopReason::ContentFilter {
            return Err(InvestoError::upstream(
                PROVIDER,
                "completion withheld by content filter",
            ));
        }

        debug!(
            provider = self.provider.name(),
            tokens = response.usage.total(),
            "Insight completion received"
        );

        response
            .message
            .text()
            .map(str::to_string)
            .ok_or_else(|| InvestoError::upstream(PROVIDER, "empty completion"))
    }
}

#[async_trait]
impl InsightGenerator for LlmInsightGenerator {
    #[instrument(
        skip(self, recent_news, quote, fundamentals),
        fields(headlines = recent_news.len(), price = %quote.price)
    )]
    async fn generate_insight(
        &self,
        symbol: &str,
        recent_news: &[NewsHeadline],
        quote: &Quote,
        fundamentals: &Fundamentals,
    ) -> Result<InsightSummary> {
        let request = CompletionRequest::builder(&self.model)
            .system(self.prompts.system()?)
            .add_message(Message::user(
                self.prompts.user(symbol, recent_news, quote, fundamentals)?,
            ))
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .json_output()
            .build();

        let content = self
            .retry
            .execute("insight", || self.complete_once(request.clone()))
            .await?;

        let mut summary = parse_insight(symbol, &content)?;
        summary.top_headlines = recent_news.iter().take(TOP_HEADLINES).cloned().collect();

        if recent_news.is_empty() {
            summary.sentiment_label = SentimentLabel::Neutral;
            summary.sentiment_score = 0.0;
            summary.sentiment_rationale = NO_NEWS_RATIONALE.to_string();
        }

        Ok(summary)
    }
}

/// Strip a surrounding Markdown code fence, if any
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().trim_end_matches("```").trim()
}

fn text_field(object: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn score_field(object: &Map<String, Value>) -> f64 {
    let score = match object.get("sentiment_score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    score
        .filter(|s| s.is_finite())
        .map_or(0.0, |s| s.clamp(-1.0, 1.0))
}

/// Interpret the model's JSON answer; lenient on field contents, strict on shape
fn parse_insight(symbol: &str, content: &str) -> Result<InsightSummary> {
    let body = strip_code_fence(content);
    let body = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            return Err(InvestoError::upstream(
                PROVIDER,
                "completion did not contain a JSON object",
            ));
        }
    };

    let value: Value = serde_json::from_str(body)
        .map_err(|e| InvestoError::upstream(PROVIDER, format!("unparseable insight: {e}")))?;
    let Value::Object(object) = value else {
        return Err(InvestoError::upstream(
            PROVIDER,
            "insight payload is not an object",
        ));
    };

    let label = text_field(&object, &["sentiment_label", "sentiment"]);
    let recommendation = text_field(&object, &["recommendation"]);

    let key_insights = object
        .get("key_insights")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(InsightSummary {
        symbol: symbol.to_string(),
        sentiment_label: SentimentLabel::parse_lenient(&label),
        sentiment_score: score_field(&object),
        sentiment_rationale: text_field(
            &object,
            &["sentiment_rationale", "analysis_summary"],
        ),
        valuation_commentary: text_field(&object, &["valuation_commentary", "summary"]),
        recommendation: ValuationCall::parse_lenient(&recommendation),
        key_insights,
        top_headlines: Vec::new(),
        generated_at: Utc::now(),
    })
}
