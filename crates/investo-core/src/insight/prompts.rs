//! Prompt templates for insight generation

use crate::error::{InvestoError, Result};
use crate::models::{Fundamentals, NewsHeadline, Quote};
use crate::valuation::compute_multiples;
use minijinja::{Environment, context};
use rust_decimal::Decimal;

const SYSTEM_TEMPLATE: &str = "insight.system";
const USER_TEMPLATE: &str = "insight.user";

/// Headlines beyond this are not sent to the model
pub const MAX_PROMPT_HEADLINES: usize = 10;

const SYSTEM: &str = "You are a professional equity research analyst specializing in news \
sentiment and valuation. Provide objective, balanced, educational analysis. This is not \
financial advice. Always answer with a single JSON object.";

const USER: &str = r#"Analyze {{ symbol }}{% if company %} ({{ company }}){% endif %} for a retail investor.

Current price: {{ price }}

Price multiples:
- P/E: {{ pe }}
- P/B: {{ pb }}
- P/S: {{ ps }}
- EV/EBITDA: {{ ev_ebitda }}

Per-share fundamentals (trailing twelve months):
- Earnings per share: {{ eps }}
- Book value per share: {{ bvps }}
- Revenue per share: {{ rps }}
- Enterprise value: {{ enterprise_value }}
- EBITDA: {{ ebitda }}

Typical market averages for reference (S&P 500):
- P/E: ~20-25
- P/B: ~3-4
- P/S: ~2-3
- EV/EBITDA: ~12-15

{% if headlines %}Recent headlines:
{% for h in headlines %}- {{ h.title }}{% if h.source %} (Source: {{ h.source }}{% if h.published_date %}, Date: {{ h.published_date }}{% endif %}){% endif %}
{% endfor %}{% else %}There are no recent headlines for {{ symbol }}.
{% endif %}
Provide:
1. An overall sentiment score from -1.0 (very bearish) to 1.0 (very bullish)
2. A sentiment label: "Bullish", "Bearish", or "Neutral"
3. A brief summary of the news sentiment (2-3 sentences)
4. A valuation commentary comparing the multiples above with the market averages (3-4 sentences)
5. A recommendation: "Undervalued", "Fairly Valued", or "Overvalued"
6. 3-5 key insights about the valuation

Respond in JSON format:
{
    "sentiment_score": <float>,
    "sentiment_label": "<string>",
    "sentiment_rationale": "<string>",
    "valuation_commentary": "<string>",
    "recommendation": "<string>",
    "key_insights": ["<string>", ...]
}"#;

/// Renders the system and user prompts
pub struct InsightPrompts {
    env: Environment<'static>,
}

impl InsightPrompts {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template(SYSTEM_TEMPLATE, SYSTEM)
            .map_err(template_error)?;
        env.add_template(USER_TEMPLATE, USER)
            .map_err(template_error)?;
        Ok(Self { env })
    }

    pub fn system(&self) -> Result<String> {
        self.env
            .get_template(SYSTEM_TEMPLATE)
            .and_then(|t| t.render(()))
            .map_err(template_error)
    }

    /// Valuation prompt over the live quote, its multiples and recent news
    pub fn user(
        &self,
        symbol: &str,
        headlines: &[NewsHeadline],
        quote: &Quote,
        fundamentals: &Fundamentals,
    ) -> Result<String> {
        let headlines = &headlines[..headlines.len().min(MAX_PROMPT_HEADLINES)];
        let multiples = compute_multiples(quote, fundamentals);

        self.env
            .get_template(USER_TEMPLATE)
            .and_then(|t| {
                t.render(context! {
                    symbol => symbol,
                    company => quote.name.as_deref(),
                    price => format!("{:.2}", quote.price.round_dp(2)),
                    pe => display(multiples.pe),
                    pb => display(multiples.pb),
                    ps => display(multiples.ps),
                    ev_ebitda => display(multiples.ev_ebitda),
                    eps => display(fundamentals.earnings_per_share),
                    bvps => display(fundamentals.book_value_per_share),
                    rps => display(fundamentals.revenue_per_share),
                    enterprise_value => display(fundamentals.enterprise_value),
                    ebitda => display(fundamentals.ebitda),
                    headlines => headlines,
                })
            })
            .map_err(template_error)
    }
}

fn display(value: Option<Decimal>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| v.round_dp(2).to_string())
}

fn template_error(err: minijinja::Error) -> InvestoError {
    InvestoError::Config(format!("insight prompt template: {err}"))
}
