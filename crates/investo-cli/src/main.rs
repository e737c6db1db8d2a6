//! Command-line interface for investomommy
//!
//! # Usage
//!
//! ```bash
//! export FMP_API_KEY="your-fmp-key"
//! export OPENAI_API_KEY="your-openai-key"
//!
//! investo search apple
//! investo add AAPL 10 187.50
//! investo portfolio
//! investo detail MSFT
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL};
use investo_core::{
    HoldingView, InsightStatus, InvestoConfig, InvestoService, PortfolioSnapshot, StockDetail,
    SymbolMatch,
};
use investo_llm::providers::{OpenAIConfig, OpenAIProvider};
use investo_utils::{LogFormat, env_string, init_tracing_with};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "investo")]
#[command(about = "Paper-portfolio tracker with valuation multiples and AI insights", long_about = None)]
struct Args {
    /// Portfolio owner
    #[arg(short, long, global = true, env = "INVESTO_USER", default_value_t = 1)]
    user: i64,

    /// Holding store URL, e.g. sqlite://investo.db
    #[arg(long, global = true)]
    db: Option<String>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Log output format (pretty or json)
    #[arg(long, global = true, env = "INVESTO_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search tickers by symbol or company name
    Search {
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Quote, multiples, price history and AI insight for one ticker
    Detail {
        symbol: String,
        /// Skip the AI insight
        #[arg(long)]
        no_insight: bool,
    },
    /// Current value and gain/loss of every holding
    Portfolio,
    /// List holdings without pricing them
    Holdings,
    /// Buy shares at a price
    Add {
        symbol: String,
        shares: u64,
        price: Decimal,
    },
    /// Sell shares at a price
    Sell {
        symbol: String,
        shares: u64,
        price: Decimal,
    },
    /// Overwrite the share count of a holding
    Update { id: i64, shares: u64 },
    /// Delete a holding
    Remove { id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing_with(args.log_format, "warn,investo_core=info");

    let mut builder = InvestoConfig::builder();
    if let Some(db) = &args.db {
        builder = builder.database_url(db);
    }
    let config = builder
        .with_env()?
        .build()
        .context("invalid configuration")?;

    let provider = match OpenAIProvider::from_env() {
        Ok(provider) => provider,
        Err(e) => {
            // Local OpenAI-compatible servers accept any key
            warn!(error = %e, "OPENAI_API_KEY not set, sending a placeholder key");
            let mut openai = OpenAIConfig::new("not-needed");
            if let Some(base) = env_string("OPENAI_API_BASE") {
                openai = openai.with_api_base(base);
            }
            OpenAIProvider::with_config(openai)?
        }
    };

    let service = InvestoService::connect(config, Arc::new(provider)).await?;
    info!(user = args.user, command = ?args.command, "Running command");

    let user = args.user;
    match args.command {
        Command::Search { query, limit } => {
            let matches = service.search_stocks(&query, limit).await?;
            emit(args.json, &matches, || search_table(&matches))?;
        }
        Command::Detail { symbol, no_insight } => {
            let detail = service.get_stock_detail(&symbol, !no_insight).await?;
            emit(args.json, &detail, || detail_text(&detail))?;
        }
        Command::Portfolio => {
            let snapshot = service.get_portfolio_snapshot(user).await?;
            emit(args.json, &snapshot, || portfolio_table(&snapshot))?;
        }
        Command::Holdings => {
            let holdings = service.list_holdings(user).await?;
            emit(args.json, &holdings, || {
                let mut table =
                    new_table(&["ID", "Symbol", "Name", "Shares", "Avg cost", "Since"]);
                for h in &holdings {
                    table.add_row(vec![
                        h.id.to_string(),
                        h.symbol.clone(),
                        h.company_name.clone().unwrap_or_default(),
                        h.shares.to_string(),
                        money(h.average_cost),
                        h.created_at.format("%Y-%m-%d").to_string(),
                    ]);
                }
                table.to_string()
            })?;
        }
        Command::Add {
            symbol,
            shares,
            price,
        } => {
            let holding = service.add_holding(user, &symbol, shares, price).await?;
            emit(args.json, &holding, || {
                format!(
                    "{} now {} shares at {} average (id {})",
                    holding.symbol,
                    holding.shares,
                    money(holding.average_cost),
                    holding.id
                )
            })?;
        }
        Command::Sell {
            symbol,
            shares,
            price,
        } => {
            let sale = service.sell_holding(user, &symbol, shares, price).await?;
            emit(args.json, &sale, || {
                let left = sale
                    .remaining
                    .as_ref()
                    .map_or(0, |holding| holding.shares);
                format!(
                    "Sold {} shares, realized {}, {} left",
                    sale.shares_sold,
                    money(sale.realized_gain_loss),
                    left
                )
            })?;
        }
        Command::Update { id, shares } => {
            let holding = service.update_holding(user, id, shares).await?;
            emit(args.json, &holding, || {
                format!("{} now {} shares", holding.symbol, holding.shares)
            })?;
        }
        Command::Remove { id } => {
            service.remove_holding(user, id).await?;
            if !args.json {
                println!("Removed holding {id}");
            }
        }
    }

    Ok(())
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(header.to_vec());
    table
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

fn opt(value: Option<Decimal>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.round_dp(2).to_string())
}

fn pct(value: Option<Decimal>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}%", v.round_dp(2)))
}

fn search_table(matches: &[SymbolMatch]) -> String {
    let mut table = new_table(&["Symbol", "Name", "Exchange"]);
    for m in matches {
        table.add_row(vec![
            m.symbol.clone(),
            m.name.clone(),
            m.exchange_short_name
                .clone()
                .or_else(|| m.exchange.clone())
                .unwrap_or_default(),
        ]);
    }
    table.to_string()
}

fn holding_row(view: &HoldingView) -> Vec<String> {
    vec![
        view.holding.id.to_string(),
        view.holding.symbol.clone(),
        view.holding.company_name.clone().unwrap_or_default(),
        view.holding.shares.to_string(),
        money(view.holding.average_cost),
        opt(view.current_price),
        opt(view.market_value),
        opt(view.gain_loss),
        pct(view.gain_loss_pct),
    ]
}

fn portfolio_table(snapshot: &PortfolioSnapshot) -> String {
    let mut table = new_table(&[
        "ID", "Symbol", "Name", "Shares", "Avg cost", "Price", "Value", "Gain/Loss", "%",
    ]);
    for view in &snapshot.holdings {
        table.add_row(holding_row(view));
    }

    let mut out = table.to_string();
    out.push_str(&format!(
        "\nValue {}  Cost {}  Gain/Loss {} ({})",
        money(snapshot.total_market_value),
        money(snapshot.total_cost_basis),
        money(snapshot.total_gain_loss),
        pct(snapshot.total_gain_loss_pct),
    ));
    if !snapshot.is_complete() {
        let missing: Vec<_> = snapshot.incomplete_symbols.iter().cloned().collect();
        out.push_str(&format!("\nNo price for: {}", missing.join(", ")));
    }
    out
}

fn detail_text(detail: &StockDetail) -> String {
    let mut out = format!(
        "{} {}\nPrice {}\n",
        detail.symbol,
        detail.quote.name.as_deref().unwrap_or_default(),
        money(detail.quote.price)
    );

    let mut multiples = new_table(&["P/E", "P/B", "P/S", "EV/EBITDA"]);
    multiples.add_row(vec![
        opt(detail.multiples.pe),
        opt(detail.multiples.pb),
        opt(detail.multiples.ps),
        opt(detail.multiples.ev_ebitda),
    ]);
    out.push_str(&multiples.to_string());
    out.push('\n');

    match &detail.historical_series {
        Some(series) => {
            if let (Some(first), Some(last)) = (series.first(), series.last()) {
                out.push_str(&format!(
                    "History {} to {}: {} -> {} ({})\n",
                    first.date,
                    last.date,
                    money(first.close),
                    money(last.close),
                    pct(investo_core::percent_change(first.close, last.close)),
                ));
            }
        }
        None => out.push_str("History unavailable\n"),
    }

    match (&detail.insight, &detail.insight_status) {
        (Some(insight), _) => {
            out.push_str(&format!(
                "\nSentiment {:?} ({:.2}): {}\n",
                insight.sentiment_label, insight.sentiment_score, insight.sentiment_rationale
            ));
            out.push_str(&format!(
                "Valuation {:?}: {}\n",
                insight.recommendation, insight.valuation_commentary
            ));
            for point in &insight.key_insights {
                out.push_str(&format!("  * {point}\n"));
            }
            for headline in &insight.top_headlines {
                out.push_str(&format!("  - {} ({})\n", headline.title, headline.url));
            }
        }
        (None, InsightStatus::Failed { reason }) => {
            out.push_str(&format!("\nInsight unavailable: {reason}\n"));
        }
        (None, _) => {}
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_add_with_globals() {
        let args = Args::try_parse_from([
            "investo", "--user", "7", "--json", "add", "aapl", "10", "187.50",
        ])
        .unwrap();

        assert_eq!(args.user, 7);
        assert!(args.json);
        match args.command {
            Command::Add {
                symbol,
                shares,
                price,
            } => {
                assert_eq!(symbol, "aapl");
                assert_eq!(shares, 10);
                assert_eq!(price, Decimal::new(18750, 2));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_detail_no_insight_flag() {
        let args = Args::try_parse_from(["investo", "detail", "MSFT", "--no-insight"]).unwrap();
        assert!(matches!(args.command, Command::Detail { no_insight: true, .. }));
    }

    #[test]
    fn test_fractional_shares_rejected() {
        assert!(Args::try_parse_from(["investo", "sell", "AAPL", "1.5", "100"]).is_err());
    }

    #[test]
    fn test_holding_row_shows_company_name() {
        let now = "2024-03-04T15:30:00Z".parse().unwrap();
        let view = HoldingView {
            holding: investo_core::Holding {
                id: 3,
                user_id: 1,
                symbol: "AAPL".to_string(),
                company_name: Some("Apple Inc.".to_string()),
                shares: 10,
                average_cost: Decimal::new(100, 0),
                created_at: now,
                updated_at: now,
            },
            cost_basis: Decimal::new(1000, 0),
            current_price: None,
            market_value: None,
            gain_loss: None,
            gain_loss_pct: None,
        };

        let row = holding_row(&view);
        assert_eq!(row[1], "AAPL");
        assert_eq!(row[2], "Apple Inc.");
        assert_eq!(row[5], "-");
    }

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(Decimal::new(110, 0)), "110.00");
        assert_eq!(pct(Some(Decimal::new(123_456, 4))), "12.35%");
        assert_eq!(opt(None), "-");
    }
}
