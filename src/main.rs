use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use portfolio_board::investor::SCORED_ANSWERS;
use portfolio_board::scheduler::start_refresh_scheduler;
use portfolio_board::sort::SortKey;
use portfolio_board::valuation::display_value;
use portfolio_board::{
    Config, Identity, LogFormat, PortfolioService, Questionnaire, SortState, ValuationRow,
};

#[derive(Parser)]
#[command(name = "portfolio_board")]
#[command(about = "Build a portfolio from a risk questionnaire and watch it live")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score a questionnaire, build a portfolio and save it
    Submit {
        #[arg(long)]
        email: String,
        /// The seven scored answers, comma separated
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        answers: Vec<i64>,
        /// Investment horizon in years
        #[arg(long)]
        horizon: u32,
        /// Initial investment in USD
        #[arg(long)]
        investment: f64,
        /// Number of assets to select
        #[arg(long)]
        size: u32,
    },
    /// Print the saved portfolio and its allocation
    Show {
        #[arg(long)]
        email: String,
    },
    /// Value the portfolio at live prices
    Board {
        #[arg(long)]
        email: String,
        /// Column to sort by; repeat to click the header again
        #[arg(long = "sort")]
        sort: Vec<SortKey>,
        /// Keep refreshing until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
    /// Delete the saved portfolio and answers
    Delete {
        #[arg(long)]
        email: String,
    },
    /// List users that have a saved portfolio
    Owners,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false).with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing(config.log_format);

    let cli = Cli::parse();
    let service = Arc::new(PortfolioService::from_config(&config)?);

    match cli.command {
        Command::Submit {
            email,
            answers,
            horizon,
            investment,
            size,
        } => {
            let answers: [i64; SCORED_ANSWERS] = match answers.try_into() {
                Ok(a) => a,
                Err(given) => bail!("expected {} answers, got {}", SCORED_ANSWERS, given.len()),
            };
            let questionnaire =
                Questionnaire::new(Identity::parse(&email)?, answers, horizon, investment, size)?;
            let submission = service.submit(questionnaire).await?;

            println!("[SCORE] {}", submission.score);
            println!("[LAMBDA] {:.6}", submission.lambda);
            print_allocation(&submission.portfolio, investment);
        }
        Command::Show { email } => {
            let identity = Identity::parse(&email)?;
            let portfolio = service.portfolio(&identity).await?;
            let initial = match service.preferences(&identity).await {
                Ok(q) => q.initial_investment,
                Err(e) if e.is_not_found() => 0.0,
                Err(e) => return Err(e.into()),
            };
            print_allocation(&portfolio, initial);
        }
        Command::Board { email, sort, watch } => {
            let identity = Identity::parse(&email)?;
            let mut state = SortState::new();
            for key in sort {
                state.select(key);
            }

            let rows = service.board(&identity).await?;
            print_board(&rows, &state);

            if watch {
                let handle = start_refresh_scheduler(service.clone(), config.refresh_interval);
                let mut shown = service.cache().get(&identity).await.and_then(|c| c.refreshed_at);
                let mut poll = tokio::time::interval(Duration::from_secs(1));
                loop {
                    tokio::select! {
                        _ = poll.tick() => {
                            let Some(cached) = service.cache().get(&identity).await else {
                                continue;
                            };
                            if cached.refreshed_at != shown {
                                shown = cached.refreshed_at;
                                print_board(&cached.rows, &state);
                            }
                        }
                        res = tokio::signal::ctrl_c() => {
                            res.context("failed to listen for Ctrl-C")?;
                            break;
                        }
                    }
                }
                handle.abort();
                service.logout(&identity).await;
            }
        }
        Command::Delete { email } => {
            let identity = Identity::parse(&email)?;
            service.delete_portfolio(&identity).await?;
            println!("[DELETED] {}", identity);
        }
        Command::Owners => {
            for owner in service.owners().await? {
                println!("{}", owner);
            }
        }
    }

    Ok(())
}

fn print_allocation(portfolio: &portfolio_board::Portfolio, initial_investment: f64) {
    println!("{:<8} {:>8} {:>14}", "SYMBOL", "WEIGHT", "ALLOCATION");
    for (symbol, amount) in portfolio.allocations(initial_investment) {
        let weight = portfolio.weight_of(&symbol).unwrap_or_default();
        println!("{:<8} {:>7.2}% {:>14.2}", symbol, weight * 100.0, amount);
    }
}

fn print_board(rows: &[ValuationRow], state: &SortState) {
    let header: Vec<String> = SortKey::ALL
        .iter()
        .map(|k| format!("{}{}", k.name().to_uppercase(), state.indicator(*k)))
        .collect();
    println!(
        "{:<8} {:<24} {:>10} {:>9} {:>14} {:>9} {:>17} {:>12} {:>11}",
        header[0], header[1], header[2], header[3], header[4], header[5], header[6], header[7], header[8]
    );

    for row in state.apply(rows) {
        println!(
            "{:<8} {:<24} {:>10} {:>9} {:>14} {:>9} {:>17} {:>12} {:>11}",
            row.symbol,
            truncate(&row.company_name, 24),
            display_value(row.price, 2),
            display_value(row.change_percent, 2),
            display_value(row.market_cap, 0),
            display_value(Some(row.weight_in_portfolio * 100.0), 2),
            display_value(row.weighted_change_usd, 2),
            display_value(row.units_owned, 4),
            display_value(row.price_buy, 2),
        );
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width - 1).collect();
    cut.push('…');
    cut
}
