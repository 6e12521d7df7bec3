use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use annual_allowance::config::{DEFAULT_BIND_ADDR, ServerConfig, rules_or_default};
use annual_allowance::core::{PlanSummary, TaxYearPlan, YearRecord, resolve_tapered_allowance};

#[derive(Parser, Debug)]
#[command(
    name = "annual-allowance",
    about = "UK pension annual allowance taper and carry-forward calculator"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "ALLOWANCE_RULES",
        help = "JSON rules table to use instead of the built-in UK rules"
    )]
    rules: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, env = "ALLOWANCE_BIND", default_value = DEFAULT_BIND_ADDR)]
        bind: SocketAddr,
    },
    /// Tapered allowance for one tax year.
    Taper {
        #[arg(long, default_value = "")]
        threshold_income: String,
        #[arg(long, default_value = "")]
        adjusted_income: String,
        #[arg(long, help = "Calendar year the tax year starts in, e.g. 2023 for 2023/24")]
        tax_year: i32,
    },
    /// Recompute a saved list of tax years and print it with a summary.
    Plan {
        #[arg(long, help = "JSON array of year records; omit to start a fresh plan")]
        input: Option<PathBuf>,
        #[arg(long, help = "Latest year of a fresh plan; defaults to the latest rules year")]
        current_year: Option<i32>,
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanOutput {
    years: Vec<YearRecord>,
    summary: Option<PlanSummary>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { bind } => {
            let config = ServerConfig::new(bind, cli.rules.as_deref())?;
            annual_allowance::api::run_http_server(config)
                .await
                .context("HTTP server failed")?;
        }
        Command::Taper {
            threshold_income,
            adjusted_income,
            tax_year,
        } => {
            let rules = rules_or_default(cli.rules.as_deref())?;
            let allowance =
                resolve_tapered_allowance(&rules, &threshold_income, &adjusted_income, tax_year);
            println!("{allowance}");
        }
        Command::Plan {
            input,
            current_year,
            pretty,
        } => {
            let rules = rules_or_default(cli.rules.as_deref())?;
            let records: Vec<YearRecord> = match &input {
                Some(path) => {
                    let json = fs::read_to_string(path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str(&json)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => Vec::new(),
            };

            let plan = TaxYearPlan::from_records(
                &rules,
                records,
                current_year.unwrap_or(rules.latest_year()),
            );
            let output = PlanOutput {
                summary: plan.summary(),
                years: plan.into_years(),
            };
            let json = if pretty {
                serde_json::to_string_pretty(&output)?
            } else {
                serde_json::to_string(&output)?
            };
            println!("{json}");
        }
    }
    Ok(())
}
