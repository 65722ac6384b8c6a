use std::str::FromStr;

use anyhow::Context;
use bigdecimal::BigDecimal;
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use connector_policy::{
    ConnectorPolicyConfig, DefaultSource, EnvSource, FileSource, LayeredSource, PolicySource,
    DEFAULT_ENV_PREFIX,
};
use connector_risk::{outgoing_expiry, quote_rate, slippage_ratio, validate_payment};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "connector-policy")]
#[command(about = "Resolve and exercise a connector's risk and pricing policy", long_about = None)]
struct Cli {
    /// Policy override file (YAML for .yaml/.yml, JSON otherwise)
    #[arg(long, env = "CONNECTOR_POLICY_CONFIG")]
    config: Option<String>,

    /// Prefix of the environment variables read as the top override layer
    #[arg(long, default_value = DEFAULT_ENV_PREFIX)]
    env_prefix: String,

    /// Ignore policy overrides from the environment
    #[arg(long)]
    no_env: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the resolved policy
    Show {
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// Validate the policy and exit non-zero on error
    Check,
    /// Expiry of the outgoing transfer for an incoming expiry (RFC 3339)
    Expiry {
        #[arg(long)]
        incoming: String,
    },
    /// Apply the FX spread to a raw rate
    Quote {
        #[arg(long)]
        rate: String,
    },
    /// Check a settled amount against its quote
    Validate {
        #[arg(long)]
        quoted: String,
        #[arg(long)]
        actual: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

fn build_source(cli: &Cli) -> LayeredSource {
    let mut source = LayeredSource::new().with(DefaultSource);
    if let Some(path) = &cli.config {
        source.push(Box::new(FileSource::new(path)));
    }
    if !cli.no_env {
        source.push(Box::new(EnvSource::new(cli.env_prefix.clone())));
    }
    source
}

fn parse_decimal(name: &str, raw: &str) -> anyhow::Result<BigDecimal> {
    BigDecimal::from_str(raw.trim()).with_context(|| format!("invalid {name} {raw:?}"))
}

fn render(policy: &ConnectorPolicyConfig, format: Format) -> anyhow::Result<String> {
    let overrides = policy.to_overrides();
    Ok(match format {
        Format::Json => serde_json::to_string_pretty(&overrides)?,
        Format::Yaml => serde_yaml::to_string(&overrides)?,
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let source = build_source(&cli);
    let policy = source
        .load()
        .with_context(|| format!("loading connector policy from {}", source.describe()))?;

    match cli.command {
        Commands::Show { format } => println!("{}", render(&policy, format)?.trim_end()),
        Commands::Check => println!("ok"),
        Commands::Expiry { incoming } => {
            let incoming: DateTime<Utc> = DateTime::parse_from_rfc3339(&incoming)
                .with_context(|| format!("invalid incoming expiry {incoming:?}"))?
                .with_timezone(&Utc);
            let outgoing = outgoing_expiry(incoming, &policy)?;
            println!("{}", outgoing.to_rfc3339_opts(SecondsFormat::AutoSi, true));
        }
        Commands::Quote { rate } => {
            let raw = parse_decimal("rate", &rate)?;
            println!("{}", quote_rate(&raw, &policy)?.normalized());
        }
        Commands::Validate { quoted, actual } => {
            let quoted = parse_decimal("quoted amount", &quoted)?;
            let actual = parse_decimal("actual amount", &actual)?;
            let ratio = slippage_ratio(&quoted, &actual)?;
            validate_payment(&quoted, &actual, &policy).context("payment rejected")?;
            println!("accepted (slippage {})", ratio.normalized());
        }
    }
    Ok(())
}
