use crate::config::CONFIG_PATH_ENV;
use crate::logging::LogFormat;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "secretless",
    version,
    about = "Credential-injecting proxy for databases, HTTP APIs and SSH"
)]
pub struct Cli {
    /// Log at debug level.
    #[arg(long, global = true, env = "SECRETLESS_DEBUG")]
    pub debug: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start every configured listener.
    Proxy(ProxyOpts),
    /// Run a command with secrets in its environment.
    Run(RunOpts),
    Config(ConfigOpts),
    Version,
}

#[derive(clap::Args)]
pub struct ProxyOpts {
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    pub config: Option<String>,
}

#[derive(clap::Args)]
pub struct RunOpts {
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    pub config: Option<String>,
    /// Secrets map to resolve.
    #[arg(short = 'f', long, default_value = "secrets.yml")]
    pub secrets: String,
    /// Provider that `!var` entries read from.
    #[arg(short, long)]
    pub provider: Option<String>,
    #[arg(trailing_var_arg = true, required = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(clap::Args)]
pub struct ConfigOpts {
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    pub config: Option<String>,
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Show,
    Validate,
}
