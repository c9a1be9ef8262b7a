use clap::Parser;
use secretless::cli::{Cli, Commands, ConfigAction};
use secretless::config::{validate_config, validate_config_object, Config};
use secretless::logging;
use secretless::proxy::Proxy;
use secretless::summon;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.debug, cli.log_format);

    match cli.command {
        Commands::Proxy(opts) => {
            info!("Secretless v{} starting up...", env!("CARGO_PKG_VERSION"));
            let config = Config::load(opts.config.as_deref())?;
            if let Err(e) = validate_config_object(&config) {
                error!("{}", e);
                std::process::exit(1);
            }
            if let Err(e) = Proxy::new(config).run().await {
                error!("{}", e);
                std::process::exit(1);
            }
        }
        Commands::Run(opts) => {
            let config = Config::load_optional(opts.config.as_deref())?.unwrap_or_default();
            let content = std::fs::read_to_string(&opts.secrets)
                .map_err(|e| anyhow::anyhow!("Unable to read secrets map '{}': {}", opts.secrets, e))?;
            let secrets = summon::parse_secrets(&content)?;

            let proxy = Proxy::new(config);
            let providers = proxy.load_providers().await?;
            let code = summon::run(&providers, opts.provider.as_deref(), &secrets, &opts.command)
                .await?;
            std::process::exit(code);
        }
        Commands::Config(opts) => {
            let config = Config::load(opts.config.as_deref())?;
            match opts.action {
                ConfigAction::Show => {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                }
                ConfigAction::Validate => {
                    let errors = validate_config(&config);
                    if !errors.is_empty() {
                        for e in &errors {
                            error!("{}", e);
                        }
                        std::process::exit(1);
                    }
                    info!("Configuration is valid");
                }
            }
        }
        Commands::Version => {
            println!("secretless {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
