use clap::{Args, Parser};
use metrics_exporter_statsd::StatsdBuilder;
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::{Config, LoggingConfig, MetricsConfig};

#[derive(Parser)]
enum CliCommand {
    /// Run the gateway and its admin listener
    Proxy(ConfigArgs),
    /// Load and validate a config file, then exit
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Proxy(args) => {
            let config = Config::load(&args.config_file_path, env_lookup)?;

            let _sentry = init_logging(config.common.logging.as_ref());
            if let Some(metrics) = &config.common.metrics {
                init_metrics(metrics)?;
            }

            tracing::info!(
                primary = %config.gateway.upstreams.primary,
                secondary = %config.gateway.upstreams.secondary,
                "starting gateway"
            );

            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            rt.block_on(gateway::run(config.gateway))?;
        }
        CliCommand::CheckConfig(args) => {
            let config = Config::load(&args.config_file_path, env_lookup)?;
            println!(
                "config ok: {} route(s), primary {}, secondary {}",
                config.gateway.routes.len(),
                config.gateway.upstreams.primary,
                config.gateway.upstreams.secondary
            );
        }
    }

    Ok(())
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Installs the tracing subscriber. The returned guard flushes Sentry on drop.
fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(guard.is_some().then(sentry::integrations::tracing::layer))
        .init();

    guard
}

fn init_metrics(metrics: &MetricsConfig) -> Result<(), Box<dyn Error>> {
    let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some("cloudretail"))?;
    metrics::set_global_recorder(recorder).map_err(|e| e.to_string())?;
    shared::metrics_defs::describe_all(gateway::metrics_defs::ALL_METRICS);

    Ok(())
}
