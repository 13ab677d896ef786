//! secrets-provider-mount entry point

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use secrets_provider_client::config::{Config, MountConfig};
use secrets_provider_client::mount::{MountOrchestrator, MountParams, ObjectVersions};
use secrets_provider_client::{PluginClientBuilder, ProviderError};

/// Print usage information
fn print_usage() {
    eprintln!("Usage: secrets-provider-mount <config.yaml>");
    eprintln!();
    eprintln!("secrets-provider-mount - mount secrets from provider plugins once");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml    Path to configuration file");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  secrets-provider-mount /etc/secrets-provider/mounts.yaml");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);

    // Load configuration
    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("secrets-provider-mount starting");
    info!("Loaded configuration from {:?}", config_path);

    let clients = PluginClientBuilder::new(
        config.providers.socket_dir.clone(),
        config.providers.retry.clone(),
    );
    let orchestrator = MountOrchestrator::default();

    let mut results: BTreeMap<PathBuf, ObjectVersions> = BTreeMap::new();
    let mut failures = 0;

    for mount_config in &config.mounts {
        info!(
            "Mounting provider {:?} at {:?}",
            mount_config.provider, mount_config.target_path
        );

        match mount_one(&clients, &orchestrator, &config, mount_config).await {
            Ok(versions) => {
                results.insert(mount_config.target_path.clone(), versions);
            }
            Err(e) => {
                error!(
                    code = e.code(),
                    "Failed to mount {:?}: {}", mount_config.target_path, e
                );
                failures += 1;
            }
        }
    }

    clients.cleanup();

    print!("{}", serde_yaml::to_string(&results)?);

    if failures > 0 {
        error!("{} of {} mount(s) failed", failures, config.mounts.len());
        std::process::exit(1);
    }

    info!("{} mount(s) completed", results.len());
    Ok(())
}

/// Run a single configured mount
async fn mount_one(
    clients: &PluginClientBuilder,
    orchestrator: &MountOrchestrator,
    config: &Config,
    mount_config: &MountConfig,
) -> Result<ObjectVersions, ProviderError> {
    let client = clients.get(&mount_config.provider).await?;

    let params = MountParams {
        attributes: mount_config.attributes.clone(),
        secrets: mount_config.secrets.clone(),
        target_path: mount_config.target_path.clone(),
        permission: mount_config.permission.clone(),
        timeout: Some(config.providers.mount_timeout),
    };

    let outcome = orchestrator
        .mount_content(&client, &params, &mount_config.object_versions)
        .await?;

    if let Some(e) = &outcome.cleanup_error {
        warn!(
            "Mount of {:?} succeeded but stale files may remain: {}",
            mount_config.target_path, e
        );
    }

    Ok(outcome.object_versions)
}
