//! Home Assistant configuration checker
//!
//! Usage: `hass-check-config [-v] [CONFIG_DIR]`
//!
//! Loads `configuration.yaml`, merges packages, applies the core section and
//! validates every configured integration. Integrations are checked with
//! pass-through schemas, so only the core section, packages and file
//! structure are validated in depth.

use anyhow::Result;
use clap::Parser;
use ha_config::{
    default_config_dir, key_to_string, load_yaml_config_file, log_schema_error,
    merge_packages_config, notify_setup_error, process_component_config, process_ha_core_config,
    ConfigError, IntegrationLoader, IntegrationRegistry, SchemaComponent, Secrets,
    StaticIntegration, Value, CONF_PACKAGES, YAML_CONFIG_FILE,
};
use ha_core::HomeAssistant;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "hass-check-config")]
#[command(about = "Check a Home Assistant configuration directory")]
#[command(version = ha_core::VERSION)]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration directory (default: ~/.homeassistant)
    config_dir: Option<PathBuf>,
}

fn insert_domains<'a>(domains: &mut BTreeSet<String>, keys: impl Iterator<Item = &'a Value>) {
    for key in keys {
        let key = key_to_string(key);
        if let Some(domain) = key.split(' ').next() {
            domains.insert(domain.to_string());
        }
    }
}

/// Domains configured at the root or inside any package
fn configured_domains(config: &Value) -> BTreeSet<String> {
    let mut domains = BTreeSet::new();
    let Some(root) = config.as_mapping() else {
        return domains;
    };
    insert_domains(&mut domains, root.keys());

    let packages = config
        .get(ha_core::DOMAIN)
        .and_then(|core| core.get(CONF_PACKAGES))
        .and_then(Value::as_mapping);
    for package in packages.into_iter().flat_map(|p| p.values()) {
        if let Some(package) = package.as_mapping() {
            insert_domains(&mut domains, package.keys());
        }
    }

    domains.remove(ha_core::DOMAIN);
    domains
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config_dir = args.config_dir.unwrap_or_else(default_config_dir);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(args.verbose)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Testing configuration at {}", config_dir.display());

    let config_path = config_dir.join(YAML_CONFIG_FILE);
    let secrets = Secrets::new(&config_dir);
    let mut config = match tokio::task::spawn_blocking(move || {
        load_yaml_config_file(&config_path, Some(secrets))
    })
    .await?
    {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let registry = IntegrationRegistry::new();
    let domains = configured_domains(&config.data);
    for domain in &domains {
        registry.register(StaticIntegration::new(domain.as_str(), SchemaComponent::new()));
    }

    let mut failed = false;
    let mut hass = HomeAssistant::new(&config_dir);

    let core = config.data.get(ha_core::DOMAIN).cloned().unwrap_or(Value::Null);
    let packages = core
        .get(CONF_PACKAGES)
        .filter(|p| !p.is_null())
        .cloned()
        .unwrap_or_else(|| Value::Mapping(Default::default()));
    match merge_packages_config(&registry, &mut config, &packages).await {
        Ok(package_errors) => failed |= !package_errors.is_empty(),
        Err(e) => {
            error!("Invalid package configuration: {}", e);
            failed = true;
        }
    }

    let core = config.data.get(ha_core::DOMAIN).cloned().unwrap_or(Value::Null);
    let core = if core.is_null() {
        Value::Mapping(Default::default())
    } else {
        core
    };
    match process_ha_core_config(&mut hass, &core).await {
        Ok(()) => {}
        Err(ConfigError::Schema(e)) => {
            let core_tree = config
                .subtree(&[ha_config::PathSegment::Key(ha_core::DOMAIN.to_string())])
                .unwrap_or_default();
            log_schema_error(&e, ha_core::DOMAIN, &core_tree, Some(&mut hass), None);
            failed = true;
        }
        Err(e) => {
            error!("{}", e);
            failed = true;
        }
    }

    for domain in &domains {
        let integration = match registry.get_integration(domain).await {
            Ok(integration) => integration,
            Err(e) => {
                error!("{}", e);
                failed = true;
                continue;
            }
        };
        if let Err(e) = process_component_config(&registry, &config, integration.as_ref(), true).await {
            notify_setup_error(&mut hass, domain, integration.documentation());
            info!("{}", e);
            failed = true;
        }
    }

    if failed {
        error!("Configuration is invalid");
        return Ok(ExitCode::FAILURE);
    }
    info!(
        "Configuration is valid: {} integrations configured",
        domains.len()
    );
    Ok(ExitCode::SUCCESS)
}
