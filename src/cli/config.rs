//! Configuration commands
//!
//! Interactive first-time setup plus inspection of the active configuration.

use burrow_core::config::toml_config::{self, TomlConfig};
use burrow_core::config::{InstallMode, TunnelConfig};
use burrow_core::error::{BurrowError, ConfigError};
use burrow_core::types::{Credentials, ENV_SECRET, ENV_USER_TOKEN};
use burrow_core::vpn::PollingPolicy;
use colored::Colorize;
use std::io::{self, Write};

/// Run the config init command
pub fn run_config_init() -> Result<(), BurrowError> {
    println!("burrow setup");
    println!("============");
    println!();
    println!("Configuration will be saved to {}", toml_config::get_config_path()?.display());
    println!(
        "The client secret is never stored; export {} before running `burrow up`.",
        ENV_SECRET
    );
    println!();

    if toml_config::config_exists()? {
        println!("{} Existing configuration detected.", "!".yellow());
        if !prompt_yes_no("Overwrite existing configuration?", false)? {
            println!("Setup cancelled.");
            return Ok(());
        }
        println!();
    }

    let tunnel = collect_tunnel_config()?;
    let config = TomlConfig::new(tunnel, PollingPolicy::default());

    println!();
    toml_config::save_config(&config)?;
    println!("{} Configuration saved", "✓".green());
    println!();
    println!("You can now use:");
    println!("  burrow config show  - Review the configuration");
    println!("  burrow up           - Bring the tunnel up");

    Ok(())
}

/// Run the config show command
pub fn run_config_show() -> Result<(), BurrowError> {
    let path = toml_config::get_config_path()?;
    let config = toml_config::load_config()?;

    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(&config)?);
    println!();
    println!("# {}: {}", ENV_SECRET, env_state(ENV_SECRET));
    println!("# {}: {}", ENV_USER_TOKEN, env_state(ENV_USER_TOKEN));
    Ok(())
}

/// Run the config validate command
pub fn run_config_validate() -> Result<(), BurrowError> {
    let config = toml_config::load_config()?;
    println!("{} Configuration is valid", "✓".green());
    println!("  endpoint:      {}", config.tunnel.endpoint);
    println!("  install mode:  {:?}", config.tunnel.install_mode);
    println!("  status poll:   every {} ms", config.polling.status_interval_ms);

    if Credentials::from_env().is_none() {
        println!("{} {} is not set", "✗".red(), ENV_SECRET);
        return Err(ConfigError::MissingField {
            field: ENV_SECRET.to_string(),
        }
        .into());
    }
    println!("{} Credentials found in the environment", "✓".green());
    Ok(())
}

fn env_state(name: &str) -> &'static str {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => "set",
        _ => "not set",
    }
}

/// Collect tunnel configuration interactively
fn collect_tunnel_config() -> Result<TunnelConfig, BurrowError> {
    println!("Tunnel Configuration:");
    println!("---------------------");

    let endpoint = prompt_required("Control plane endpoint", "https://pangolin.example.com")?;
    let id = prompt_required("Client id", "")?;
    let org_id = prompt_optional("Organization id (optional)", "")?;

    let mut config = TunnelConfig::new(endpoint, id);
    config.org_id = Some(org_id).filter(|org| !org.is_empty());

    config.mtu = prompt_optional("MTU", &config.mtu.to_string())?
        .parse()
        .map_err(|_| ConfigError::ValidationError {
            message: "Invalid MTU".to_string(),
        })?;
    config.override_dns = prompt_yes_no("Send all DNS queries through the tunnel?", false)?;
    config.install_mode = if prompt_yes_no("Keep a persisted VPN profile?", false)? {
        InstallMode::Profile
    } else {
        InstallMode::DeviceNode
    };

    config
        .validate()
        .map_err(|message| ConfigError::ValidationError {
            message: format!("Configuration validation failed: {}", message),
        })?;

    Ok(config)
}

/// Prompt for a required value with default
fn prompt_required(prompt: &str, default: &str) -> Result<String, BurrowError> {
    let prompt_text = if default.is_empty() {
        format!("{}: ", prompt)
    } else {
        format!("{} [{}]: ", prompt, default)
    };

    loop {
        let input = prompt_input(&prompt_text)?;

        if input.trim().is_empty() {
            if !default.is_empty() {
                return Ok(default.to_string());
            }
            println!("{} This field is required. Please enter a value.", "✗".red());
            continue;
        }

        return Ok(input.trim().to_string());
    }
}

/// Prompt for an optional value
fn prompt_optional(prompt: &str, default: &str) -> Result<String, BurrowError> {
    let prompt_text = format!("{} [{}]: ", prompt, default);
    let input = prompt_input(&prompt_text)?;

    if input.trim().is_empty() {
        Ok(default.to_string())
    } else {
        Ok(input.trim().to_string())
    }
}

/// Prompt for yes/no with default
fn prompt_yes_no(prompt: &str, default_yes: bool) -> Result<bool, BurrowError> {
    let default_indicator = if default_yes { "[Y/n]" } else { "[y/N]" };
    let prompt_text = format!("{} {}: ", prompt, default_indicator);

    loop {
        let input = prompt_input(&prompt_text)?.to_lowercase();

        match input.as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            "" => return Ok(default_yes),
            _ => println!("Please enter 'y' for yes or 'n' for no."),
        }
    }
}

/// Low-level input prompting
fn prompt_input(prompt: &str) -> Result<String, BurrowError> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim_end().to_string())
}
