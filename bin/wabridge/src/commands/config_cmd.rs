use wabridge_core::{Config, Paths};

/// Show the effective configuration (file plus environment overrides).
pub async fn show() -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = Config::load_or_default(&paths)?;
    if !config.gateway.basic_auth.password.is_empty() {
        config.gateway.basic_auth.password = "********".to_string();
    }
    let json = serde_json::to_value(&config)?;

    println!();
    println!("Current Configuration");
    println!("  File: {}", paths.config_file().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Write the default configuration so it can be edited in place.
pub async fn init(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config_path = paths.config_file();

    if config_path.exists() && !force {
        println!("Config already exists at {}", config_path.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    paths.ensure_dirs()?;
    Config::default().save(&config_path)?;

    println!("Wrote {}", config_path.display());
    println!("Set gateway.basicAuth (or BASIC_AUTH_USERNAME / BASIC_AUTH_PASSWORD) before starting the gateway.");
    Ok(())
}
