//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_info, print_success, print_warning};
use pp_core::config::{self, OrchestratorConfig};

fn resolve(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Get a config value by key
pub fn config_get(config_path: Option<&Path>, key: &str) -> Result<()> {
    let path = resolve(config_path);

    if !path.exists() {
        print_info("Run 'proxy-pilot config init' to create one");
        anyhow::bail!("Config file not found: {:?}", path);
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let table: toml::Table =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Navigate through the key path (e.g., "timeouts.rotate")
    let mut current: &toml::Value = &toml::Value::Table(table);
    for part in key.split('.') {
        current = current
            .as_table()
            .and_then(|t| t.get(part))
            .ok_or_else(|| anyhow::anyhow!("Key not found: {}", key))?;
    }

    match current {
        toml::Value::String(s) => println!("{}", s),
        toml::Value::Integer(i) => println!("{}", i),
        toml::Value::Float(f) => println!("{}", f),
        toml::Value::Boolean(b) => println!("{}", b),
        toml::Value::Array(a) => {
            for item in a {
                println!("{}", item);
            }
        }
        toml::Value::Table(_) => {
            // Print sub-table as TOML
            println!("{}", toml::to_string_pretty(current)?);
        }
        toml::Value::Datetime(d) => println!("{}", d),
    }

    Ok(())
}

/// Set a config value by key
///
/// The result must still parse as an orchestrator config; otherwise the
/// file is left untouched.
pub fn config_set(config_path: Option<&Path>, key: &str, value: &str) -> Result<()> {
    let path = resolve(config_path);

    // Create default config if it doesn't exist
    if !path.exists() {
        print_info("Creating default configuration...");
        config_init(config_path, false)?;
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut table: toml::Table =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    let parts: Vec<&str> = key.split('.').collect();
    let (last_key, parents) = parts
        .split_last()
        .filter(|(last, _)| !last.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Invalid key: key path cannot be empty"))?;

    // Navigate/create path to the parent
    let mut current = &mut table;
    for part in parents {
        current = current
            .entry(part.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()))
            .as_table_mut()
            .ok_or_else(|| anyhow::anyhow!("Cannot navigate to key: {}", key))?;
    }

    // Set the value (try to parse as appropriate type)
    let toml_value = if value == "true" {
        toml::Value::Boolean(true)
    } else if value == "false" {
        toml::Value::Boolean(false)
    } else if let Ok(i) = value.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(f) = value.parse::<f64>() {
        toml::Value::Float(f)
    } else {
        toml::Value::String(value.to_string())
    };
    current.insert(last_key.to_string(), toml_value);

    let new_content = toml::to_string_pretty(&table)?;
    toml::from_str::<OrchestratorConfig>(&new_content)
        .with_context(|| format!("Refusing to set {} = {}", key, value))?;

    std::fs::write(&path, new_content)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Set {} = {}", key, value));
    Ok(())
}

/// Show current configuration
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Built-in defaults:");
        println!();
        println!("{}", toml::to_string_pretty(&OrchestratorConfig::default())?);
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    println!("{}", content);

    Ok(())
}

/// Initialize default configuration
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let config_file = resolve(config_path);

    if config_file.exists() && !force {
        print_info("Use --force to overwrite");
        anyhow::bail!("Config file already exists: {:?}", config_file);
    }

    let body = toml::to_string_pretty(&OrchestratorConfig::default())?;
    let content = format!("{}\n{}", CONFIG_HEADER, body);

    if let Some(dir) = config_file.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
            print_success(&format!("Created config directory: {:?}", dir));
        }
    }

    std::fs::write(&config_file, content)
        .with_context(|| format!("Failed to write config file: {:?}", config_file))?;

    print_success(&format!("Created configuration file: {:?}", config_file));
    Ok(())
}

const CONFIG_HEADER: &str = "\
# Proxy Pilot configuration
#
# backend.mode: \"script\" drives modems and proxies through backend.script_path,
#               \"simulated\" runs against in-memory modems.
# tunnel.args:  \"{port}\" is replaced with the proxy port.
# Durations are in seconds. refresh_interval = 0 disables periodic refresh.
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_set_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        config_init(Some(&path), false).unwrap();
        config_set(Some(&path), "timeouts.rotate", "120").unwrap();
        config_set(Some(&path), "backend.mode", "simulated").unwrap();

        let loaded: OrchestratorConfig = config::load_config(&path).unwrap();
        assert_eq!(loaded.timeouts.rotate, std::time::Duration::from_secs(120));
        assert_eq!(loaded.backend.mode, config::BackendMode::Simulated);
    }

    #[test]
    fn test_set_rejects_values_that_break_the_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        config_init(Some(&path), false).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        assert!(config_set(Some(&path), "ipc_port", "not-a-port").is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        config_init(Some(&path), false).unwrap();
        assert!(config_init(Some(&path), false).is_err());
        assert!(config_init(Some(&path), true).is_ok());
    }
}
