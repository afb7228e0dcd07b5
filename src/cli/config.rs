use std::fs;
use std::path::PathBuf;

const DEFAULT_SETTINGS: &str = "\
# udaq settings
#
# Paths of the delimited configuration tables. Both are watched for changes
# and hot-reloaded while the service runs. $env{VAR} references are expanded.
fields_path: udaq_fields.csv
connections_path: udaq_connections.csv

# Listen address for the line-based consumer broadcast.
broadcast_listen: 127.0.0.1:9069
";

/// Write a default settings file, or print it with `--stdout`.
pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    if stdout {
        print!("{}", DEFAULT_SETTINGS);
        return Ok(());
    }

    let settings_path = match dirs::home_dir() {
        Some(home_dir) => home_dir.join(".config/udaq/udaq.yml"),
        None => PathBuf::from("/etc/udaq/udaq.yml"),
    };

    if settings_path.exists() {
        eprintln!(
            "Error: settings file already exists at {}",
            settings_path.display()
        );
        eprintln!("Remove it first or use --stdout to print the settings");
        std::process::exit(1);
    }

    if let Some(parent) = settings_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&settings_path, DEFAULT_SETTINGS)?;

    println!("Settings file written to {}", settings_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_default_settings_template_parses() {
        let settings: Settings = serde_yaml::from_str(DEFAULT_SETTINGS).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
