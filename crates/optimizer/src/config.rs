//! Configuration loading: file, then environment, then command-line flags

use anyhow::{Context, Result};
use optimizer_lib::config::OptimizerConfig;
use std::path::Path;

/// Default location of the optional configuration file (extension inferred)
const DEFAULT_CONFIG_FILE: &str = "/etc/cost-optimizer/config";

/// Values given on the command line; `None` leaves the lower layers alone
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub region: Option<String>,
    pub instance_class: Option<String>,
    pub fleet_id: Option<String>,
    pub max_spot_price: Option<f64>,
    pub cost_threshold: Option<f64>,
    pub budget_limit: Option<f64>,
}

/// Build the layered configuration and validate it
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<OptimizerConfig> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    let settings = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix("OPTIMIZER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("region", overrides.region.clone())?
        .set_override_option("instance_class", overrides.instance_class.clone())?
        .set_override_option("fleet_id", overrides.fleet_id.clone())?
        .set_override_option("max_spot_price", overrides.max_spot_price)?
        .set_override_option("cost_alert_threshold", overrides.cost_threshold)?
        .set_override_option("budget_limit", overrides.budget_limit)?
        .build()
        .context("Failed to load configuration")?;

    let config: OptimizerConfig = settings
        .try_deserialize()
        .context("Failed to parse configuration")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "budget_limit = 300.0\nregion = \"us-west-2\"\n\n[schedule]\npreemption_poll_secs = 10"
        )
        .unwrap();

        let overrides = Overrides {
            budget_limit: Some(450.0),
            ..Default::default()
        };
        let config = load(Some(file.path()), &overrides).unwrap();

        assert_eq!(config.budget_limit, 450.0);
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.schedule.preemption_poll_secs, 10);
        assert_eq!(config.target_utilization, 70.0);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let overrides = Overrides {
            max_spot_price: Some(25.0),
            ..Default::default()
        };

        let err = load(Some(file.path()), &overrides).unwrap_err();
        assert!(format!("{:#}", err).contains("max_spot_price"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(load(Some(Path::new("/nonexistent/optimizer.toml")), &Overrides::default()).is_err());
    }
}
