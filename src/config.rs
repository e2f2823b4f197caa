use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::registry::{ReferenceTarget, StandardRegistry};
use crate::Result;

/// Thresholds used when reducing replicate injections
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// A d18O standard deviation at or above this value flags the sample
    pub d18o_sd_limit: f64,
    /// A d2H standard deviation at or above this value flags the sample
    pub d2h_sd_limit: f64,
    /// Number of trailing stable injections chosen by default
    pub default_replicates: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            d18o_sd_limit: 0.08,
            d2h_sd_limit: 0.8,
            default_replicates: 3,
        }
    }
}

/// On-disk configuration
///
/// ```toml
/// [aggregation]
/// d18o_sd_limit = 0.08
///
/// [standards.NIVOLET]
/// d18O = -22.47
/// d2H = -171.6
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub aggregation: AggregationConfig,
    /// Registry seed. When empty the built-in laboratory standards are used.
    pub standards: BTreeMap<String, ReferenceTarget>,
}

impl Config {
    /// Parse a configuration from TOML text
    ///
    /// # Errors
    /// Returns an error if the text is not valid TOML, does not match the expected shape, or
    /// configures a non-finite standard target.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.registry()?;
        Ok(config)
    }

    /// Read a configuration file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        log::info!(
            "read configuration from {path:?} with {} standard(s)",
            config.standards.len()
        );
        Ok(config)
    }

    /// Build the standard registry this configuration seeds
    ///
    /// # Errors
    /// Returns an error if a configured target is not finite.
    pub fn registry(&self) -> Result<StandardRegistry> {
        if self.standards.is_empty() {
            log::debug!("no standards configured, using built-in targets");
            return Ok(StandardRegistry::default());
        }
        StandardRegistry::from_targets(
            self.standards
                .iter()
                .map(|(name, target)| (name.as_str(), *target)),
        )
    }
}

#[cfg(test)]
mod test {
    use super::{AggregationConfig, Config};
    use crate::error::Error;
    use crate::registry::{ReferenceTarget, StandardRegistry};

    #[test]
    fn empty_configuration_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.aggregation, AggregationConfig::default());
        assert_eq!(config.registry().unwrap(), StandardRegistry::default());
    }

    #[test]
    fn standards_and_thresholds_are_read_from_toml() {
        let text = r#"
            [aggregation]
            d2h_sd_limit = 1.0

            [standards."gv 1."]
            d18O = -10.0
            d2H = -70.0
        "#;
        let config = Config::from_toml_str(text).unwrap();

        assert_eq!(config.aggregation.d2h_sd_limit, 1.0);
        assert_eq!(config.aggregation.d18o_sd_limit, 0.08);
        assert_eq!(config.aggregation.default_replicates, 3);

        let registry = config.registry().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.target("GV1"),
            Some(&ReferenceTarget::new(-10.0, -70.0))
        );
    }

    #[test]
    fn non_finite_targets_fail_the_load() {
        let text = r#"
            [standards.GV1]
            d18O = nan
            d2H = -70.0

            [standards.GV2]
            d18O = -5.0
            d2H = -70.0
        "#;

        match Config::from_toml_str(text) {
            Err(Error::InvalidTarget { name, d18o, .. }) => {
                assert_eq!(name, "GV1");
                assert!(d18o.is_nan());
            }
            other => panic!("expected an invalid target, got {other:?}"),
        }
        assert!(Config::from_toml_str("[standards.GV2]\nd18O = -5.0\nd2H = -inf\n").is_err());
    }

    #[test]
    fn non_finite_targets_fail_the_registry() {
        let mut config = Config::default();
        config
            .standards
            .insert("GV1".to_owned(), ReferenceTarget::new(f64::NAN, -70.0));

        assert!(matches!(
            config.registry(),
            Err(Error::InvalidTarget { ref name, .. }) if name == "GV1"
        ));
    }

    #[test]
    fn malformed_standards_are_rejected() {
        let text = r#"
            [standards.NIVOLET]
            d18O = "minus twenty"
            d2H = -171.6
        "#;
        assert!(Config::from_toml_str(text).is_err());
    }
}
