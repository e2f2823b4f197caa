use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::Result;

/// Normalise a free-text sample identifier into a standard name
///
/// Names compare case-insensitively, ignore whitespace and a trailing full stop, so that
/// `" Nivolet. "`, `"NIVOLET"` and `"ni volet"` all refer to the same standard.
///
/// # Examples
///
/// ```
/// use iso_quant::registry::normalize_standard_name;
///
/// assert_eq!(normalize_standard_name(" h2o pi. "), "H2OPI");
/// ```
pub fn normalize_standard_name(identifier: &str) -> String {
    let name: String = identifier
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();
    match name.strip_suffix('.') {
        Some(stripped) => stripped.to_owned(),
        None => name,
    }
}

/// The accepted isotope composition of a reference standard, in per mil
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct ReferenceTarget {
    #[serde(rename = "d18O")]
    pub d18o: f64,
    #[serde(rename = "d2H")]
    pub d2h: f64,
}

impl ReferenceTarget {
    pub const fn new(d18o: f64, d2h: f64) -> Self {
        Self { d18o, d2h }
    }
}

const DEFAULT_TARGETS: [(&str, ReferenceTarget); 4] = [
    ("NIVOLET", ReferenceTarget::new(-22.47, -171.6)),
    ("ORMEA", ReferenceTarget::new(-11.52, -77.9)),
    ("H2OPI", ReferenceTarget::new(-6.68, -39.4)),
    ("SSW", ReferenceTarget::new(-0.54, -2.2)),
];

/// Reference targets keyed by normalised standard name
///
/// The registry is an explicit value: every computation borrows it for its whole duration, so
/// an edit can only ever take effect on the next recomputation.
#[derive(Clone, Debug, PartialEq)]
pub struct StandardRegistry {
    targets: BTreeMap<String, ReferenceTarget>,
}

impl Default for StandardRegistry {
    fn default() -> Self {
        Self {
            targets: DEFAULT_TARGETS
                .iter()
                .map(|(name, target)| ((*name).to_owned(), *target))
                .collect(),
        }
    }
}

impl StandardRegistry {
    /// Build a registry, normalising every name on the way in
    ///
    /// # Errors
    /// Returns an error if any target is not finite.
    pub fn from_targets<I, S>(targets: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, ReferenceTarget)>,
        S: AsRef<str>,
    {
        let mut registry = Self {
            targets: BTreeMap::new(),
        };
        for (name, target) in targets {
            registry.insert(name.as_ref(), target)?;
        }
        Ok(registry)
    }

    /// Look up the standard an identifier refers to
    ///
    /// Returns the normalised name when the identifier is a known standard, `None` when the
    /// row is an unknown sample.
    pub fn classify(&self, identifier: &str) -> Option<String> {
        let name = normalize_standard_name(identifier);
        self.targets.contains_key(&name).then_some(name)
    }

    pub fn target(&self, name: &str) -> Option<&ReferenceTarget> {
        self.targets.get(&normalize_standard_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.target(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Replace the target of an existing standard
    ///
    /// # Errors
    /// Returns an error if the standard is unknown, or if either value is not finite. The
    /// registry is left unchanged in both cases.
    pub fn set_target(&mut self, name: &str, target: ReferenceTarget) -> Result<()> {
        let name = normalize_standard_name(name);
        if !(target.d18o.is_finite() && target.d2h.is_finite()) {
            return Err(Error::InvalidTarget {
                name,
                d18o: target.d18o,
                d2h: target.d2h,
            });
        }
        let slot = self
            .targets
            .get_mut(&name)
            .ok_or_else(|| Error::UnknownStandard(name.clone()))?;
        *slot = target;
        Ok(())
    }

    /// Insert a new standard, or overwrite an existing one
    ///
    /// # Errors
    /// Returns an error if either value is not finite.
    pub fn insert(&mut self, name: &str, target: ReferenceTarget) -> Result<()> {
        let name = normalize_standard_name(name);
        if !(target.d18o.is_finite() && target.d2h.is_finite()) {
            return Err(Error::InvalidTarget {
                name,
                d18o: target.d18o,
                d2h: target.d2h,
            });
        }
        self.targets.insert(name, target);
        Ok(())
    }

    pub fn reset_to_defaults(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod test {
    use super::{normalize_standard_name, ReferenceTarget, StandardRegistry};
    use crate::error::Error;

    #[test]
    fn names_are_case_whitespace_and_trailing_dot_insensitive() {
        for raw in ["NIVOLET", "nivolet", "  Nivolet. ", "NIVO LET", "nivolet."] {
            assert_eq!(normalize_standard_name(raw), "NIVOLET", "{raw:?}");
        }
        // only a single trailing dot is dropped
        assert_eq!(normalize_standard_name("SSW.."), "SSW.");
    }

    #[test]
    fn default_registry_recognises_the_laboratory_standards() {
        let registry = StandardRegistry::default();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.classify("h2opi"), Some("H2OPI".to_owned()));
        assert_eq!(registry.classify("lake water 12"), None);
        assert_eq!(
            registry.target("ormea"),
            Some(&ReferenceTarget::new(-11.52, -77.9))
        );
    }

    #[test]
    fn editing_a_target_rejects_non_finite_values() {
        let mut registry = StandardRegistry::default();
        let before = registry.clone();

        let result = registry.set_target("SSW", ReferenceTarget::new(f64::NAN, -2.2));
        assert!(matches!(result, Err(Error::InvalidTarget { .. })));
        assert_eq!(registry, before);

        registry
            .set_target("ssw", ReferenceTarget::new(-0.5, -2.0))
            .unwrap();
        assert_eq!(registry.target("SSW"), Some(&ReferenceTarget::new(-0.5, -2.0)));

        registry.reset_to_defaults();
        assert_eq!(registry, before);
    }

    #[test]
    fn building_from_non_finite_targets_fails() {
        let result = StandardRegistry::from_targets([
            ("GV1", ReferenceTarget::new(-10.0, -70.0)),
            ("gv2", ReferenceTarget::new(-5.0, f64::INFINITY)),
        ]);
        assert!(matches!(result, Err(Error::InvalidTarget { name, .. }) if name == "GV2"));

        let registry =
            StandardRegistry::from_targets([(" gv 1.", ReferenceTarget::new(-10.0, -70.0))])
                .unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), ["GV1"]);
    }

    #[test]
    fn editing_an_unknown_standard_fails() {
        let mut registry = StandardRegistry::default();
        let result = registry.set_target("VSMOW", ReferenceTarget::new(0.0, 0.0));
        assert!(matches!(result, Err(Error::UnknownStandard(name)) if name == "VSMOW"));

        registry.insert("VSMOW", ReferenceTarget::new(0.0, 0.0)).unwrap();
        assert!(registry.contains("vsmow"));
    }
}
