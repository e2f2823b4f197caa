use std::collections::BTreeSet;

use crate::calibration::{detect_curves, CalibrationCurve};
use crate::error::Computation;
use crate::injection::AggregatedSampleRow;
use crate::quantification::{
    quantify, quantify_subset, unknown_samples, CurveSelection, QuantificationTable,
};
use crate::registry::{ReferenceTarget, StandardRegistry};
use crate::Result;

/// Curves and quantification derived together from one snapshot of the inputs
#[derive(Clone, Debug, PartialEq)]
pub struct Derived {
    pub curves: Vec<CalibrationCurve>,
    pub quantification: Computation<QuantificationTable>,
}

impl Derived {
    fn compute(
        registry: &StandardRegistry,
        rows: &[AggregatedSampleRow],
        disabled: &BTreeSet<String>,
    ) -> Self {
        let mut curves = detect_curves(rows, registry);
        for curve in &mut curves {
            curve.enabled = !disabled.contains(&curve.id);
        }
        let quantification = quantify(
            unknown_samples(rows, registry),
            &curves,
            &CurveSelection::from_enabled(&curves),
        );
        Self {
            curves,
            quantification,
        }
    }
}

/// The aggregated table of a run together with everything derived from it
///
/// Every change to the registry, the rows or the curve selection recomputes curves and
/// quantification from scratch and replaces both at once, so a reader never observes curves
/// from one state next to a quantification from another.
#[derive(Clone, Debug)]
pub struct Session {
    /// Registry the session was seeded with; target resets return to it
    seed: StandardRegistry,
    registry: StandardRegistry,
    rows: Vec<AggregatedSampleRow>,
    /// Ids of curves the caller switched off; survives recomputation
    disabled: BTreeSet<String>,
    derived: Derived,
}

impl Session {
    pub fn new(registry: StandardRegistry, rows: Vec<AggregatedSampleRow>) -> Self {
        let disabled = BTreeSet::new();
        let derived = Derived::compute(&registry, &rows, &disabled);
        Self {
            seed: registry.clone(),
            registry,
            rows,
            disabled,
            derived,
        }
    }

    fn recompute(&mut self) {
        self.derived = Derived::compute(&self.registry, &self.rows, &self.disabled);
        log::info!(
            "recomputed {} curve(s), {}",
            self.derived.curves.len(),
            match &self.derived.quantification {
                Computation::Computed(table) => format!("{} sample(s) quantified", table.rows.len()),
                Computation::Nothing(reason) => reason.to_string(),
            }
        );
    }

    pub const fn registry(&self) -> &StandardRegistry {
        &self.registry
    }

    pub fn rows(&self) -> &[AggregatedSampleRow] {
        &self.rows
    }

    pub const fn derived(&self) -> &Derived {
        &self.derived
    }

    pub fn curves(&self) -> &[CalibrationCurve] {
        &self.derived.curves
    }

    pub const fn quantification(&self) -> &Computation<QuantificationTable> {
        &self.derived.quantification
    }

    pub fn unknowns(&self) -> Vec<&AggregatedSampleRow> {
        unknown_samples(&self.rows, &self.registry)
    }

    /// Edit the target of a standard and recompute
    ///
    /// # Errors
    /// Returns an error if the standard is unknown or the target not finite, in which case
    /// nothing changes.
    pub fn set_target(&mut self, name: &str, target: ReferenceTarget) -> Result<()> {
        self.registry.set_target(name, target)?;
        self.recompute();
        Ok(())
    }

    /// Undo every target edit, returning to the registry the session was seeded with
    pub fn reset_targets(&mut self) {
        self.registry = self.seed.clone();
        self.recompute();
    }

    /// Replace the registry, which also becomes the new reset point
    pub fn replace_registry(&mut self, registry: StandardRegistry) {
        self.seed = registry.clone();
        self.registry = registry;
        self.recompute();
    }

    pub fn replace_rows(&mut self, rows: Vec<AggregatedSampleRow>) {
        self.rows = rows;
        self.recompute();
    }

    /// Switch a curve on or off
    ///
    /// Returns `false` if no current curve has this id.
    pub fn set_curve_enabled(&mut self, id: &str, enabled: bool) -> bool {
        if !self.derived.curves.iter().any(|curve| curve.id == id) {
            return false;
        }
        if enabled {
            self.disabled.remove(id);
        } else {
            self.disabled.insert(id.to_owned());
        }
        self.recompute();
        true
    }

    pub fn enable_all_curves(&mut self) {
        self.disabled.clear();
        self.recompute();
    }

    pub fn disable_all_curves(&mut self) {
        self.disabled = self
            .derived
            .curves
            .iter()
            .map(|curve| curve.id.clone())
            .collect();
        self.recompute();
    }

    /// Quantify a chosen subset of unknowns through a chosen subset of curves
    ///
    /// Independent of the enabled flags, and leaves the session untouched.
    pub fn custom_quantification(
        &self,
        sample_ids: &BTreeSet<String>,
        curves: &CurveSelection,
    ) -> Computation<QuantificationTable> {
        quantify_subset(self.unknowns(), sample_ids, &self.derived.curves, curves)
    }
}
