use std::collections::{BTreeMap, BTreeSet};

use crate::calibration::{CalibrationCurve, Channel};
use crate::error::{Computation, EmptySelection};
use crate::injection::{AggregatedSampleRow, Condition};
use crate::math::{mean_ignoring_missing, root_sum_square, sample_standard_deviation};
use crate::registry::StandardRegistry;

/// Ids of the calibration curves applied during quantification
///
/// The selection is passed explicitly to [`quantify`] so that the result depends on its
/// arguments alone, never on flags stored in the curves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CurveSelection(BTreeSet<String>);

impl CurveSelection {
    /// Select the curves whose `enabled` flag is set
    pub fn from_enabled(curves: &[CalibrationCurve]) -> Self {
        curves
            .iter()
            .filter(|curve| curve.enabled)
            .map(|curve| curve.id.clone())
            .collect()
    }

    pub fn all(curves: &[CalibrationCurve]) -> Self {
        curves.iter().map(|curve| curve.id.clone()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.0.insert(id.into())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.0.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Selected ids which name none of `curves`
    pub fn unmatched<'s>(&'s self, curves: &[CalibrationCurve]) -> Vec<&'s str> {
        self.iter()
            .filter(|id| !curves.iter().any(|curve| curve.id == *id))
            .collect()
    }
}

impl<S: Into<String>> FromIterator<S> for CurveSelection {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// One channel of a quantified sample
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelQuantification {
    /// The raw mean mapped through each applied curve, in curve order
    pub reconciled: Vec<Option<f64>>,
    /// Mean over the applied curves
    pub mean: Option<f64>,
    /// Sample standard deviation over the applied curves, zero when fewer than two curves
    /// produced a value
    pub cross_curve_sd: f64,
    /// Replicate spread and cross-curve spread combined in quadrature
    pub combined_error: Option<f64>,
}

/// A calibrated unknown sample
#[derive(Clone, Debug, PartialEq)]
pub struct QuantifiedSampleRow {
    pub sample_id: String,
    pub identifier: String,
    pub d18o_sd: Option<f64>,
    pub d2h_sd: Option<f64>,
    pub h2o_sd: Option<f64>,
    pub d18o_condition: Condition,
    pub d2h_condition: Condition,
    pub metadata: BTreeMap<String, String>,
    pub d18o: ChannelQuantification,
    pub d2h: ChannelQuantification,
}

impl QuantifiedSampleRow {
    pub const fn channel(&self, channel: Channel) -> &ChannelQuantification {
        match channel {
            Channel::D18O => &self.d18o,
            Channel::D2H => &self.d2h,
        }
    }
}

/// The quantification of a set of unknowns through a set of curves
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuantificationTable {
    /// Ids of the applied curves; reconciled values are stored in this order
    pub curve_ids: Vec<String>,
    pub rows: Vec<QuantifiedSampleRow>,
}

/// The rows of a table which do not name a known standard
pub fn unknown_samples<'a>(
    rows: &'a [AggregatedSampleRow],
    registry: &StandardRegistry,
) -> Vec<&'a AggregatedSampleRow> {
    rows.iter()
        .filter(|row| registry.classify(&row.identifier).is_none())
        .collect()
}

fn quantify_channel(
    channel: Channel,
    row: &AggregatedSampleRow,
    curves: &[&CalibrationCurve],
) -> ChannelQuantification {
    let raw = channel.raw_mean(row);
    let reconciled = curves
        .iter()
        .map(|curve| raw.map(|raw| curve.channel(channel).fit.apply(raw)))
        .collect::<Vec<_>>();

    let mean = mean_ignoring_missing(&reconciled);
    let cross_curve_sd = sample_standard_deviation(&reconciled).unwrap_or(0.0);
    let intra_sample_sd = channel.intra_sample_sd(row).unwrap_or(0.0);
    let combined_error = mean.map(|_| root_sum_square(intra_sample_sd, cross_curve_sd));

    ChannelQuantification {
        reconciled,
        mean,
        cross_curve_sd,
        combined_error,
    }
}

fn quantify_row(row: &AggregatedSampleRow, curves: &[&CalibrationCurve]) -> QuantifiedSampleRow {
    QuantifiedSampleRow {
        sample_id: row.sample_id.clone(),
        identifier: row.identifier.clone(),
        d18o_sd: row.d18o_sd,
        d2h_sd: row.d2h_sd,
        h2o_sd: row.h2o_sd,
        d18o_condition: row.d18o_condition,
        d2h_condition: row.d2h_condition,
        metadata: row.metadata.clone(),
        d18o: quantify_channel(Channel::D18O, row, curves),
        d2h: quantify_channel(Channel::D2H, row, curves),
    }
}

/// Calibrate unknown samples through every selected curve
///
/// Each row yields one output row, also when its raw means are missing: the reconciled values,
/// mean and combined error of that channel are then missing too. Curves are applied in the
/// order of `curves`.
pub fn quantify<'a>(
    unknowns: impl IntoIterator<Item = &'a AggregatedSampleRow>,
    curves: &[CalibrationCurve],
    selection: &CurveSelection,
) -> Computation<QuantificationTable> {
    if curves.is_empty() {
        return Computation::Nothing(EmptySelection::NoCurves);
    }
    let applied = curves
        .iter()
        .filter(|curve| selection.contains(&curve.id))
        .collect::<Vec<_>>();
    if applied.is_empty() {
        return Computation::Nothing(EmptySelection::NoCurvesEnabled);
    }

    Computation::Computed(QuantificationTable {
        curve_ids: applied.iter().map(|curve| curve.id.clone()).collect(),
        rows: unknowns
            .into_iter()
            .map(|row| quantify_row(row, &applied))
            .collect(),
    })
}

/// Calibrate a chosen subset of samples through a chosen subset of curves
///
/// Ids in `sample_ids` that match no unknown, and ids in `selection` that match no curve, are
/// ignored with a warning.
pub fn quantify_subset<'a>(
    unknowns: impl IntoIterator<Item = &'a AggregatedSampleRow>,
    sample_ids: &BTreeSet<String>,
    curves: &[CalibrationCurve],
    selection: &CurveSelection,
) -> Computation<QuantificationTable> {
    if sample_ids.is_empty() {
        return Computation::Nothing(EmptySelection::NoSamples);
    }
    let chosen = unknowns
        .into_iter()
        .filter(|row| sample_ids.contains(&row.sample_id))
        .collect::<Vec<_>>();
    for missing in sample_ids
        .iter()
        .filter(|id| !chosen.iter().any(|row| &row.sample_id == *id))
    {
        log::warn!("sample {missing} is not an unknown sample, skipped");
    }
    for missing in selection.unmatched(curves) {
        log::warn!("curve {missing} does not exist, skipped");
    }
    quantify(chosen, curves, selection)
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::Isaac64Rng;

    use super::{quantify, quantify_subset, unknown_samples, CurveSelection};
    use crate::calibration::{CalibrationCurve, ChannelCalibration};
    use crate::error::{Computation, EmptySelection};
    use crate::fit::{CalibrationPoint, LinearFit};
    use crate::injection::AggregatedSampleRow;
    use crate::registry::StandardRegistry;

    fn curve(id: &str, slope: f64, intercept: f64) -> CalibrationCurve {
        let line = ChannelCalibration {
            points: vec![CalibrationPoint::new(0.0, intercept)],
            fit: LinearFit {
                slope,
                intercept,
                r_squared: 1.0,
            },
        };
        CalibrationCurve {
            id: id.to_owned(),
            standards: vec!["NIVOLET".to_owned()],
            d18o: line.clone(),
            d2h: line,
            enabled: true,
        }
    }

    fn sample(sample_id: &str, d18o: Option<f64>, d18o_sd: Option<f64>) -> AggregatedSampleRow {
        let mut row = AggregatedSampleRow::empty(sample_id, format!("lake {sample_id}"));
        row.d18o_mean = d18o;
        row.d2h_mean = d18o.map(|value| 8.0f64.mul_add(value, 10.0));
        row.d18o_sd = d18o_sd;
        row
    }

    #[test]
    fn single_curve_error_is_the_replicate_spread() {
        let rows = [sample("A-1", Some(-10.0), Some(0.05))];
        let curves = [curve("cal1", 1.0, -0.5)];

        let table = quantify(&rows, &curves, &CurveSelection::all(&curves))
            .computed()
            .unwrap();

        let d18o = &table.rows[0].d18o;
        assert_eq!(d18o.reconciled, [Some(-10.5)]);
        assert_eq!(d18o.cross_curve_sd, 0.0);
        assert_eq!(d18o.combined_error, Some(0.05));
        // no replicate spread recorded for d2H
        assert_eq!(table.rows[0].d2h.combined_error, Some(0.0));
    }

    #[test]
    fn cross_curve_spread_is_combined_in_quadrature() {
        let rows = [sample("A-1", Some(-10.0), Some(0.3))];
        let curves = [curve("cal1", 1.0, 0.0), curve("cal2", 1.0, 0.4)];

        let table = quantify(&rows, &curves, &CurveSelection::all(&curves))
            .computed()
            .unwrap();

        let d18o = &table.rows[0].d18o;
        approx::assert_relative_eq!(d18o.mean.unwrap(), -9.8);
        // two values 0.4 apart have a sample standard deviation of 0.4 / sqrt(2)
        let cross = 0.4 / 2f64.sqrt();
        approx::assert_relative_eq!(d18o.cross_curve_sd, cross, max_relative = 1e-12);
        approx::assert_relative_eq!(
            d18o.combined_error.unwrap(),
            0.3f64.hypot(cross),
            max_relative = 1e-12
        );
    }

    #[test]
    fn only_selected_curves_are_applied_in_curve_order() {
        let rows = [sample("A-1", Some(-10.0), None)];
        let curves = [
            curve("cal1", 1.0, 0.0),
            curve("cal2", 2.0, 0.0),
            curve("cal3", 1.0, 1.0),
        ];
        let selection: CurveSelection = ["cal3", "cal1"].into_iter().collect();

        let table = quantify(&rows, &curves, &selection).computed().unwrap();

        assert_eq!(table.curve_ids, ["cal1", "cal3"]);
        assert_eq!(table.rows[0].d18o.reconciled, [Some(-10.0), Some(-9.0)]);
    }

    #[test]
    fn missing_raw_values_stay_missing() {
        let rows = [sample("A-1", None, Some(0.02))];
        let curves = [curve("cal1", 1.0, 0.0), curve("cal2", 1.1, 0.2)];

        let table = quantify(&rows, &curves, &CurveSelection::all(&curves))
            .computed()
            .unwrap();

        assert_eq!(table.rows.len(), 1);
        let d18o = &table.rows[0].d18o;
        assert_eq!(d18o.reconciled, [None, None]);
        assert_eq!(d18o.mean, None);
        assert_eq!(d18o.cross_curve_sd, 0.0);
        assert_eq!(d18o.combined_error, None);
    }

    #[test]
    fn disabling_every_curve_yields_nothing() {
        let rows = [sample("A-1", Some(-10.0), None)];
        let mut curves = vec![curve("cal1", 1.0, 0.0), curve("cal2", 1.0, 0.1)];
        for curve in &mut curves {
            curve.enabled = false;
        }

        let result = quantify(&rows, &curves, &CurveSelection::from_enabled(&curves));
        assert_eq!(result, Computation::Nothing(EmptySelection::NoCurvesEnabled));

        let result = quantify(&rows, &[], &CurveSelection::default());
        assert_eq!(result, Computation::Nothing(EmptySelection::NoCurves));
    }

    #[test]
    fn no_unknowns_is_an_empty_table_not_nothing() {
        let curves = [curve("cal1", 1.0, 0.0)];
        let rows: Vec<AggregatedSampleRow> = vec![];
        let table = quantify(&rows, &curves, &CurveSelection::all(&curves))
            .computed()
            .unwrap();
        assert!(table.rows.is_empty());
        assert_eq!(table.curve_ids, ["cal1"]);
    }

    #[test]
    fn quantification_is_deterministic() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);

        let rows = (0..rng.gen_range(5..30))
            .map(|ii| {
                sample(
                    &format!("S-{ii}"),
                    rng.gen_bool(0.9).then(|| rng.gen_range(-30.0..0.0)),
                    rng.gen_bool(0.5).then(|| rng.gen_range(0.0..0.1)),
                )
            })
            .collect::<Vec<_>>();
        let curves = (1..=rng.gen_range(2..6))
            .map(|ii| {
                curve(
                    &format!("cal{ii}"),
                    rng.gen_range(0.9..1.1),
                    rng.gen_range(-1.0..1.0),
                )
            })
            .collect::<Vec<_>>();
        let selection = CurveSelection::all(&curves);

        let first = quantify(&rows, &curves, &selection);
        let second = quantify(&rows, &curves, &selection);

        assert_eq!(first, second);
        assert_eq!(format!("{first:?}"), format!("{second:?}"));
    }

    #[test]
    fn standards_are_not_quantified() {
        let mut standard = sample("A-1", Some(-22.0), None);
        standard.identifier = "Nivolet".to_owned();
        let rows = [standard, sample("A-2", Some(-10.0), None)];

        let unknowns = unknown_samples(&rows, &StandardRegistry::default());

        assert_eq!(unknowns.len(), 1);
        assert_eq!(unknowns[0].sample_id, "A-2");
    }

    #[test]
    fn subset_quantification_uses_only_the_chosen_samples() {
        let rows = [
            sample("A-1", Some(-10.0), None),
            sample("A-2", Some(-11.0), None),
        ];
        let curves = [curve("cal1", 1.0, 0.0), curve("cal2", 1.0, 0.1)];
        let selection: CurveSelection = ["cal2"].into_iter().collect();

        let chosen = BTreeSet::from(["A-2".to_owned(), "Z-9".to_owned()]);
        let table = quantify_subset(&rows, &chosen, &curves, &selection)
            .computed()
            .unwrap();

        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].sample_id, "A-2");
        assert_eq!(table.curve_ids, ["cal2"]);

        let nothing = quantify_subset(&rows, &BTreeSet::new(), &curves, &selection);
        assert_eq!(nothing, Computation::Nothing(EmptySelection::NoSamples));
    }

    #[test]
    fn subset_quantification_skips_curves_that_do_not_exist() {
        let rows = [sample("A-1", Some(-10.0), None)];
        let curves = [curve("cal1", 1.0, 0.0), curve("cal2", 1.0, 0.1)];
        let selection: CurveSelection = ["cal2", "cal7"].into_iter().collect();
        assert_eq!(selection.unmatched(&curves), ["cal7"]);

        let chosen = BTreeSet::from(["A-1".to_owned()]);
        let table = quantify_subset(&rows, &chosen, &curves, &selection)
            .computed()
            .unwrap();
        assert_eq!(table.curve_ids, ["cal2"]);

        let only_missing: CurveSelection = ["cal7"].into_iter().collect();
        assert_eq!(
            quantify_subset(&rows, &chosen, &curves, &only_missing),
            Computation::Nothing(EmptySelection::NoCurvesEnabled)
        );
    }
}
