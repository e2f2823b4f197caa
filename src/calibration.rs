use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

use serde::Serialize;

use crate::fit::{fit_linear, CalibrationPoint, LinearFit};
use crate::injection::{analysis_key, AggregatedSampleRow};
use crate::math::mean_ignoring_missing;
use crate::registry::StandardRegistry;

/// The two isotope ratios carried by every sample
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    D18O,
    D2H,
}

impl Channel {
    pub const ALL: [Self; 2] = [Self::D18O, Self::D2H];

    pub const fn label(self) -> &'static str {
        match self {
            Self::D18O => "d18O",
            Self::D2H => "d2H",
        }
    }

    /// Isotope tag used when exporting calibration points
    pub const fn isotope(self) -> &'static str {
        match self {
            Self::D18O => "18O",
            Self::D2H => "2H",
        }
    }

    pub(crate) const fn raw_mean(self, row: &AggregatedSampleRow) -> Option<f64> {
        match self {
            Self::D18O => row.d18o_mean,
            Self::D2H => row.d2h_mean,
        }
    }

    pub(crate) const fn intra_sample_sd(self, row: &AggregatedSampleRow) -> Option<f64> {
        match self {
            Self::D18O => row.d18o_sd,
            Self::D2H => row.d2h_sd,
        }
    }
}

/// Calibration of one channel: the points it was fit from and the resulting line
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChannelCalibration {
    pub points: Vec<CalibrationPoint>,
    pub fit: LinearFit,
}

impl ChannelCalibration {
    pub fn from_points(points: Vec<CalibrationPoint>) -> Self {
        let fit = fit_linear(&points);
        Self { points, fit }
    }
}

/// A linear calibration fit from one repeat of the standard sequence
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationCurve {
    pub id: String,
    /// Standards contributing at least one point, sorted and unique
    pub standards: Vec<String>,
    pub d18o: ChannelCalibration,
    pub d2h: ChannelCalibration,
    /// Whether the curve takes part in quantification. Owned by the caller.
    pub enabled: bool,
}

impl CalibrationCurve {
    pub const fn channel(&self, channel: Channel) -> &ChannelCalibration {
        match channel {
            Channel::D18O => &self.d18o,
            Channel::D2H => &self.d2h,
        }
    }
}

/// Length of the longest prefix of `keys` in which no key repeats
///
/// This is the length of one pass through a repeating sequence of standards.
///
/// # Examples
///
/// ```
/// use iso_quant::calibration::pattern_length;
///
/// assert_eq!(pattern_length(&["A", "B", "C", "A", "B"]), 3);
/// assert_eq!(pattern_length(&["A", "B"]), 2);
/// ```
pub fn pattern_length<K: Eq + Hash>(keys: &[K]) -> usize {
    let mut seen = HashSet::new();
    keys.iter().take_while(|key| seen.insert(*key)).count()
}

/// A row recognised as a standard, tagged with its normalised name
struct StandardRow<'a> {
    name: String,
    row: &'a AggregatedSampleRow,
}

/// Split the standard rows into consecutive chunks of one pattern length each
///
/// Rows are ordered by [`analysis_key`] before scanning. The last chunk may be shorter.
fn standard_blocks<'a>(
    rows: &'a [AggregatedSampleRow],
    registry: &StandardRegistry,
) -> Vec<Vec<StandardRow<'a>>> {
    let mut standards = rows
        .iter()
        .filter_map(|row| {
            registry
                .classify(&row.identifier)
                .map(|name| StandardRow { name, row })
        })
        .collect::<Vec<_>>();
    if standards.is_empty() {
        return vec![];
    }
    standards.sort_by_key(|standard| analysis_key(&standard.row.sample_id));

    let names = standards
        .iter()
        .map(|standard| standard.name.as_str())
        .collect::<Vec<_>>();
    let length = match pattern_length(&names) {
        0 => names.len(),
        length => length,
    };
    log::debug!(
        "{} standard row(s), repeating every {length}",
        standards.len()
    );

    let mut blocks = Vec::new();
    let mut standards = standards.into_iter().peekable();
    while standards.peek().is_some() {
        blocks.push(standards.by_ref().take(length).collect());
    }
    blocks
}

/// Average the rows of each standard in a block and pair the means with their targets
fn block_points(
    block: &[StandardRow<'_>],
    registry: &StandardRegistry,
) -> (Vec<String>, Vec<CalibrationPoint>, Vec<CalibrationPoint>) {
    let mut by_name: BTreeMap<&str, Vec<&AggregatedSampleRow>> = BTreeMap::new();
    for standard in block {
        by_name.entry(standard.name.as_str()).or_default().push(standard.row);
    }

    let mut standards = Vec::new();
    let mut d18o = Vec::new();
    let mut d2h = Vec::new();
    for (name, rows) in by_name {
        let Some(target) = registry.target(name) else {
            continue;
        };
        let mut contributed = false;
        for (channel, points, accepted) in [
            (Channel::D18O, &mut d18o, target.d18o),
            (Channel::D2H, &mut d2h, target.d2h),
        ] {
            let raw = rows
                .iter()
                .map(|row| channel.raw_mean(row))
                .collect::<Vec<_>>();
            if let Some(raw) = mean_ignoring_missing(&raw) {
                points.push(CalibrationPoint::new(raw, accepted));
                contributed = true;
            }
        }
        if contributed {
            standards.push(name.to_owned());
        }
    }
    (standards, d18o, d2h)
}

/// Detect the calibration curves in a table of aggregated samples
///
/// Standards are recognised through `registry`, split into blocks at every repeat of the
/// standard sequence, and each block with at least one usable point is fit per channel. Curve
/// ids number the blocks from `cal1`; a block without points is dropped and leaves a gap.
pub fn detect_curves(
    rows: &[AggregatedSampleRow],
    registry: &StandardRegistry,
) -> Vec<CalibrationCurve> {
    standard_blocks(rows, registry)
        .iter()
        .enumerate()
        .filter_map(|(ii, block)| {
            let (standards, d18o, d2h) = block_points(block, registry);
            if d18o.is_empty() && d2h.is_empty() {
                log::warn!("block {} has no usable standard point, dropped", ii + 1);
                return None;
            }
            Some(CalibrationCurve {
                id: format!("cal{}", ii + 1),
                standards,
                d18o: ChannelCalibration::from_points(d18o),
                d2h: ChannelCalibration::from_points(d2h),
                enabled: true,
            })
        })
        .collect()
}
