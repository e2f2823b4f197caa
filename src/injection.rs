use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use itertools::Itertools;

use crate::config::AggregationConfig;
use crate::error::{Computation, EmptySelection, Error};
use crate::math::{mean_ignoring_missing, sample_standard_deviation};
use crate::Result;

/// Position of an analysis in the run, taken from the last run of digits in its sample id
///
/// Numbers of any length compare by value: leading zeros are ignored, then shorter digit runs
/// order first and runs of equal length compare digit by digit.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct AnalysisKey {
    len: usize,
    digits: String,
}

impl AnalysisKey {
    /// The significant digits of the analysis number, `"0"` for zero
    pub fn digits(&self) -> &str {
        if self.digits.is_empty() {
            "0"
        } else {
            &self.digits
        }
    }
}

/// Ordering key of an analysis: the last run of digits in its sample id
///
/// Ids without any digit return `None`, which orders before every numbered analysis.
///
/// # Examples
///
/// ```
/// use iso_quant::injection::analysis_key;
///
/// assert_eq!(analysis_key("Run 3 / A-017").unwrap().digits(), "17");
/// assert!(analysis_key("A-9") < analysis_key("A-10"));
/// assert_eq!(analysis_key("blank"), None);
/// ```
pub fn analysis_key(sample_id: &str) -> Option<AnalysisKey> {
    sample_id
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .last()
        .map(|run| {
            let digits = run.trim_start_matches('0');
            AnalysisKey {
                len: digits.len(),
                digits: digits.to_owned(),
            }
        })
}

/// A single injection of a sample, as read from the instrument export
#[derive(Clone, Debug, PartialEq)]
pub struct InjectionRecord {
    pub sample_id: String,
    /// Free-text identifier ("Identifier 1"), which names standards
    pub identifier: Option<String>,
    pub replicate_index: u32,
    pub good: bool,
    pub ignore: bool,
    pub d18o: Option<f64>,
    pub d2h: Option<f64>,
    pub h2o: Option<f64>,
}

impl InjectionRecord {
    /// Whether the instrument marked this injection as usable
    pub const fn is_stable(&self) -> bool {
        self.good && !self.ignore
    }
}

/// Which injections are eligible for aggregation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QualityFilter {
    /// Every injection is eligible
    All,
    /// Only injections with `good` set and `ignore` unset
    #[default]
    StableOnly,
}

impl QualityFilter {
    const fn admits(self, record: &InjectionRecord) -> bool {
        match self {
            Self::All => true,
            Self::StableOnly => record.is_stable(),
        }
    }
}

/// The injections of one sample, ordered by replicate index
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBlock {
    sample_id: String,
    records: Vec<InjectionRecord>,
}

impl SampleBlock {
    /// Collect the injections of one sample
    ///
    /// # Errors
    /// Returns an error if a record belongs to a different sample, or if two records share a
    /// replicate index.
    pub fn new(sample_id: String, mut records: Vec<InjectionRecord>) -> Result<Self> {
        if let Some(stray) = records.iter().find(|record| record.sample_id != sample_id) {
            return Err(Error::ForeignRecord {
                sample_id,
                found: stray.sample_id.clone(),
            });
        }
        records.sort_by_key(|record| record.replicate_index);
        if let Some((duplicate, _)) = records
            .iter()
            .tuple_windows()
            .find(|(a, b)| a.replicate_index == b.replicate_index)
        {
            return Err(Error::DuplicateReplicate {
                sample_id,
                replicate_index: duplicate.replicate_index,
            });
        }
        Ok(Self { sample_id, records })
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn records(&self) -> &[InjectionRecord] {
        &self.records
    }

    /// The identifier of the sample: the first non-empty record identifier, else the sample id
    pub fn identifier(&self) -> &str {
        self.records
            .iter()
            .filter_map(|record| record.identifier.as_deref())
            .find(|identifier| !identifier.is_empty())
            .unwrap_or(&self.sample_id)
    }

    /// The "last N stable" seed selection
    ///
    /// Of the injections admitted by `filter`, choose the last `count` by replicate index, or
    /// all of them when fewer exist.
    pub fn default_selection(&self, filter: QualityFilter, count: usize) -> BTreeSet<u32> {
        let eligible = self
            .records
            .iter()
            .filter(|record| filter.admits(record))
            .map(|record| record.replicate_index)
            .collect::<Vec<_>>();
        eligible[eligible.len().saturating_sub(count)..]
            .iter()
            .copied()
            .collect()
    }
}

/// Group injection records into per-sample blocks
///
/// Blocks are ordered by [`analysis_key`], ties keeping the order in which samples first
/// appear.
///
/// # Errors
/// Returns an error if a sample repeats a replicate index.
pub fn group_into_blocks(records: Vec<InjectionRecord>) -> Result<Vec<SampleBlock>> {
    let mut order = Vec::new();
    let mut grouped: BTreeMap<String, Vec<InjectionRecord>> = BTreeMap::new();
    for record in records {
        if !grouped.contains_key(&record.sample_id) {
            order.push(record.sample_id.clone());
        }
        grouped
            .entry(record.sample_id.clone())
            .or_default()
            .push(record);
    }
    order.sort_by_key(|sample_id| analysis_key(sample_id));

    order
        .into_iter()
        .map(|sample_id| {
            let records = grouped.remove(&sample_id).unwrap_or_default();
            SampleBlock::new(sample_id, records)
        })
        .collect()
}

/// Pass/fail flag on the replicate spread of one channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    Ok,
    No,
}

impl Condition {
    /// Flag a standard deviation against its limit
    ///
    /// A missing standard deviation passes.
    pub fn assess(standard_deviation: Option<f64>, limit: f64) -> Self {
        match standard_deviation {
            Some(sd) if sd >= limit => Self::No,
            _ => Self::Ok,
        }
    }

    /// Parse a flag as written in an aggregated table
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "NO" => Some(Self::No),
            _ => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::No => write!(f, "NO"),
        }
    }
}

/// Replicate statistics of one sample ("raw means")
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatedSampleRow {
    pub sample_id: String,
    pub identifier: String,
    pub d18o_mean: Option<f64>,
    pub d2h_mean: Option<f64>,
    pub h2o_mean: Option<f64>,
    pub d18o_sd: Option<f64>,
    pub d2h_sd: Option<f64>,
    pub h2o_sd: Option<f64>,
    pub d18o_condition: Condition,
    pub d2h_condition: Condition,
    /// Number of injections aggregated, when known
    pub n: Option<usize>,
    /// Columns carried through untouched, keyed by column name
    pub metadata: BTreeMap<String, String>,
}

impl AggregatedSampleRow {
    /// A row with nothing but its identity, every statistic missing
    pub fn empty(sample_id: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            sample_id: sample_id.into(),
            identifier: identifier.into(),
            d18o_mean: None,
            d2h_mean: None,
            h2o_mean: None,
            d18o_sd: None,
            d2h_sd: None,
            h2o_sd: None,
            d18o_condition: Condition::Ok,
            d2h_condition: Condition::Ok,
            n: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// Reduce the chosen replicates of a sample to mean, spread and condition flags
///
/// Only records admitted by `filter` whose replicate index is in `selection` contribute.
pub fn aggregate(
    block: &SampleBlock,
    filter: QualityFilter,
    selection: &BTreeSet<u32>,
    config: &AggregationConfig,
) -> Computation<AggregatedSampleRow> {
    let chosen = block
        .records()
        .iter()
        .filter(|record| filter.admits(record) && selection.contains(&record.replicate_index))
        .collect::<Vec<_>>();

    if chosen.is_empty() {
        return Computation::Nothing(EmptySelection::NoReplicates {
            sample_id: block.sample_id().to_owned(),
        });
    }

    let d18o = chosen.iter().map(|record| record.d18o).collect::<Vec<_>>();
    let d2h = chosen.iter().map(|record| record.d2h).collect::<Vec<_>>();
    let h2o = chosen.iter().map(|record| record.h2o).collect::<Vec<_>>();

    let d18o_sd = sample_standard_deviation(&d18o);
    let d2h_sd = sample_standard_deviation(&d2h);

    Computation::Computed(AggregatedSampleRow {
        sample_id: block.sample_id().to_owned(),
        identifier: block.identifier().to_owned(),
        d18o_mean: mean_ignoring_missing(&d18o),
        d2h_mean: mean_ignoring_missing(&d2h),
        h2o_mean: mean_ignoring_missing(&h2o),
        d18o_sd,
        d2h_sd,
        h2o_sd: sample_standard_deviation(&h2o),
        d18o_condition: Condition::assess(d18o_sd, config.d18o_sd_limit),
        d2h_condition: Condition::assess(d2h_sd, config.d2h_sd_limit),
        n: Some(chosen.len()),
        metadata: BTreeMap::new(),
    })
}

/// The replicate subset chosen for each sample, keyed by sample id
pub type SelectionBook = BTreeMap<String, BTreeSet<u32>>;

/// Seed a [`SelectionBook`] with the default selection of every block
pub fn default_selections(
    blocks: &[SampleBlock],
    filter: QualityFilter,
    config: &AggregationConfig,
) -> SelectionBook {
    blocks
        .iter()
        .map(|block| {
            (
                block.sample_id().to_owned(),
                block.default_selection(filter, config.default_replicates),
            )
        })
        .filter(|(_, selection)| !selection.is_empty())
        .collect()
}

/// A sample of a batch aggregation which produced no row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedSample {
    pub sample_id: String,
    pub reason: String,
}

/// Result of aggregating every sample of a selection book
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawMeans {
    /// One row per aggregated sample, in block order
    pub rows: Vec<AggregatedSampleRow>,
    pub failures: Vec<FailedSample>,
}

/// Aggregate every sample that has a non-empty selection
///
/// A sample which cannot be aggregated is recorded as a failure and does not stop the batch.
pub fn aggregate_selections(
    blocks: &[SampleBlock],
    selections: &SelectionBook,
    filter: QualityFilter,
    config: &AggregationConfig,
) -> RawMeans {
    let mut raw_means = RawMeans::default();

    for (sample_id, _) in selections.iter().filter(|(_, selection)| !selection.is_empty()) {
        if !blocks.iter().any(|block| block.sample_id() == sample_id) {
            log::warn!("selection refers to unknown sample {sample_id}");
            raw_means.failures.push(FailedSample {
                sample_id: sample_id.clone(),
                reason: "sample not present in the injection table".to_owned(),
            });
        }
    }

    for block in blocks {
        let Some(selection) = selections
            .get(block.sample_id())
            .filter(|selection| !selection.is_empty())
        else {
            continue;
        };
        match aggregate(block, filter, selection, config) {
            Computation::Computed(row) => raw_means.rows.push(row),
            Computation::Nothing(reason) => {
                log::warn!("skipping sample {}: {reason}", block.sample_id());
                raw_means.failures.push(FailedSample {
                    sample_id: block.sample_id().to_owned(),
                    reason: reason.to_string(),
                });
            }
        }
    }

    log::info!(
        "aggregated {} sample(s), {} failed",
        raw_means.rows.len(),
        raw_means.failures.len()
    );
    raw_means
}
