//! Reading instrument exports and aggregated tables from delimited text
//!
//! Headers are compared after trimming. The delimiter is sniffed from the header line among
//! comma, semicolon and tab. Numeric cells accept a decimal comma, and anything which does not
//! parse to a finite number is read as missing.
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::config::AggregationConfig;
use crate::error::Error;
use crate::injection::{AggregatedSampleRow, Condition, InjectionRecord};
use crate::Result;

pub const INJECTION_TABLE: &str = "injections";
pub const RAW_MEANS_TABLE: &str = "raw_means";

pub const ANALYSIS: &str = "Analysis";
pub const IDENTIFIER: &str = "Identifier 1";
pub const INJECTION_NUMBER: &str = "Inj Nr";
pub const GOOD: &str = "Good";
pub const IGNORE: &str = "Ignore";
pub const D18O_INJECTION: &str = "d(18_16)Mean";
pub const D2H_INJECTION: &str = "d(D_H)Mean";
pub const H2O_INJECTION: &str = "H2O_Mean";

pub const D18O_MEAN: &str = "d18Om";
pub const D2H_MEAN: &str = "d2Hm";
pub const H2O_MEAN: &str = "H2Om";
pub const D18O_SD: &str = "d18Osd";
pub const D2H_SD: &str = "d2Hsd";
pub const H2O_SD: &str = "H2Osd";
pub const D18O_CONDITION: &str = "COND. d18O";
pub const D2H_CONDITION: &str = "COND. d2H";
pub const REPLICATE_COUNT: &str = "n";

const INJECTION_COLUMNS: [&str; 7] = [
    ANALYSIS,
    INJECTION_NUMBER,
    GOOD,
    IGNORE,
    D18O_INJECTION,
    D2H_INJECTION,
    H2O_INJECTION,
];

const RAW_MEANS_REQUIRED: [&str; 4] = [ANALYSIS, IDENTIFIER, D18O_MEAN, D2H_MEAN];

/// Columns of an aggregated table with a meaning of their own; all others are passed through
pub const RAW_MEANS_COLUMNS: [&str; 11] = [
    ANALYSIS,
    IDENTIFIER,
    D18O_MEAN,
    D2H_MEAN,
    H2O_MEAN,
    D18O_SD,
    D2H_SD,
    H2O_SD,
    D18O_CONDITION,
    D2H_CONDITION,
    REPLICATE_COUNT,
];

/// Pick the delimiter occurring most often in the header line, preferring a comma on ties
pub fn sniff_delimiter(header: &str) -> u8 {
    [b',', b';', b'\t']
        .into_iter()
        .rev()
        .max_by_key(|delimiter| header.bytes().filter(|b| b == delimiter).count())
        .unwrap_or(b',')
}

/// Parse a numeric cell, accepting a decimal comma
///
/// Empty, malformed and non-finite cells are missing.
///
/// # Examples
///
/// ```
/// use iso_quant::ingest::parse_number;
///
/// assert_eq!(parse_number(" -11,52 "), Some(-11.52));
/// assert_eq!(parse_number("n.a."), None);
/// ```
pub fn parse_number(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    let value = if cell.contains(',') && !cell.contains('.') {
        cell.replace(',', ".").parse::<f64>().ok()
    } else {
        cell.parse::<f64>().ok()
    };
    value.filter(|value| value.is_finite())
}

/// Parse a cell holding a non-negative whole number, such as an injection number
fn parse_count(cell: &str) -> Option<u64> {
    parse_number(cell)
        .filter(|value| *value >= 0.0 && value.fract() == 0.0)
        .and_then(num_traits::cast)
}

/// Positions of the columns of one table, by trimmed header
struct Columns {
    table: &'static str,
    headers: Vec<String>,
    index: HashMap<String, usize>,
}

impl Columns {
    fn new(table: &'static str, headers: &csv::StringRecord) -> Self {
        let headers: Vec<String> = headers.iter().map(|h| h.trim().to_owned()).collect();
        let mut index = HashMap::new();
        for (position, header) in headers.iter().enumerate() {
            index.entry(header.clone()).or_insert(position);
        }
        Self {
            table,
            headers,
            index,
        }
    }

    /// Fail naming every required column which is absent
    fn require(&self, required: &[&str]) -> Result<()> {
        let missing: Vec<String> = required
            .iter()
            .filter(|column| !self.index.contains_key(**column))
            .map(|column| (*column).to_owned())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingColumn {
                table: self.table,
                columns: missing,
            })
        }
    }

    fn cell<'r>(&self, record: &'r csv::StringRecord, column: &str) -> Option<&'r str> {
        self.index
            .get(column)
            .and_then(|position| record.get(*position))
            .map(str::trim)
    }

    fn number(&self, record: &csv::StringRecord, column: &str) -> Option<f64> {
        self.cell(record, column).and_then(parse_number)
    }
}

fn reader(text: &str) -> csv::Reader<&[u8]> {
    let delimiter = sniff_delimiter(text.lines().next().unwrap_or_default());
    csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes())
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read an injection table
///
/// `Good` holds only when the cell is exactly 1, `Ignore` whenever the cell is present and not
/// 0. Rows without a sample id or a valid injection number are dropped with a warning.
///
/// # Errors
/// Returns an error if the input cannot be read or lacks a required column.
pub fn read_injections<R: Read>(mut input: R) -> Result<Vec<InjectionRecord>> {
    let mut text = String::new();
    input.read_to_string(&mut text)?;

    let mut rdr = reader(&text);
    let columns = Columns::new(INJECTION_TABLE, rdr.headers()?);
    columns.require(&INJECTION_COLUMNS)?;

    let mut records = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result?;
        let sample_id = columns.cell(&record, ANALYSIS).unwrap_or_default();
        if sample_id.is_empty() {
            log::warn!("{INJECTION_TABLE}: dropping row {} without a sample id", line + 1);
            continue;
        }
        let Some(replicate_index) = columns
            .cell(&record, INJECTION_NUMBER)
            .and_then(parse_count)
            .and_then(|index| u32::try_from(index).ok())
        else {
            log::warn!(
                "{INJECTION_TABLE}: dropping row {} of sample {sample_id}, invalid {INJECTION_NUMBER}",
                line + 1
            );
            continue;
        };

        records.push(InjectionRecord {
            sample_id: sample_id.to_owned(),
            identifier: columns
                .cell(&record, IDENTIFIER)
                .filter(|identifier| !identifier.is_empty())
                .map(str::to_owned),
            replicate_index,
            good: columns.number(&record, GOOD) == Some(1.0),
            ignore: columns.number(&record, IGNORE).is_some_and(|flag| flag != 0.0),
            d18o: columns.number(&record, D18O_INJECTION),
            d2h: columns.number(&record, D2H_INJECTION),
            h2o: columns.number(&record, H2O_INJECTION),
        });
    }

    log::debug!("{INJECTION_TABLE}: read {} injection(s)", records.len());
    Ok(records)
}

/// Read an injection table from disk
///
/// # Errors
/// See [`read_injections`].
pub fn load_injections(path: &Path) -> Result<Vec<InjectionRecord>> {
    log::info!("loading injections from {}", path.display());
    read_injections(read_text(path)?.as_bytes())
}

/// Read an aggregated ("raw means") table
///
/// Condition flags which are absent or unreadable are assessed afresh against the limits in
/// `config`. Rows with neither an oxygen nor a hydrogen mean carry nothing to calibrate and are
/// dropped. Columns without a meaning of their own end up in [`AggregatedSampleRow::metadata`].
///
/// # Errors
/// Returns an error if the input cannot be read or lacks a required column.
pub fn read_raw_means<R: Read>(
    mut input: R,
    config: &AggregationConfig,
) -> Result<Vec<AggregatedSampleRow>> {
    let mut text = String::new();
    input.read_to_string(&mut text)?;

    let mut rdr = reader(&text);
    let columns = Columns::new(RAW_MEANS_TABLE, rdr.headers()?);
    columns.require(&RAW_MEANS_REQUIRED)?;

    let passthrough: Vec<(usize, String)> = columns
        .headers
        .iter()
        .enumerate()
        .filter(|(position, header)| {
            !header.is_empty()
                && !RAW_MEANS_COLUMNS.contains(&header.as_str())
                && columns.index.get(*header) == Some(position)
        })
        .map(|(position, header)| (position, header.clone()))
        .collect();

    let mut rows = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result?;
        let sample_id = columns.cell(&record, ANALYSIS).unwrap_or_default();
        if sample_id.is_empty() {
            log::warn!("{RAW_MEANS_TABLE}: dropping row {} without a sample id", line + 1);
            continue;
        }

        let mut row = AggregatedSampleRow::empty(
            sample_id,
            columns.cell(&record, IDENTIFIER).unwrap_or_default(),
        );
        row.d18o_mean = columns.number(&record, D18O_MEAN);
        row.d2h_mean = columns.number(&record, D2H_MEAN);
        if row.d18o_mean.is_none() && row.d2h_mean.is_none() {
            log::debug!("{RAW_MEANS_TABLE}: dropping sample {sample_id} without means");
            continue;
        }
        row.h2o_mean = columns.number(&record, H2O_MEAN);
        row.d18o_sd = columns.number(&record, D18O_SD);
        row.d2h_sd = columns.number(&record, D2H_SD);
        row.h2o_sd = columns.number(&record, H2O_SD);
        row.d18o_condition = columns
            .cell(&record, D18O_CONDITION)
            .and_then(Condition::parse)
            .unwrap_or_else(|| Condition::assess(row.d18o_sd, config.d18o_sd_limit));
        row.d2h_condition = columns
            .cell(&record, D2H_CONDITION)
            .and_then(Condition::parse)
            .unwrap_or_else(|| Condition::assess(row.d2h_sd, config.d2h_sd_limit));
        row.n = columns
            .cell(&record, REPLICATE_COUNT)
            .and_then(parse_count)
            .and_then(|n| usize::try_from(n).ok());
        row.metadata = passthrough
            .iter()
            .map(|(position, header)| {
                (
                    header.clone(),
                    record.get(*position).unwrap_or_default().trim().to_owned(),
                )
            })
            .collect::<BTreeMap<_, _>>();

        rows.push(row);
    }

    log::debug!("{RAW_MEANS_TABLE}: read {} sample(s)", rows.len());
    Ok(rows)
}

/// Read an aggregated table from disk
///
/// # Errors
/// See [`read_raw_means`].
pub fn load_raw_means(path: &Path, config: &AggregationConfig) -> Result<Vec<AggregatedSampleRow>> {
    log::info!("loading raw means from {}", path.display());
    read_raw_means(read_text(path)?.as_bytes(), config)
}
