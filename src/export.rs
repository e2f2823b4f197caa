//! Delimited-text renderings of engine results
//!
//! Missing values are written as empty cells.
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use crate::calibration::{CalibrationCurve, Channel};
use crate::injection::AggregatedSampleRow;
use crate::ingest::{
    ANALYSIS, D18O_CONDITION, D18O_SD, D2H_CONDITION, D2H_SD, H2O_SD, IDENTIFIER,
    RAW_MEANS_COLUMNS,
};
use crate::quantification::QuantificationTable;
use crate::Result;

fn cell(value: Option<f64>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

/// Passthrough columns present on any of the rows
fn metadata_columns<'a, I>(metadata: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a BTreeMap<String, String>>,
{
    metadata
        .into_iter()
        .flat_map(|map| map.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Write aggregated rows in the layout [`crate::ingest::read_raw_means`] reads back
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_raw_means<W: Write>(output: W, rows: &[AggregatedSampleRow]) -> Result<()> {
    let extra = metadata_columns(rows.iter().map(|row| &row.metadata));
    let mut wtr = csv::Writer::from_writer(output);

    wtr.write_record(
        RAW_MEANS_COLUMNS
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str)),
    )?;
    for row in rows {
        let mut record = vec![
            row.sample_id.clone(),
            row.identifier.clone(),
            cell(row.d18o_mean),
            cell(row.d2h_mean),
            cell(row.h2o_mean),
            cell(row.d18o_sd),
            cell(row.d2h_sd),
            cell(row.h2o_sd),
            row.d18o_condition.to_string(),
            row.d2h_condition.to_string(),
            row.n.map(|n| n.to_string()).unwrap_or_default(),
        ];
        record.extend(
            extra
                .iter()
                .map(|column| row.metadata.get(column).cloned().unwrap_or_default()),
        );
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write one line per curve with its standards and the coefficients of both channels
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_curves<W: Write>(output: W, curves: &[CalibrationCurve]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(output);
    wtr.write_record([
        "Curve", "Enabled", "Standards", "a18", "b18", "R2_18", "a2", "b2", "R2_2",
    ])?;
    for curve in curves {
        wtr.write_record([
            curve.id.clone(),
            curve.enabled.to_string(),
            curve.standards.join(" "),
            curve.d18o.fit.slope.to_string(),
            curve.d18o.fit.intercept.to_string(),
            curve.d18o.fit.r_squared.to_string(),
            curve.d2h.fit.slope.to_string(),
            curve.d2h.fit.intercept.to_string(),
            curve.d2h.fit.r_squared.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write every calibration point of every curve
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_points<W: Write>(output: W, curves: &[CalibrationCurve]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(output);
    wtr.write_record(["Curve", "Iso", "x_raw", "y_target"])?;
    for curve in curves {
        for channel in Channel::ALL {
            for point in &curve.channel(channel).points {
                wtr.write_record([
                    curve.id.clone(),
                    channel.isotope().to_owned(),
                    point.raw.to_string(),
                    point.target.to_string(),
                ])?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Write a quantification table
///
/// Columns run: sample identity and passthrough metadata, then `d18O_ric{k}` and `d2H_ric{k}`
/// for the k-th applied curve, then means, cross-curve spreads and combined errors.
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_quantification<W: Write>(output: W, table: &QuantificationTable) -> Result<()> {
    let extra = metadata_columns(table.rows.iter().map(|row| &row.metadata));
    let curves = 1..=table.curve_ids.len();

    let mut header: Vec<String> = [ANALYSIS, IDENTIFIER]
        .into_iter()
        .map(str::to_owned)
        .chain(extra.iter().cloned())
        .chain(
            [D18O_SD, D2H_SD, H2O_SD, D18O_CONDITION, D2H_CONDITION]
                .into_iter()
                .map(str::to_owned),
        )
        .collect();
    for channel in Channel::ALL {
        header.extend(curves.clone().map(|k| format!("{}_ric{k}", channel.label())));
    }
    header.extend(
        [
            "d18Omean",
            "d2Hmean",
            "d18O sd across curves",
            "d2H sd across curves",
            "ERR d18O",
            "ERR d2H",
        ]
        .into_iter()
        .map(str::to_owned),
    );

    let mut wtr = csv::Writer::from_writer(output);
    wtr.write_record(&header)?;
    for row in &table.rows {
        let mut record = vec![row.sample_id.clone(), row.identifier.clone()];
        record.extend(
            extra
                .iter()
                .map(|column| row.metadata.get(column).cloned().unwrap_or_default()),
        );
        record.extend([
            cell(row.d18o_sd),
            cell(row.d2h_sd),
            cell(row.h2o_sd),
            row.d18o_condition.to_string(),
            row.d2h_condition.to_string(),
        ]);
        for channel in Channel::ALL {
            record.extend(row.channel(channel).reconciled.iter().copied().map(cell));
        }
        record.extend([
            cell(row.d18o.mean),
            cell(row.d2h.mean),
            row.d18o.cross_curve_sd.to_string(),
            row.d2h.cross_curve_sd.to_string(),
            cell(row.d18o.combined_error),
            cell(row.d2h.combined_error),
        ]);
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{write_curves, write_points, write_quantification, write_raw_means};
    use crate::calibration::detect_curves;
    use crate::config::AggregationConfig;
    use crate::ingest::read_raw_means;
    use crate::injection::AggregatedSampleRow;
    use crate::quantification::{quantify, unknown_samples, CurveSelection};
    use crate::registry::StandardRegistry;

    fn row(sample_id: &str, identifier: &str, d18o: Option<f64>, d2h: f64) -> AggregatedSampleRow {
        let mut row = AggregatedSampleRow::empty(sample_id, identifier);
        row.d18o_mean = d18o;
        row.d2h_mean = Some(d2h);
        row.d18o_sd = Some(0.03);
        row.d2h_sd = Some(0.4);
        row.n = Some(3);
        row
    }

    fn rows() -> Vec<AggregatedSampleRow> {
        let mut lake = row("4", "lake", Some(-8.0), -55.0);
        lake.metadata.insert("Siringa".to_owned(), "S1".to_owned());
        vec![
            row("1", "NIVOLET", Some(-21.9), -170.0),
            row("2", "ORMEA", Some(-11.0), -76.0),
            row("3", "H2OPI", Some(-6.2), -38.0),
            lake,
            row("5", "spring", None, -60.0),
        ]
    }

    fn render(write: impl FnOnce(&mut Vec<u8>) -> crate::Result<()>) -> String {
        let mut buffer = Vec::new();
        write(&mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn raw_means_are_read_back_unchanged() {
        let rows = rows();

        let text = render(|out| write_raw_means(out, &rows));
        let read = read_raw_means(text.as_bytes(), &AggregationConfig::default()).unwrap();

        assert!(text.starts_with("Analysis,Identifier 1,d18Om,d2Hm,"));
        assert_eq!(read.len(), rows.len());
        assert_eq!(read[3].metadata.get("Siringa").map(String::as_str), Some("S1"));
        assert_eq!(read[4].d18o_mean, None);
        assert_eq!(read[0].d18o_mean, rows[0].d18o_mean);
        assert_eq!(read[0].n, Some(3));
    }

    #[test]
    fn curves_and_points_have_one_line_each() {
        let curves = detect_curves(&rows(), &StandardRegistry::default());

        let summary = render(|out| write_curves(out, &curves));
        let points = render(|out| write_points(out, &curves));

        let summary: Vec<&str> = summary.lines().collect();
        assert_eq!(summary[0], "Curve,Enabled,Standards,a18,b18,R2_18,a2,b2,R2_2");
        assert!(summary[1].starts_with("cal1,true,H2OPI NIVOLET ORMEA,"));
        assert_eq!(summary.len(), 2);
        assert_eq!(points.lines().count(), 1 + 3 + 3);
        assert!(points.lines().nth(4).unwrap().starts_with("cal1,2H,"));
    }

    #[test]
    fn quantification_columns_follow_curve_order() {
        let rows = rows();
        let registry = StandardRegistry::default();
        let curves = detect_curves(&rows, &registry);
        let table = quantify(
            unknown_samples(&rows, &registry),
            &curves,
            &CurveSelection::from_enabled(&curves),
        )
        .computed()
        .unwrap();

        let text = render(|out| write_quantification(out, &table));
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "Analysis,Identifier 1,Siringa,d18Osd,d2Hsd,H2Osd,COND. d18O,COND. d2H,\
             d18O_ric1,d2H_ric1,d18Omean,d2Hmean,d18O sd across curves,d2H sd across curves,\
             ERR d18O,ERR d2H"
        );
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("4,lake,S1,0.03,0.4,,OK,OK,"));
        // spring has no oxygen mean: empty reconciled, mean and error cells, zero spread
        let spring: Vec<&str> = lines[2].split(',').collect();
        assert_eq!(spring[2], "");
        assert_eq!(spring[8], "");
        assert_eq!(spring[10], "");
        assert_eq!(spring[12], "0");
        assert_eq!(spring[14], "");
        assert!(!spring[15].is_empty());
    }
}
