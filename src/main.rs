use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use iso_quant::config::Config;
use iso_quant::injection::{
    aggregate_selections, default_selections, group_into_blocks, QualityFilter,
};
use iso_quant::{export, ingest, Computation, Session};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TOML file with aggregation limits and standard targets
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reduce an injection table to one line of replicate statistics per sample
    RawMeans {
        /// Injection table exported by the instrument
        injections: PathBuf,
        /// Where to write the aggregated table
        #[arg(long, short, value_name = "FILE")]
        output: PathBuf,
        /// Admit injections regardless of their Good and Ignore flags
        #[arg(long)]
        all_injections: bool,
    },
    /// Fit calibration curves from the standards of an aggregated table and quantify the rest
    Calibrate {
        /// Aggregated table, as written by `raw-means`
        raw_means: PathBuf,
        /// Directory receiving curves.csv, points.csv and quant.csv
        #[arg(long, short, value_name = "DIR")]
        output: PathBuf,
        /// Curve ids to leave out of the quantification
        #[arg(long, value_delimiter = ',')]
        disable: Vec<String>,
    },
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn raw_means(config: &Config, injections: &Path, output: &Path, all: bool) -> Result<()> {
    let filter = if all {
        QualityFilter::All
    } else {
        QualityFilter::StableOnly
    };
    let records = ingest::load_injections(injections)
        .with_context(|| format!("reading injections from {}", injections.display()))?;
    let blocks = group_into_blocks(records).context("grouping injections by sample")?;
    let selections = default_selections(&blocks, filter, &config.aggregation);
    let raw_means = aggregate_selections(&blocks, &selections, filter, &config.aggregation);

    for failure in &raw_means.failures {
        eprintln!("{}: {}", failure.sample_id, failure.reason);
    }
    export::write_raw_means(create(output)?, &raw_means.rows)
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "{} sample(s) written to {}",
        raw_means.rows.len(),
        output.display()
    );
    Ok(())
}

fn calibrate(config: &Config, input: &Path, output: &Path, disable: &[String]) -> Result<()> {
    let rows = ingest::load_raw_means(input, &config.aggregation)
        .with_context(|| format!("reading raw means from {}", input.display()))?;
    let registry = config.registry().context("building the standard registry")?;
    let mut session = Session::new(registry, rows);
    for id in disable {
        if !session.set_curve_enabled(id, false) {
            bail!("no curve with id {id}");
        }
    }

    fs::create_dir_all(output).with_context(|| format!("creating {}", output.display()))?;
    export::write_curves(create(&output.join("curves.csv"))?, session.curves())?;
    export::write_points(create(&output.join("points.csv"))?, session.curves())?;
    match session.quantification() {
        Computation::Computed(table) => {
            export::write_quantification(create(&output.join("quant.csv"))?, table)?;
            println!(
                "{} curve(s), {} sample(s) quantified into {}",
                table.curve_ids.len(),
                table.rows.len(),
                output.display()
            );
        }
        Computation::Nothing(reason) => eprintln!("nothing quantified: {reason}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    match &cli.command {
        Command::RawMeans {
            injections,
            output,
            all_injections,
        } => raw_means(&config, injections, output, *all_injections),
        Command::Calibrate {
            raw_means,
            output,
            disable,
        } => calibrate(&config, raw_means, output, disable),
    }
}
