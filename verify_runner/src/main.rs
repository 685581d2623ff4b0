use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use storm_verify::core_modules::field::RasterFieldSource;
use storm_verify::core_modules::region_extractor::ThresholdRegionExtractor;
use storm_verify::core_modules::store::JsonDirectoryStore;
use storm_verify::{
    CycleOutcome, CycleReport, CycleSpec, VerificationConfig, VerificationPipeline, WorkerPool,
    setup_logging,
};
use tracing::{info, warn};

/// Verifies forecast cycles of one case day against radar truth.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON configuration file; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory the field templates are resolved against.
    #[arg(long, default_value = ".")]
    data_root: PathBuf,

    /// Case date, YYYYMMDD.
    #[arg(long)]
    case_date: String,

    /// Initialization time, HHMM. Repeat for several cycles. Times before 1200
    /// belong to the following calendar day.
    #[arg(long = "init", required = true)]
    inits: Vec<String>,

    /// Overrides the configured domain name.
    #[arg(long)]
    domain: Option<String>,

    /// Number of cycles verified at once; defaults to the CPU count.
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_cycles(args: &Args, config: &VerificationConfig) -> Result<Vec<CycleSpec>> {
    let case_date = NaiveDate::parse_from_str(&args.case_date, "%Y%m%d")
        .with_context(|| format!("invalid case date {}", args.case_date))?;

    args.inits
        .iter()
        .map(|init| {
            let time = NaiveTime::parse_from_str(init, "%H%M")
                .with_context(|| format!("invalid init time {init}"))?;
            // Convective case days run past midnight UTC.
            let day = if time < NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default() {
                case_date.succ_opt().context("case date out of range")?
            } else {
                case_date
            };
            let init_time = Utc.from_utc_datetime(&day.and_time(time));
            Ok(CycleSpec::from_config(case_date, init_time, config))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let mut config = match &args.config {
        Some(path) => VerificationConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => VerificationConfig::default(),
    };
    if let Some(domain) = &args.domain {
        config.domain = domain.clone();
    }
    config.validate()?;

    let cycles = parse_cycles(&args, &config)?;
    info!(cycles = cycles.len(), domain = %config.domain, "starting verification");

    let source = RasterFieldSource::new(&args.data_root, config.fields.clone());
    let store = JsonDirectoryStore::new(config.store_root.clone());
    let pipeline = Arc::new(VerificationPipeline::new(
        config,
        Box::new(ThresholdRegionExtractor),
        Box::new(source),
        Box::new(store),
    ));

    let pool = match args.workers {
        Some(n) => WorkerPool::new(pipeline, n),
        None => WorkerPool::with_default_size(pipeline),
    };

    let mut failed = 0;
    for outcome in pool.process_all(cycles).await {
        match outcome {
            CycleOutcome::Done(CycleReport::Completed { key, path, summary }) => {
                println!(
                    "{key}: hits={} misses={} false_alarms={} csi={} -> {}",
                    summary.hits,
                    summary.misses,
                    summary.false_alarms,
                    summary.csi.map_or("n/a".to_string(), |v| format!("{v:.3}")),
                    path.display()
                );
            }
            CycleOutcome::Done(CycleReport::Skipped { key }) => {
                println!("{key}: skipped (no truth objects)");
            }
            CycleOutcome::Failed { key, error } => {
                warn!(cycle = %key, %error, "cycle abandoned");
                println!("{key}: FAILED ({error})");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} cycle(s) failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(inits: &[&str]) -> Args {
        Args::parse_from(
            ["verify_runner", "--case-date", "20210514"]
                .into_iter()
                .chain(inits.iter().flat_map(|i| ["--init", *i])),
        )
    }

    #[test]
    fn evening_and_overnight_inits() {
        let config = VerificationConfig::default();
        let cycles = parse_cycles(&args(&["2300", "0030"]), &config).unwrap();
        assert_eq!(
            cycles[0].key.init_time,
            Utc.with_ymd_and_hms(2021, 5, 14, 23, 0, 0).unwrap()
        );
        assert_eq!(
            cycles[1].key.init_time,
            Utc.with_ymd_and_hms(2021, 5, 15, 0, 30, 0).unwrap()
        );
        assert_eq!(cycles[1].key.case_date, NaiveDate::from_ymd_opt(2021, 5, 14).unwrap());
    }

    #[test]
    fn rejects_bad_init() {
        let config = VerificationConfig::default();
        assert!(parse_cycles(&args(&["25xx"]), &config).is_err());
    }
}
