//! HippoVolume.AI command-line pipeline.
//!
//! Exit codes:
//!   0 - Report written (and sent, unless disabled)
//!   1 - Any error

mod cli;
mod config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use cli::Args;
use config::{Config, DEFAULT_CONFIG_FILE};
use hippo_volume::{
    archive::ArchiveSender,
    conform::ConformTransform,
    enums::Device,
    inference::InferenceAgent,
    model::NearestCentroidModel,
    report::{ANTERIOR, POSTERIOR, ReportComposer, summarize},
    secondary_capture::write_secondary_capture,
    stats::MetricResult,
    volume::LabelVolume,
    volume_loader::{SeriesSelector, VolumeLoader, build_volume},
};
use serde::Serialize;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use web_time::Instant;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);
    info!("HippoVolume.AI v{}", env!("CARGO_PKG_VERSION"));
    debug!(?args, "arguments");

    if let Err(e) = run(args).await {
        error!("{e:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);
    if path.exists() {
        return Err(anyhow!(
            "{DEFAULT_CONFIG_FILE} already exists. Remove it first or edit it manually."
        ));
    }
    std::fs::write(path, Config::default_toml()?)
        .with_context(|| format!("Failed to write {DEFAULT_CONFIG_FILE}"))?;
    println!("Created {DEFAULT_CONFIG_FILE} with default settings.");
    Ok(())
}

fn init_logging(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn load_config(args: &Args) -> Result<Config> {
    let config = match args.config {
        Some(ref path) => Config::load(path)?,
        None => Config::load_default()?.unwrap_or_default(),
    };
    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    let device: Device = config
        .inference
        .device
        .parse()
        .map_err(|e: String| anyhow!(e))?;

    let study_dir = match (args.study, args.routing_dir) {
        (Some(study), _) => study,
        (None, Some(routing)) => VolumeLoader::latest_study_dir(&routing)
            .with_context(|| format!("Failed to find a study in {}", routing.display()))?,
        (None, None) => return Err(anyhow!("either ROUTING_DIR or --study is required")),
    };
    info!(path = %study_dir.display(), "processing study");

    let slices = VolumeLoader::load_slices_from_directory(&study_dir)
        .with_context(|| format!("Failed to read slices from {}", study_dir.display()))?;
    let selector = SeriesSelector::new(config.series.description.as_str())
        .with_sort_by(config.series.sort_by)
        .with_stacking(config.series.stacking);
    let ordered = selector.select(slices)?;
    let (volume, header) = build_volume(&ordered)?;
    info!(dim = ?volume.dim(), series = %header.series_instance_uid, "built volume");

    let agent = InferenceAgent::<NearestCentroidModel>::load(
        &config.inference.parameters,
        device,
        config.inference.patch_size,
    )?
    .with_degenerate_policy(config.inference.degenerate_slices);
    let conformed = agent.infer_unpadded(&volume)?;

    let (_, rows, columns) = volume.dim();
    let transform = ConformTransform::for_extent((rows, columns), agent.patch_size());
    let labels = LabelVolume::new(transform.restore(conformed.data()));

    let summary = summarize(&labels).with_voxel_volume(volume.voxel_volume_mm3());
    info!(
        total = summary.total,
        anterior = summary.count(ANTERIOR),
        posterior = summary.count(POSTERIOR),
        "hippocampal volume"
    );

    let metrics = match args.reference {
        Some(ref reference) => Some(evaluate_reference(reference, &selector, &labels)?),
        None => None,
    };

    let report = ReportComposer::new(config.report.clone())?
        .compose_with_metrics(&summary, &header, &volume, &labels, metrics.as_ref())
        .context("Failed to compose report")?;
    if let Some(ref preview) = config.output.preview_png {
        report
            .save_png(preview)
            .with_context(|| format!("Failed to write {}", preview.display()))?;
    }

    let output = prepare_output(&config.output.path)?;
    write_secondary_capture(&report, &header, &output)
        .with_context(|| format!("Failed to write report to {}", output.display()))?;
    if let (Some(metrics), Some(reference)) = (&metrics, &args.reference) {
        let record = MetricsRecord {
            series_instance_uid: &header.series_instance_uid,
            reference,
            metrics,
        };
        write_metrics(&metrics_path(&output), &record)?;
    }

    if config.output.send {
        let sender = ArchiveSender::new(config.archive.clone());
        sender.send(&output).await?;
        sender.finish(&study_dir).await?;
    } else {
        info!("archive transmission disabled");
    }

    info!(
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        report = %output.display(),
        "done"
    );
    Ok(())
}

/// Scores of one run against its reference segmentation.
#[derive(Serialize)]
struct MetricsRecord<'a> {
    series_instance_uid: &'a str,
    reference: &'a Path,
    #[serde(flatten)]
    metrics: &'a MetricResult,
}

fn evaluate_reference(
    reference: &Path,
    selector: &SeriesSelector,
    labels: &LabelVolume,
) -> Result<MetricResult> {
    let expected = VolumeLoader::load_label_volume(reference, selector).with_context(|| {
        format!("Failed to read reference labels from {}", reference.display())
    })?;
    let metrics = MetricResult::compute(labels.data(), expected.data())
        .context("Reference labels do not match the segmented volume")?;
    info!(
        dice = metrics.dice,
        jaccard = metrics.jaccard,
        sensitivity = metrics.sensitivity,
        specificity = metrics.specificity,
        "compared with reference"
    );
    Ok(metrics)
}

/// `out/report.dcm` -> `out/report.metrics.json`
fn metrics_path(report: &Path) -> PathBuf {
    report.with_extension("metrics.json")
}

fn write_metrics(path: &Path, record: &MetricsRecord<'_>) -> Result<()> {
    let json = serde_json::to_string_pretty(record).context("Failed to serialize metrics")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "wrote metrics");
    Ok(())
}

fn prepare_output(path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippo_volume::stats::UNDEFINED;
    use ndarray::Array3;

    #[test]
    fn metrics_are_written_next_to_the_report() {
        assert_eq!(
            metrics_path(Path::new("out/report.dcm")),
            PathBuf::from("out/report.metrics.json")
        );

        let dir = tempfile::tempdir().unwrap();
        let path = metrics_path(&dir.path().join("report.dcm"));
        let metrics = MetricResult {
            dice: 0.8,
            jaccard: 2.0 / 3.0,
            sensitivity: 1.0,
            specificity: UNDEFINED,
        };
        let record = MetricsRecord {
            series_instance_uid: "1.2.3",
            reference: Path::new("labels"),
            metrics: &metrics,
        };
        write_metrics(&path, &record).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["series_instance_uid"], "1.2.3");
        assert_eq!(json["reference"], "labels");
        assert_eq!(json["dice"], 0.8);
        assert_eq!(json["specificity"], -1.0);
    }

    #[test]
    fn missing_reference_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let labels = LabelVolume::new(Array3::ones((2, 4, 4)));
        let result = evaluate_reference(
            &dir.path().join("no-labels"),
            &SeriesSelector::default(),
            &labels,
        );
        assert!(result.is_err());
    }
}
