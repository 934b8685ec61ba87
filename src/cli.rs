//! Command-line arguments of the `hippo-volume` binary.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// HippoVolume.AI - hippocampal volume quantification
///
/// Picks the newest study in a routing directory, segments the hippocampus
/// series, writes a Secondary Capture report and sends it to the archive.
///
/// Examples:
///   hippo-volume /data/routing --params model.json
///   hippo-volume --study /data/routing/1.2.3 --no-send --preview report.png
///   hippo-volume --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory holding one subdirectory per incoming study
    #[arg(
        value_name = "ROUTING_DIR",
        required_unless_present_any = ["init_config", "study"]
    )]
    pub routing_dir: Option<PathBuf>,

    /// Process this study directory instead of the newest one in ROUTING_DIR
    #[arg(long, value_name = "DIR")]
    pub study: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for hippo-volume.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Reference segmentation (one DICOM label series) to score the prediction against
    ///
    /// Overlap scores are drawn on the report and written next to it as JSON.
    #[arg(long, value_name = "DIR")]
    pub reference: Option<PathBuf>,

    /// Model parameter file (JSON)
    #[arg(short, long, value_name = "FILE", env = "HIPPO_VOLUME_PARAMS")]
    pub params: Option<PathBuf>,

    /// Device to evaluate the model on (cpu, cuda, cuda:N)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Where to write the Secondary Capture report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Also save the report as a PNG image
    #[arg(long, value_name = "FILE")]
    pub preview: Option<PathBuf>,

    /// Do not send the report to the archive
    #[arg(long)]
    pub no_send: bool,

    /// Keep the study directory after sending
    #[arg(long)]
    pub keep_study: bool,

    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Write a default hippo-volume.toml and exit
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Log level used when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
