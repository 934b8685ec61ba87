//! Configuration file handling.
//!
//! Settings come from `hippo-volume.toml`; command-line arguments override
//! them. Every field has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hippo_volume::{
    archive::ArchiveConfig,
    enums::{DegenerateSlicePolicy, Orientation, SortBy},
    inference::DEFAULT_PATCH_SIZE,
    report::ReportLayout,
    volume_loader::DEFAULT_SERIES_DESCRIPTION,
};
use serde::{Deserialize, Serialize};

use crate::cli::Args;

pub const DEFAULT_CONFIG_FILE: &str = "hippo-volume.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub series: SeriesConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub report: ReportLayout,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,
}

/// Which series of a study to segment, and how to stack it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesConfig {
    #[serde(default = "default_description")]
    pub description: String,

    #[serde(default)]
    pub sort_by: SortBy,

    #[serde(default = "default_stacking")]
    pub stacking: Orientation,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            description: default_description(),
            sort_by: SortBy::default(),
            stacking: default_stacking(),
        }
    }
}

fn default_description() -> String {
    DEFAULT_SERIES_DESCRIPTION.to_string()
}

fn default_stacking() -> Orientation {
    Orientation::Sagittal
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Model parameter file
    #[serde(default = "default_parameters")]
    pub parameters: PathBuf,

    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_patch_size")]
    pub patch_size: usize,

    #[serde(default)]
    pub degenerate_slices: DegenerateSlicePolicy,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            parameters: default_parameters(),
            device: default_device(),
            patch_size: default_patch_size(),
            degenerate_slices: DegenerateSlicePolicy::default(),
        }
    }
}

fn default_parameters() -> PathBuf {
    PathBuf::from("hippo-volume-model.json")
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_patch_size() -> usize {
    DEFAULT_PATCH_SIZE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Secondary Capture file written for each run
    #[serde(default = "default_report_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub preview_png: Option<PathBuf>,

    /// Send the report to the archive after writing it
    #[serde(default = "default_true")]
    pub send: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_report_path(),
            preview_png: None,
            send: true,
        }
    }
}

fn default_report_path() -> PathBuf {
    PathBuf::from("out/report.dcm")
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `hippo-volume.toml` from the current directory, if there is one.
    pub fn load_default() -> Result<Option<Self>> {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        if path.exists() {
            Ok(Some(Self::load(path)?))
        } else {
            Ok(None)
        }
    }

    /// Apply the arguments given on the command line.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref params) = args.params {
            self.inference.parameters = params.clone();
        }
        if let Some(ref device) = args.device {
            self.inference.device = device.clone();
        }
        if let Some(ref output) = args.output {
            self.output.path = output.clone();
        }
        if let Some(ref preview) = args.preview {
            self.output.preview_png = Some(preview.clone());
        }
        if args.no_send {
            self.output.send = false;
        }
        if args.keep_study {
            self.archive.cleanup_study_dir = false;
        }
    }

    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&Config::default()).context("Failed to serialize default config")
    }
}
