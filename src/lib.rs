//! # HippoVolume library
//!
//! This crate quantifies the hippocampus on MR volumes assembled from
//! individual DICOM slices, and packs the result into a DICOM report.
//!
//! It builds on the dicom-rs ecosystem to read slice files and to write the
//! report. A run goes through these steps:
//!  - Series selection: the slices of one series (by description, default
//!    "HippoCrop") are picked out of a study and sorted along the stacking axis
//!  - Volume building: every slice is flipped and transposed into viewing
//!    orientation and stacked into a `(stack, row, column)` volume
//!  - Inference: each slice is conformed to the model's patch size, normalized
//!    by its own maximum and classified pixel by pixel, in parallel using rayon
//!  - Statistics: Dice, Jaccard, sensitivity and specificity between a
//!    prediction and a reference label volume
//!  - Reporting: class volumes and three representative slices with a label
//!    overlay are drawn on an RGB raster, saved as a Secondary Capture and
//!    optionally sent to an archive with `storescu`
//!
//! # Examples
//!
//! ## Segmenting the newest study in a routing directory
//!
//! ```no_run
//! # use hippo_volume::{
//! #     ConformTransform, Device, InferenceAgent, LabelVolume, NearestCentroidModel,
//! #     ReportComposer, ReportLayout, SeriesSelector, VolumeLoader, build_volume, summarize,
//! # };
//! let study = VolumeLoader::latest_study_dir("routing").expect("should have found a study");
//! let slices = VolumeLoader::load_slices_from_directory(&study)
//!     .expect("should have loaded files from directory");
//! let ordered = SeriesSelector::default()
//!     .select(slices)
//!     .expect("should have found exactly one HippoCrop series");
//! let (volume, header) = build_volume(&ordered).expect("should have built a volume");
//!
//! let agent = InferenceAgent::<NearestCentroidModel>::load("model.json", Device::Cpu, 64)
//!     .expect("should have loaded the model");
//! let conformed = agent.infer_unpadded(&volume).expect("should have segmented the volume");
//! let (_, rows, columns) = volume.dim();
//! let labels = LabelVolume::new(
//!     ConformTransform::for_extent((rows, columns), 64).restore(conformed.data()),
//! );
//!
//! let report = ReportComposer::new(ReportLayout::default())
//!     .and_then(|composer| composer.compose(&summarize(&labels), &header, &volume, &labels))
//!     .expect("should have composed the report");
//! report.save_png("report.png").expect("should have saved the report");
//! ```

pub mod archive;
pub mod conform;
pub mod enums;
pub mod header;
pub mod inference;
pub mod model;
pub mod orientation;
pub mod report;
pub mod secondary_capture;
pub mod slice;
pub mod stats;
pub mod volume;
pub mod volume_loader;

pub use conform::{ConformTransform, conform};
pub use enums::{DegenerateSlicePolicy, Device, Orientation, SortBy};
pub use header::Header;
pub use inference::{InferenceAgent, InferenceError};
pub use model::{LoadableModel, NearestCentroidModel, SegmentationModel};
pub use report::{ReportComposer, ReportImage, ReportLayout, summarize};
pub use slice::Slice;
pub use stats::{MetricResult, UNDEFINED, dice, jaccard, sensitivity, specificity};
pub use volume::{LabelVolume, Volume};
pub use volume_loader::{SeriesSelector, VolumeLoader, build_volume, select_series};
