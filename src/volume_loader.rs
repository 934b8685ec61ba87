use crate::{
    enums::{Orientation, SortBy},
    header::Header,
    orientation::to_viewing,
    slice::Slice,
    volume::{LabelVolume, Volume},
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Series description the HippoCrop tool stamps on its output.
pub const DEFAULT_SERIES_DESCRIPTION: &str = "HippoCrop";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No series described as '{description}' found")]
    NoMatchingSeries { description: String },

    #[error("Can not figure out which series to run on: '{description}' matches {series:?}")]
    AmbiguousSeries {
        description: String,
        series: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions: expected {expected:?}, got {actual:?}")]
    InconsistentDimensions {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("No study directories found in {0}")]
    NoStudyDirectory(PathBuf),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Label {value} at slice {slice} does not fit an 8-bit class")]
    LabelOutOfRange { slice: usize, value: u16 },
}

/// Picks the one series to run on out of everything a study contains.
#[derive(Clone, Debug)]
pub struct SeriesSelector {
    pub description: String,
    pub sort_by: SortBy,
    /// Plane the series is stacked in; decides which position component sorts it
    pub stacking: Orientation,
}

impl Default for SeriesSelector {
    fn default() -> Self {
        Self::new(DEFAULT_SERIES_DESCRIPTION)
    }
}

impl SeriesSelector {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            sort_by: SortBy::ImagePositionPatient,
            stacking: Orientation::Sagittal,
        }
    }

    pub fn with_sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn with_stacking(mut self, stacking: Orientation) -> Self {
        self.stacking = stacking;
        self
    }

    /// Keep the slices whose series description matches exactly and order them.
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError`] if nothing matches or the matches belong to
    /// more than one series instance.
    pub fn select(&self, slices: Vec<Slice>) -> Result<Vec<Slice>, SelectionError> {
        let mut matching: Vec<_> = slices
            .into_iter()
            .filter(|slice| slice.series_description() == self.description)
            .collect();

        if matching.is_empty() {
            return Err(SelectionError::NoMatchingSeries {
                description: self.description.clone(),
            });
        }

        let series: BTreeSet<_> = matching
            .iter()
            .map(|slice| slice.series_instance_uid().to_string())
            .collect();
        if series.len() != 1 {
            return Err(SelectionError::AmbiguousSeries {
                description: self.description.clone(),
                series: series.into_iter().collect(),
            });
        }

        self.sort(&mut matching);
        info!(
            slices = matching.len(),
            description = %self.description,
            "selected series for inference"
        );
        Ok(matching)
    }

    /// Order slices by this selector's sort key; equal keys keep their input order.
    pub fn sort(&self, slices: &mut [Slice]) {
        match self.sort_by {
            SortBy::ImagePositionPatient => {
                let axis = self.stacking.patient_axis();
                slices.sort_by(|a, b| {
                    a.position_along(axis)
                        .partial_cmp(&b.position_along(axis))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            SortBy::InstanceNumber => slices.sort_by_key(|slice| slice.instance_number),
            SortBy::None => {}
        }
    }
}

/// Select the series described as `description`, ascending along the sagittal axis.
pub fn select_series(
    slices: Vec<Slice>,
    description: &str,
) -> Result<Vec<Slice>, SelectionError> {
    SeriesSelector::new(description).select(slices)
}

/// Stack ordered slices into a volume and take the header of the first one.
///
/// Every slice passes through [`to_viewing`] before stacking, so the stored
/// `(rows, columns)` become `(columns, rows)` of the volume.
pub fn build_volume(ordered_slices: &[Slice]) -> Result<(Volume, Header), VolumeLoaderError> {
    let first = ordered_slices
        .first()
        .ok_or(VolumeLoaderError::NoValidImages)?;
    let series: BTreeSet<_> = ordered_slices
        .iter()
        .map(|slice| slice.series_instance_uid())
        .collect();
    if series.len() > 1 {
        return Err(SelectionError::AmbiguousSeries {
            description: first.series_description().to_string(),
            series: series.into_iter().map(str::to_string).collect(),
        }
        .into());
    }
    let images: Vec<_> = ordered_slices.iter().map(|slice| &slice.pixels).collect();
    VolumeLoader::validate_dimensions(&images)?;

    let volume_array = VolumeLoader::build_volume_array(&images);
    let spacing = ordered_slices
        .iter()
        .find_map(|slice| slice.spacing)
        .map(|(row, column, thickness)| (thickness, column, row));

    debug!(dim = ?volume_array.dim(), ?spacing, "built volume");
    Ok((
        Volume::new(volume_array).with_spacing(spacing),
        first.header.clone(),
    ))
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Read every DICOM file below `path` into a [`Slice`].
    ///
    /// Files that are not DICOM or carry no decodable pixel data are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if no slice could be read. Unreadable directory entries
    /// are logged and skipped like any other unusable file.
    pub fn load_slices_from_directory(
        path: impl AsRef<Path>,
    ) -> Result<Vec<Slice>, VolumeLoaderError> {
        let paths: Vec<PathBuf> = WalkDir::new(path.as_ref())
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();

        let slices = Self::load_slices_from_file_paths(&paths);
        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        info!(
            files = paths.len(),
            slices = slices.len(),
            path = %path.as_ref().display(),
            "read DICOM slices"
        );
        Ok(slices)
    }

    /// Read a reference segmentation stored as a single DICOM series below `path`.
    ///
    /// The slices are ordered by `selector` without filtering on their
    /// description and oriented the way [`build_volume`] orients image slices,
    /// so the labels line up with the volume built from the matching series.
    ///
    /// # Errors
    ///
    /// Returns error if the slices span several series, differ in extent or
    /// hold a value above 255
    pub fn load_label_volume(
        path: impl AsRef<Path>,
        selector: &SeriesSelector,
    ) -> Result<LabelVolume, VolumeLoaderError> {
        let mut slices = Self::load_slices_from_directory(path)?;
        selector.sort(&mut slices);
        let (volume, _) = build_volume(&slices)?;
        Self::to_labels(volume)
    }

    fn to_labels(volume: Volume) -> Result<LabelVolume, VolumeLoaderError> {
        let data = volume.into_data();
        let out_of_range = data
            .indexed_iter()
            .find(|(_, value)| **value > u16::from(u8::MAX));
        if let Some(((slice, _, _), &value)) = out_of_range {
            return Err(VolumeLoaderError::LabelOutOfRange { slice, value });
        }
        Ok(LabelVolume::new(data.mapv(|value| value as u8)))
    }

    /// Load slices from file paths, in parallel
    pub fn load_slices_from_file_paths(paths: &[impl AsRef<Path> + Sync]) -> Vec<Slice> {
        paths
            .par_iter()
            .filter_map(|path| {
                let path = path.as_ref();
                match open_file(path) {
                    Ok(object) => Self::slice_from_dicom(&object).or_else(|| {
                        warn!(path = %path.display(), "skipping file without decodable pixel data");
                        None
                    }),
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "skipping non-DICOM file");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn slice_from_dicom(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Slice> {
        let pixels = Self::decode_image(dicom_object)?;
        let mut slice = Slice::new(Header::from_dicom(dicom_object), pixels);
        slice.instance_number = dicom_object
            .element(tags::INSTANCE_NUMBER)
            .ok()
            .and_then(|e| e.to_int::<i32>().ok());
        slice.image_position = dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()
            .and_then(|e| e.to_multi_float32().ok())
            .and_then(|pos| Some([*pos.first()?, *pos.get(1)?, *pos.get(2)?]));
        slice.spacing = Self::get_spacing(dicom_object);
        Some(slice)
    }

    /// Most recently modified subdirectory of `routing_dir`; each holds one study
    pub fn latest_study_dir(routing_dir: impl AsRef<Path>) -> Result<PathBuf, VolumeLoaderError> {
        let routing_dir = routing_dir.as_ref();
        let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in fs::read_dir(routing_dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_dir() {
                continue;
            }
            let modified = metadata.modified()?;
            if latest.as_ref().is_none_or(|(time, _)| modified > *time) {
                latest = Some((modified, entry.path()));
            }
        }
        latest
            .map(|(_, path)| path)
            .ok_or_else(|| VolumeLoaderError::NoStudyDirectory(routing_dir.to_path_buf()))
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<u16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        // stored values, as the model was trained on them
        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn validate_dimensions(images: &[&Array2<u16>]) -> Result<(), VolumeLoaderError> {
        let expected = images[0].dim();
        match images.iter().find(|img| img.dim() != expected) {
            Some(img) => Err(VolumeLoaderError::InconsistentDimensions {
                expected,
                actual: img.dim(),
            }),
            None => Ok(()),
        }
    }

    fn build_volume_array(images: &[&Array2<u16>]) -> Array3<u16> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<u16>::zeros((depth, width, height));

        for (i, image) in images.iter().enumerate() {
            volume
                .slice_mut(s![i, .., ..])
                .assign(&to_viewing(image.view()));
        }

        volume
    }

    fn get_spacing(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<(f32, f32, f32)> {
        let pixel_spacing = dicom_object
            .element(tags::PIXEL_SPACING)
            .ok()?
            .to_multi_float32()
            .ok()?;

        let slice_thickness = dicom_object
            .element(tags::SLICE_THICKNESS)
            .ok()?
            .to_float32()
            .ok()?;

        Some((*pixel_spacing.first()?, *pixel_spacing.get(1)?, slice_thickness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn slice(series: &str, description: &str, x: f32, fill: u16) -> Slice {
        let header = Header {
            series_instance_uid: series.to_string(),
            series_description: description.to_string(),
            ..Header::default()
        };
        Slice::new(header, Array2::from_elem((2, 3), fill)).with_image_position([x, 0.0, 0.0])
    }

    #[test]
    fn sorts_matching_series_ascending_by_position() {
        let slices = vec![
            slice("1.1", "HippoCrop", 3.0, 3),
            slice("1.1", "HippoCrop", 2.0, 2),
            slice("9.9", "T1 MPRAGE", 0.5, 9),
            slice("1.1", "HippoCrop", 1.0, 1),
        ];

        let selected = select_series(slices, "HippoCrop").unwrap();
        let positions: Vec<_> = selected.iter().map(|s| s.position_along(0)).collect();
        assert_eq!(positions, vec![Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn equal_positions_keep_input_order() {
        let slices = vec![
            slice("1.1", "HippoCrop", 1.0, 7),
            slice("1.1", "HippoCrop", 1.0, 8),
            slice("1.1", "HippoCrop", 0.0, 6),
        ];

        let selected = select_series(slices, "HippoCrop").unwrap();
        let fills: Vec<_> = selected.iter().map(|s| s.pixels[[0, 0]]).collect();
        assert_eq!(fills, vec![6, 7, 8]);
    }

    #[test]
    fn interleaved_series_are_ambiguous() {
        let slices = vec![
            slice("1.1", "HippoCrop", 1.0, 0),
            slice("2.2", "HippoCrop", 1.5, 0),
            slice("1.1", "HippoCrop", 2.0, 0),
            slice("2.2", "HippoCrop", 2.5, 0),
        ];

        let err = select_series(slices, "HippoCrop").unwrap_err();
        assert_eq!(
            err,
            SelectionError::AmbiguousSeries {
                description: "HippoCrop".to_string(),
                series: vec!["1.1".to_string(), "2.2".to_string()],
            }
        );
    }

    #[test]
    fn description_match_is_case_sensitive() {
        let slices = vec![slice("1.1", "hippocrop", 1.0, 0)];
        assert!(matches!(
            select_series(slices, "HippoCrop"),
            Err(SelectionError::NoMatchingSeries { .. })
        ));
    }

    #[test]
    fn sorts_by_instance_number_when_asked() {
        let mut slices = vec![
            slice("1.1", "HippoCrop", 0.0, 2).with_instance_number(2),
            slice("1.1", "HippoCrop", 1.0, 1).with_instance_number(1),
        ];
        slices[0].image_position = None;

        let selected = SeriesSelector::default()
            .with_sort_by(SortBy::InstanceNumber)
            .select(slices)
            .unwrap();
        assert_eq!(selected[0].instance_number, Some(1));
    }

    #[test]
    fn builds_oriented_volume_with_first_header() {
        let header = |uid: &str| Header {
            series_instance_uid: "1.1".to_string(),
            sop_instance_uid: Some(uid.to_string()),
            ..Header::default()
        };
        let slices = vec![
            Slice::new(header("a"), array![[1u16, 2, 3], [4, 5, 6]])
                .with_spacing((0.5, 0.25, 2.0)),
            Slice::new(header("b"), array![[7u16, 8, 9], [10, 11, 12]]),
        ];

        let (volume, hdr) = build_volume(&slices).unwrap();
        assert_eq!(volume.dim(), (2, 3, 2));
        assert_eq!(
            volume.data().slice(s![0, .., ..]),
            array![[6u16, 3], [5, 2], [4, 1]]
        );
        assert_eq!(
            volume.data().slice(s![1, .., ..]),
            array![[12u16, 9], [11, 8], [10, 7]]
        );
        assert_eq!(volume.spacing(), Some((2.0, 0.25, 0.5)));
        assert_eq!(hdr.sop_instance_uid.as_deref(), Some("a"));
    }

    #[test]
    fn rejects_mixed_extents() {
        let slices = vec![
            Slice::new(Header::default(), Array2::zeros((2, 3))),
            Slice::new(Header::default(), Array2::zeros((3, 3))),
        ];
        assert!(matches!(
            build_volume(&slices),
            Err(VolumeLoaderError::InconsistentDimensions {
                expected: (2, 3),
                actual: (3, 3)
            })
        ));
        assert!(matches!(
            build_volume(&[]),
            Err(VolumeLoaderError::NoValidImages)
        ));
    }

    #[test]
    fn rejects_slices_from_different_series() {
        let slice = |series: &str| {
            let header = Header {
                series_instance_uid: series.to_string(),
                series_description: "HippoCrop".to_string(),
                ..Header::default()
            };
            Slice::new(header, Array2::zeros((2, 2)))
        };
        let slices = vec![slice("1.1"), slice("2.2"), slice("1.1")];

        let err = build_volume(&slices).unwrap_err();
        assert!(matches!(
            err,
            VolumeLoaderError::Selection(SelectionError::AmbiguousSeries { ref series, .. })
                if series == &["1.1".to_string(), "2.2".to_string()]
        ));
        assert!(build_volume(&slices[..1]).is_ok());
    }

    #[test]
    fn label_values_must_fit_a_byte() {
        let mut data = Array3::<u16>::zeros((2, 2, 2));
        data[[1, 0, 1]] = 2;
        let labels = VolumeLoader::to_labels(Volume::new(data.clone())).unwrap();
        assert_eq!(labels.count_class(2), 1);

        data[[1, 1, 0]] = 300;
        assert!(matches!(
            VolumeLoader::to_labels(Volume::new(data)),
            Err(VolumeLoaderError::LabelOutOfRange { slice: 1, value: 300 })
        ));
    }

    #[test]
    fn missing_directory_reads_as_no_images() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            VolumeLoader::load_slices_from_directory(dir.path().join("gone")),
            Err(VolumeLoaderError::NoValidImages)
        ));
    }

    #[test]
    fn picks_latest_study_directory() {
        let routing = tempfile::tempdir().unwrap();
        let older = routing.path().join("study-a");
        let newer = routing.path().join("study-b");
        fs::create_dir(&older).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::create_dir(&newer).unwrap();
        fs::write(routing.path().join("stray.txt"), b"not a study").unwrap();

        assert_eq!(VolumeLoader::latest_study_dir(routing.path()).unwrap(), newer);
    }

    #[test]
    fn empty_tree_has_no_images() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        assert!(matches!(
            VolumeLoader::load_slices_from_directory(dir.path()),
            Err(VolumeLoaderError::NoValidImages)
        ));
    }
}
