//! Packs a report into a DICOM Secondary Capture instance.
//!
//! The report becomes a one-image series of its own, with freshly generated
//! study, series and instance UIDs. Patient identity and the study/series
//! dates are carried over from the source header.

use std::path::Path;

use dicom::{
    core::{DataElement, PrimitiveValue, Tag, VR},
    object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject, WithMetaError, WriteError},
};
use dicom_dictionary_std::{tags, uids};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::{header::Header, report::ReportImage};

pub const REPORT_SERIES_DESCRIPTION: &str = "HippoVolume.AI";

#[derive(Debug, Error)]
pub enum SecondaryCaptureError {
    #[error("Report of {width}x{height} pixels does not fit DICOM rows/columns")]
    TooLarge { width: u32, height: u32 },

    #[error("Failed to build file meta information: {0}")]
    Meta(#[from] WithMetaError),

    #[error("Failed to write DICOM file: {0}")]
    Write(#[from] WriteError),
}

/// Identifiers minted for one report instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportIdentifiers {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
}

impl ReportIdentifiers {
    pub fn generate() -> Self {
        Self {
            study_instance_uid: generate_uid(),
            series_instance_uid: generate_uid(),
            sop_instance_uid: generate_uid(),
        }
    }
}

/// A UID under the `2.25` root: a random (version 4) UUID written as one decimal integer.
pub fn generate_uid() -> String {
    uid_from_uuid(Uuid::new_v4())
}

fn uid_from_uuid(uuid: Uuid) -> String {
    format!("2.25.{}", uuid.as_u128())
}

/// Build the Secondary Capture object for `report`.
pub fn build_secondary_capture(
    report: &ReportImage,
    header: &Header,
    ids: &ReportIdentifiers,
) -> Result<FileDicomObject<InMemDicomObject>, SecondaryCaptureError> {
    let (width, height) = (report.width(), report.height());
    let (Ok(columns), Ok(rows)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(SecondaryCaptureError::TooLarge { width, height });
    };

    let mut object = InMemDicomObject::new_empty();
    let mut put = |tag: Tag, vr: VR, value: PrimitiveValue| {
        object.put(DataElement::new(tag, vr, value));
    };

    put(
        tags::SOP_CLASS_UID,
        VR::UI,
        uids::SECONDARY_CAPTURE_IMAGE_STORAGE.into(),
    );
    put(tags::SOP_INSTANCE_UID, VR::UI, ids.sop_instance_uid.as_str().into());
    put(tags::STUDY_INSTANCE_UID, VR::UI, ids.study_instance_uid.as_str().into());
    put(tags::SERIES_INSTANCE_UID, VR::UI, ids.series_instance_uid.as_str().into());

    let carried = [
        (tags::PATIENT_ID, VR::LO, &header.patient_id),
        (tags::PATIENT_NAME, VR::PN, &header.patient_name),
        (tags::STUDY_DATE, VR::DA, &header.study_date),
        (tags::STUDY_TIME, VR::TM, &header.study_time),
        (tags::SERIES_DATE, VR::DA, &header.series_date),
        (tags::SERIES_TIME, VR::TM, &header.series_time),
    ];
    for (tag, vr, value) in carried {
        if let Some(value) = value {
            put(tag, vr, value.as_str().into());
        }
    }

    put(tags::MODALITY, VR::CS, "OT".into());
    put(tags::CONVERSION_TYPE, VR::CS, "WSD".into());
    put(
        tags::SERIES_DESCRIPTION,
        VR::LO,
        REPORT_SERIES_DESCRIPTION.into(),
    );
    put(
        tags::IMAGE_TYPE,
        VR::CS,
        PrimitiveValue::Strs(
            ["DERIVED", "PRIMARY", "AXIAL"]
                .into_iter()
                .map(String::from)
                .collect(),
        ),
    );
    put(tags::INSTANCE_NUMBER, VR::IS, "1".into());
    put(tags::IMAGES_IN_ACQUISITION, VR::IS, "1".into());
    put(tags::BURNED_IN_ANNOTATION, VR::CS, "YES".into());

    put(tags::ROWS, VR::US, rows.into());
    put(tags::COLUMNS, VR::US, columns.into());
    put(
        tags::SAMPLES_PER_PIXEL,
        VR::US,
        ReportImage::SAMPLES_PER_PIXEL.into(),
    );
    put(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "RGB".into());
    // R1 G1 B1 R2 G2 B2 ...
    put(tags::PLANAR_CONFIGURATION, VR::US, 0_u16.into());
    put(tags::BITS_ALLOCATED, VR::US, ReportImage::BITS_PER_SAMPLE.into());
    put(tags::BITS_STORED, VR::US, ReportImage::BITS_PER_SAMPLE.into());
    put(tags::HIGH_BIT, VR::US, (ReportImage::BITS_PER_SAMPLE - 1).into());
    put(tags::PIXEL_REPRESENTATION, VR::US, 0_u16.into());
    put(tags::PIXEL_DATA, VR::OB, report.as_raw().to_vec().into());

    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
        .media_storage_sop_class_uid(uids::SECONDARY_CAPTURE_IMAGE_STORAGE)
        .media_storage_sop_instance_uid(ids.sop_instance_uid.as_str());
    Ok(object.with_meta(meta)?)
}

/// Write `report` as a Secondary Capture file at `path`.
pub fn write_secondary_capture(
    report: &ReportImage,
    header: &Header,
    path: impl AsRef<Path>,
) -> Result<ReportIdentifiers, SecondaryCaptureError> {
    let ids = ReportIdentifiers::generate();
    let object = build_secondary_capture(report, header, &ids)?;
    object.write_to_file(path.as_ref())?;
    info!(
        path = %path.as_ref().display(),
        series = %ids.series_instance_uid,
        "wrote report as Secondary Capture"
    );
    Ok(ids)
}
