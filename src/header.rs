use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;
use serde::Serialize;

/// Descriptive metadata of a series, taken from one of its slices.
///
/// A header never carries pixel data; it only feeds identifiers and dates to
/// the report and its Secondary Capture wrapper.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Header {
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub study_instance_uid: Option<String>,
    pub series_instance_uid: String,
    pub sop_instance_uid: Option<String>,
    pub series_description: String,
    pub modality: Option<String>,
    pub study_date: Option<String>,
    pub study_time: Option<String>,
    pub series_date: Option<String>,
    pub series_time: Option<String>,
}

impl Header {
    pub fn from_dicom(dicom_object: &InMemDicomObject) -> Self {
        Self {
            patient_id: Self::read_string(dicom_object, tags::PATIENT_ID),
            patient_name: Self::read_string(dicom_object, tags::PATIENT_NAME),
            study_instance_uid: Self::read_string(dicom_object, tags::STUDY_INSTANCE_UID),
            series_instance_uid: Self::read_string(dicom_object, tags::SERIES_INSTANCE_UID)
                .unwrap_or_default(),
            sop_instance_uid: Self::read_string(dicom_object, tags::SOP_INSTANCE_UID),
            series_description: Self::read_string(dicom_object, tags::SERIES_DESCRIPTION)
                .unwrap_or_default(),
            modality: Self::read_string(dicom_object, tags::MODALITY),
            study_date: Self::read_string(dicom_object, tags::STUDY_DATE),
            study_time: Self::read_string(dicom_object, tags::STUDY_TIME),
            series_date: Self::read_string(dicom_object, tags::SERIES_DATE),
            series_time: Self::read_string(dicom_object, tags::SERIES_TIME),
        }
    }

    fn read_string(dicom_object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<String> {
        let value = dicom_object.element(tag).ok()?.to_str().ok()?;
        let trimmed = value.trim_end_matches(['\0', ' ']).trim_start();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}
