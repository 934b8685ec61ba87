use std::path::Path;

use dicom::{
    core::{DataElement, PrimitiveValue, Tag, VR},
    object::{FileMetaTableBuilder, InMemDicomObject, open_file},
};
use dicom_dictionary_std::{tags, uids};
use hippo_volume::{
    ConformTransform, Device, InferenceAgent, LabelVolume, MetricResult, NearestCentroidModel,
    ReportComposer, ReportLayout, SegmentationModel, SeriesSelector, Volume, VolumeLoader,
    build_volume, dice, model::ModelError, report::ANTERIOR, report::POSTERIOR,
    secondary_capture::write_secondary_capture, summarize,
};
use ndarray::{Array2, Array3, ArrayView2, Axis};

struct EverywhereClassOne;

impl SegmentationModel for EverywhereClassOne {
    fn num_classes(&self) -> usize {
        2
    }

    fn predict(
        &self,
        patch: ArrayView2<'_, f32>,
        _device: &Device,
    ) -> Result<Array3<f32>, ModelError> {
        let (rows, columns) = patch.dim();
        let mut confidences = Array3::zeros((2, rows, columns));
        confidences.index_axis_mut(Axis(0), 1).fill(1.0);
        Ok(confidences)
    }
}

#[test]
fn all_ones_volume_is_class_one_everywhere() {
    let volume = Volume::new(Array3::ones((10, 64, 64)));
    let agent = InferenceAgent::new(EverywhereClassOne, Device::Cpu, 64);

    let labels = agent.infer_conformant(&volume).unwrap();
    assert_eq!(labels.dim(), (10, 64, 64));
    assert!(labels.data().iter().all(|&label| label == 1));

    let truth = Array3::<u8>::ones((10, 64, 64));
    assert_eq!(dice(labels.data(), &truth), Ok(1.0));

    let summary = summarize(&labels);
    assert_eq!(summary.count(ANTERIOR), 64 * 64 * 10);
    assert_eq!(summary.count(POSTERIOR), 0);
    assert_eq!(summary.total, 64 * 64 * 10);
}

#[test]
fn serial_device_gives_the_same_labels() {
    let volume = Volume::new(Array3::from_shape_fn((4, 40, 70), |(d, r, c)| {
        (d * 3 + r + c) as u16 + 1
    }));
    let model = || NearestCentroidModel::new(vec![0.0, 0.5, 1.0]).unwrap();

    let cpu = InferenceAgent::new(model(), Device::Cpu, 64)
        .infer_unpadded(&volume)
        .unwrap();
    let cuda = InferenceAgent::new(model(), Device::Cuda(0), 64)
        .infer_unpadded(&volume)
        .unwrap();
    assert_eq!(cpu, cuda);
    assert_eq!(cpu.dim(), (4, 64, 64));
}

fn put(object: &mut InMemDicomObject, tag: Tag, vr: VR, value: PrimitiveValue) {
    object.put(DataElement::new(tag, vr, value));
}

fn decimal_strings(values: &[f32]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|v| v.to_string()).collect())
}

/// Write one uncompressed 16-bit MR slice.
fn write_slice(
    path: &Path,
    series_uid: &str,
    description: &str,
    x: f32,
    instance: i32,
    pixels: &Array2<u16>,
) {
    let (rows, columns) = pixels.dim();
    let sop_instance_uid = format!("{series_uid}.{instance}");
    let mut object = InMemDicomObject::new_empty();

    put(&mut object, tags::SOP_CLASS_UID, VR::UI, uids::MR_IMAGE_STORAGE.into());
    put(&mut object, tags::SOP_INSTANCE_UID, VR::UI, sop_instance_uid.as_str().into());
    put(&mut object, tags::PATIENT_ID, VR::LO, "HIPPO-01".into());
    put(&mut object, tags::STUDY_DATE, VR::DA, "20190901".into());
    put(&mut object, tags::MODALITY, VR::CS, "MR".into());
    put(&mut object, tags::STUDY_INSTANCE_UID, VR::UI, "1.2.826.0.1.1".into());
    put(&mut object, tags::SERIES_INSTANCE_UID, VR::UI, series_uid.into());
    put(&mut object, tags::SERIES_DESCRIPTION, VR::LO, description.into());
    put(&mut object, tags::INSTANCE_NUMBER, VR::IS, instance.to_string().as_str().into());
    put(&mut object, tags::IMAGE_POSITION_PATIENT, VR::DS, decimal_strings(&[x, 0.0, 0.0]));
    put(&mut object, tags::PIXEL_SPACING, VR::DS, decimal_strings(&[0.5, 0.5]));
    put(&mut object, tags::SLICE_THICKNESS, VR::DS, "1".into());
    put(&mut object, tags::ROWS, VR::US, (rows as u16).into());
    put(&mut object, tags::COLUMNS, VR::US, (columns as u16).into());
    put(&mut object, tags::SAMPLES_PER_PIXEL, VR::US, 1_u16.into());
    put(&mut object, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2".into());
    put(&mut object, tags::BITS_ALLOCATED, VR::US, 16_u16.into());
    put(&mut object, tags::BITS_STORED, VR::US, 16_u16.into());
    put(&mut object, tags::HIGH_BIT, VR::US, 15_u16.into());
    put(&mut object, tags::PIXEL_REPRESENTATION, VR::US, 0_u16.into());
    put(
        &mut object,
        tags::PIXEL_DATA,
        VR::OW,
        PrimitiveValue::U16(pixels.iter().copied().collect()),
    );

    object
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(uids::MR_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(sop_instance_uid),
        )
        .unwrap()
        .write_to_file(path)
        .unwrap();
}

#[test]
fn study_directory_to_secondary_capture() {
    let root = tempfile::tempdir().unwrap();
    let routing = root.path().join("routing");
    let study = routing.join("1.2.826.0.1.1");
    std::fs::create_dir_all(study.join("hippo")).unwrap();
    std::fs::create_dir_all(study.join("t1")).unwrap();

    // stored 40 rows x 48 columns; left 20 columns bright, the rest half as bright
    let pixels = Array2::from_shape_fn((40, 48), |(_, c)| if c < 20 { 1000 } else { 500 });
    for (instance, x) in [(1, 5.0), (2, 3.0), (3, 1.0), (4, 4.0), (5, 0.0), (6, 2.0)] {
        let path = study.join("hippo").join(format!("{instance}.dcm"));
        write_slice(&path, "1.2.826.0.1.1.7", "HippoCrop", x, instance, &pixels);
    }
    for instance in 1..=3 {
        let path = study.join("t1").join(format!("{instance}.dcm"));
        write_slice(&path, "1.2.826.0.1.1.2", "T1", instance as f32, instance, &pixels);
    }
    std::fs::write(study.join("notes.txt"), "not a DICOM file").unwrap();

    let study_dir = VolumeLoader::latest_study_dir(&routing).unwrap();
    assert_eq!(study_dir, study);

    let slices = VolumeLoader::load_slices_from_directory(&study_dir).unwrap();
    assert_eq!(slices.len(), 9);

    let ordered = SeriesSelector::default().select(slices).unwrap();
    let positions: Vec<f32> = ordered.iter().filter_map(|s| s.position_along(0)).collect();
    assert_eq!(positions, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

    let (volume, header) = build_volume(&ordered).unwrap();
    assert_eq!(volume.dim(), (6, 48, 40));
    assert_eq!(header.series_description, "HippoCrop");
    assert_eq!(header.patient_id.as_deref(), Some("HIPPO-01"));
    assert_eq!(volume.voxel_volume_mm3(), Some(0.25));

    let parameters = root.path().join("model.json");
    std::fs::write(&parameters, r#"{ "centroids": [0.0, 0.5, 1.0] }"#).unwrap();
    let agent =
        InferenceAgent::<NearestCentroidModel>::load(&parameters, Device::Cpu, 64).unwrap();
    let conformed = agent.infer_unpadded(&volume).unwrap();
    assert_eq!(conformed.dim(), (6, 64, 64));

    let labels = LabelVolume::new(
        ConformTransform::for_extent((48, 40), 64).restore(conformed.data()),
    );
    assert_eq!(labels.dim(), volume.dim());

    let summary = summarize(&labels).with_voxel_volume(volume.voxel_volume_mm3());
    assert_eq!(summary.count(ANTERIOR), 6 * 40 * 28);
    assert_eq!(summary.count(POSTERIOR), 6 * 40 * 20);
    assert_eq!(summary.total, 6 * 40 * 48);
    assert_eq!(summary.total_mm3(), Some(6.0 * 40.0 * 48.0 * 0.25));

    // same classes as the prediction, except the last 8 columns are background
    let reference_dir = root.path().join("reference");
    std::fs::create_dir_all(&reference_dir).unwrap();
    let reference_pixels = Array2::from_shape_fn((40, 48), |(_, c)| match c {
        0..20 => 2,
        20..40 => 1,
        _ => 0,
    });
    for (instance, x) in [(1, 2.0), (2, 0.0), (3, 5.0), (4, 1.0), (5, 4.0), (6, 3.0)] {
        let path = reference_dir.join(format!("{instance}.dcm"));
        write_slice(&path, "1.2.826.0.1.1.9", "HippoLabels", x, instance, &reference_pixels);
    }
    let expected = VolumeLoader::load_label_volume(&reference_dir, &SeriesSelector::default())
        .unwrap();
    assert_eq!(expected.dim(), labels.dim());

    let metrics = MetricResult::compute(labels.data(), expected.data()).unwrap();
    let (predicted, referenced) = (6.0 * 40.0 * 48.0, 6.0 * 40.0 * 40.0);
    assert!((metrics.dice - 2.0 * referenced / (predicted + referenced)).abs() < 1e-12);
    assert!((metrics.jaccard - referenced / predicted).abs() < 1e-12);
    assert_eq!(metrics.sensitivity, 1.0);
    assert_eq!(metrics.specificity, 0.0);
    let report = ReportComposer::new(ReportLayout::default())
        .unwrap()
        .compose_with_metrics(&summary, &header, &volume, &labels, Some(&metrics))
        .unwrap();
    assert_eq!((report.width(), report.height()), (1000, 1000));

    let output = root.path().join("out").join("report.dcm");
    std::fs::create_dir_all(output.parent().unwrap()).unwrap();
    let ids = write_secondary_capture(&report, &header, &output).unwrap();

    let written = open_file(&output).unwrap();
    let text = |tag| {
        written
            .element(tag)
            .unwrap()
            .to_str()
            .unwrap()
            .trim_end_matches(['\0', ' '])
            .to_string()
    };
    assert_eq!(text(tags::SERIES_INSTANCE_UID), ids.series_instance_uid);
    assert_eq!(text(tags::PATIENT_ID), "HIPPO-01");
    assert_eq!(text(tags::STUDY_DATE), "20190901");
    assert_eq!(text(tags::MODALITY), "OT");
    assert_eq!(written.element(tags::ROWS).unwrap().to_int::<u16>().unwrap(), 1000);
}
