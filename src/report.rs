//! Volume summary, representative slices and the composed report raster.

use std::path::Path;

use ab_glyph::{FontArc, InvalidFont, PxScale};
use image::{
    GrayImage, ImageError, Rgb, RgbImage,
    imageops::{self, FilterType},
};
use imageproc::drawing::draw_text_mut;
use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    enums::Orientation,
    header::Header,
    orientation::to_viewing,
    stats::{MetricResult, is_defined},
    volume::{LabelVolume, Volume},
};

pub const ANTERIOR: u8 = 1;
pub const POSTERIOR: u8 = 2;
pub const REPORTED_CLASSES: [u8; 2] = [ANTERIOR, POSTERIOR];

const TITLE: &str = "HippoVolume.AI";
const TITLE_FONT_SIZE: f32 = 40.0;
const TEXT_FONT_SIZE: f32 = 20.0;
const TEXT_TOP: i32 = 70;
const TEXT_LINE_HEIGHT: i32 = 24;
const PANEL_LEFT: i64 = 50;
const PANEL_GAP: i64 = 50;
const CAPTION_INDENT: i64 = 30;
const GRAY_CAPTION_TOP: i64 = 300;
const GRAY_PANEL_TOP: i64 = 330;
const MASK_CAPTION_TOP: i64 = 600;
const MASK_PANEL_TOP: i64 = 630;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const CLASS_COLORS: [[u8; 3]; 6] = [
    [255, 0, 0],
    [0, 255, 0],
    [0, 128, 255],
    [255, 255, 0],
    [255, 0, 255],
    [0, 255, 255],
];

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Raw volume {raw:?} and label volume {labels:?} differ in shape")]
    ShapeMismatch {
        raw: (usize, usize, usize),
        labels: (usize, usize, usize),
    },

    #[error("Failed to load report font: {0}")]
    Font(#[from] InvalidFont),

    #[error("Failed to write report image: {0}")]
    Image(#[from] ImageError),
}

/// Voxel counts of the reported classes.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LabelSummary {
    pub class_counts: Vec<(u8, usize)>,
    pub total: usize,
    /// Cubic millimetres per voxel, when the source carried spacing
    pub voxel_volume_mm3: Option<f32>,
}

impl LabelSummary {
    pub fn count(&self, class: u8) -> usize {
        self.class_counts
            .iter()
            .find(|(c, _)| *c == class)
            .map_or(0, |(_, n)| *n)
    }

    pub fn with_voxel_volume(mut self, voxel_volume_mm3: Option<f32>) -> Self {
        self.voxel_volume_mm3 = voxel_volume_mm3;
        self
    }

    pub fn total_mm3(&self) -> Option<f32> {
        self.voxel_volume_mm3.map(|v| v * self.total as f32)
    }
}

/// Anterior, posterior and total hippocampal voxel counts.
pub fn summarize(labels: &LabelVolume) -> LabelSummary {
    summarize_classes(labels, &REPORTED_CLASSES)
}

pub fn summarize_classes(labels: &LabelVolume, classes: &[u8]) -> LabelSummary {
    let class_counts: Vec<_> = classes
        .iter()
        .map(|&class| (class, labels.count_class(class)))
        .collect();
    let total = class_counts.iter().map(|(_, n)| n).sum();
    LabelSummary {
        class_counts,
        total,
        voxel_volume_mm3: None,
    }
}

/// Index along each axis whose cross-section holds the most foreground voxels.
///
/// Ties resolve to the lowest index; an all-background volume yields `(0, 0, 0)`.
pub fn select_representative_slices(labels: &LabelVolume) -> (usize, usize, usize) {
    let foreground = labels.data().mapv(|v| usize::from(v > 0));
    let best = |axis: usize| {
        let others: Vec<_> = (0..3).filter(|&a| a != axis).collect();
        // sum the higher axis first so the lower index stays valid
        let per_index = foreground
            .sum_axis(Axis(others[1]))
            .sum_axis(Axis(others[0]));
        per_index
            .iter()
            .enumerate()
            .fold((0, 0), |(best, max), (i, &n)| {
                if n > max { (i, n) } else { (best, max) }
            })
            .0
    };
    (best(0), best(1), best(2))
}

/// Fixed geometry of the report raster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportLayout {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// Largest integer zoom applied to every panel. It is lowered for a run
    /// whose cross sections would otherwise overlap the next panel row or run
    /// off the canvas; panels are never drawn smaller than 1:1.
    #[serde(default = "default_magnification")]
    pub magnification: u32,

    /// Weight of the class colour over the grayscale image, in [0, 1]
    #[serde(default = "default_overlay_alpha")]
    pub overlay_alpha: f32,

    /// Plane names shown above the panels of axes 0, 1 and 2
    #[serde(default = "default_panel_titles")]
    pub panel_titles: [Orientation; 3],
}

impl Default for ReportLayout {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            magnification: default_magnification(),
            overlay_alpha: default_overlay_alpha(),
            panel_titles: default_panel_titles(),
        }
    }
}

fn default_width() -> u32 {
    1000
}

fn default_height() -> u32 {
    1000
}

fn default_magnification() -> u32 {
    4
}

fn default_overlay_alpha() -> f32 {
    0.6
}

fn default_panel_titles() -> [Orientation; 3] {
    [Orientation::Sagittal, Orientation::Coronal, Orientation::Axial]
}

/// The finished report: an 8-bit RGB raster.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportImage {
    image: RgbImage,
}

impl ReportImage {
    pub const SAMPLES_PER_PIXEL: u16 = 3;
    pub const BITS_PER_SAMPLE: u16 = 8;

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Interleaved `R1 G1 B1 R2 G2 B2 ...` bytes
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        self.image.save(path)?;
        Ok(())
    }
}

pub struct ReportComposer {
    font: FontArc,
    layout: ReportLayout,
}

impl ReportComposer {
    pub fn new(layout: ReportLayout) -> Result<Self, ReportError> {
        let font = FontArc::try_from_slice(include_bytes!("../assets/DejaVuSans.ttf"))?;
        Ok(Self { font, layout })
    }

    pub fn layout(&self) -> &ReportLayout {
        &self.layout
    }

    pub fn compose(
        &self,
        summary: &LabelSummary,
        header: &Header,
        raw: &Volume,
        labels: &LabelVolume,
    ) -> Result<ReportImage, ReportError> {
        self.compose_with_metrics(summary, header, raw, labels, None)
    }

    /// Compose the report, adding a line of overlap scores when a reference was available.
    pub fn compose_with_metrics(
        &self,
        summary: &LabelSummary,
        header: &Header,
        raw: &Volume,
        labels: &LabelVolume,
        metrics: Option<&MetricResult>,
    ) -> Result<ReportImage, ReportError> {
        if raw.dim() != labels.dim() {
            return Err(ReportError::ShapeMismatch {
                raw: raw.dim(),
                labels: labels.dim(),
            });
        }

        let mut canvas = RgbImage::new(self.layout.width, self.layout.height);
        self.draw_text(&mut canvas, summary, header, metrics);

        let slices = select_representative_slices(labels);
        debug!(?slices, "representative slices");
        self.draw_panels(&mut canvas, raw, labels, [slices.0, slices.1, slices.2]);

        Ok(ReportImage { image: canvas })
    }

    fn draw_text(
        &self,
        canvas: &mut RgbImage,
        summary: &LabelSummary,
        header: &Header,
        metrics: Option<&MetricResult>,
    ) {
        draw_text_mut(
            canvas,
            TEXT_COLOR,
            10,
            0,
            PxScale::from(TITLE_FONT_SIZE),
            &self.font,
            TITLE,
        );

        let unknown = || "unknown".to_string();
        let mut lines = vec![
            format!(
                "Patient ID: {}",
                header.patient_id.clone().unwrap_or_else(unknown)
            ),
            format!(
                "Study date: {}",
                header.study_date.clone().unwrap_or_else(unknown)
            ),
        ];

        let mut total = format!("Total hippocampal volume: {} voxels", summary.total);
        if let Some(mm3) = summary.total_mm3() {
            total.push_str(&format!(" ({mm3:.1} mm³)"));
        }
        lines.push(total);
        for &(class, count) in &summary.class_counts {
            lines.push(format!("{} volume: {count} voxels", class_name(class)));
        }

        if let Some(metrics) = metrics {
            lines.push(format!(
                "Dice: {}   Jaccard: {}   Sensitivity: {}   Specificity: {}",
                format_score(metrics.dice),
                format_score(metrics.jaccard),
                format_score(metrics.sensitivity),
                format_score(metrics.specificity),
            ));
        }

        for (i, line) in lines.iter().enumerate() {
            draw_text_mut(
                canvas,
                TEXT_COLOR,
                10,
                TEXT_TOP + i as i32 * TEXT_LINE_HEIGHT,
                PxScale::from(TEXT_FONT_SIZE),
                &self.font,
                line,
            );
        }
    }

    fn draw_panels(
        &self,
        canvas: &mut RgbImage,
        raw: &Volume,
        labels: &LabelVolume,
        slices: [usize; 3],
    ) {
        let panels: Vec<_> = slices
            .iter()
            .enumerate()
            .filter_map(|(axis, &index)| {
                let gray = raw.cross_section_image(index, axis)?;
                let plane = to_viewing(labels.get_slice_from_axis(index, axis)?);
                Some((axis, index, gray, plane))
            })
            .collect();
        let extents: Vec<_> = panels.iter().map(|(_, _, gray, _)| gray.dimensions()).collect();
        let zoom = self.fitted_magnification(&extents);

        let mut left = PANEL_LEFT;
        for (axis, index, gray, plane) in panels {
            let title = self.layout.panel_titles[axis];
            let (width, height) = (gray.width() * zoom, gray.height() * zoom);
            let grayscale = imageops::resize(&gray_to_rgb(&gray), width, height, FilterType::Nearest);
            let overlay = imageops::resize(
                &self.overlay(&gray, plane.view()),
                width,
                height,
                FilterType::Nearest,
            );

            self.caption(canvas, left, GRAY_CAPTION_TOP, &format!("{title} slice #{index}"));
            imageops::replace(canvas, &grayscale, left, GRAY_PANEL_TOP);
            self.caption(canvas, left, MASK_CAPTION_TOP, &format!("{title} mask"));
            imageops::replace(canvas, &overlay, left, MASK_PANEL_TOP);

            left += i64::from(width) + PANEL_GAP;
        }
    }

    /// Configured magnification, lowered until the tallest panel fits its row
    /// and all panels fit side by side.
    fn fitted_magnification(&self, extents: &[(u32, u32)]) -> u32 {
        let row_room = (MASK_CAPTION_TOP - GRAY_PANEL_TOP) as u32;
        let mask_room = self.layout.height.saturating_sub(MASK_PANEL_TOP as u32);
        let gaps = PANEL_GAP as u32 * extents.len().saturating_sub(1) as u32;
        let width_room = self.layout.width.saturating_sub(PANEL_LEFT as u32 + gaps);

        let tallest = extents.iter().map(|&(_, h)| h).max().unwrap_or(0).max(1);
        let total_width = extents.iter().map(|&(w, _)| w).sum::<u32>().max(1);
        self.layout
            .magnification
            .min(row_room.min(mask_room) / tallest)
            .min(width_room / total_width)
            .max(1)
    }

    fn caption(&self, canvas: &mut RgbImage, left: i64, top: i64, text: &str) {
        draw_text_mut(
            canvas,
            TEXT_COLOR,
            (left + CAPTION_INDENT) as i32,
            top as i32,
            PxScale::from(TEXT_FONT_SIZE),
            &self.font,
            text,
        );
    }

    /// Blend class colours over the grayscale image; background stays untouched.
    fn overlay(&self, gray: &GrayImage, labels: ArrayView2<'_, u8>) -> RgbImage {
        let alpha = self.layout.overlay_alpha.clamp(0.0, 1.0);
        RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
            let value = gray.get_pixel(x, y).0[0];
            let class = labels[[y as usize, x as usize]];
            if class == 0 {
                return Rgb([value; 3]);
            }
            let color = CLASS_COLORS[(class as usize - 1) % CLASS_COLORS.len()];
            Rgb(color.map(|c| {
                (f32::from(value) * (1.0 - alpha) + f32::from(c) * alpha).round() as u8
            }))
        })
    }
}

/// Compose a report with the default layout.
pub fn compose_report(
    summary: &LabelSummary,
    header: &Header,
    raw: &Volume,
    labels: &LabelVolume,
) -> Result<ReportImage, ReportError> {
    ReportComposer::new(ReportLayout::default())?.compose(summary, header, raw, labels)
}

fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        Rgb([gray.get_pixel(x, y).0[0]; 3])
    })
}

fn class_name(class: u8) -> String {
    match class {
        ANTERIOR => "Anterior".to_string(),
        POSTERIOR => "Posterior".to_string(),
        other => format!("Class {other}"),
    }
}

fn format_score(score: f64) -> String {
    if is_defined(score) {
        format!("{score:.3}")
    } else {
        "n/a".to_string()
    }
}
