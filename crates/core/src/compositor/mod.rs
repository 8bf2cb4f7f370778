//! Renders one object's views into a single fixed-layout review frame.
//!
//! Each view resolves to exactly one cell image. Data problems never escape:
//! degenerate pixels, missing reference files and undecodable files all turn
//! into placeholders, and only an out-of-catalogue index is an error.

mod caption;
mod reference;
pub mod stretch;

use std::{collections::HashMap, path::Path, sync::Arc};

use image::{
    imageops::{self, FilterType},
    DynamicImage, Rgb, RgbImage,
};
use ndarray::{ArrayD, Ix2, Ix3};

use crate::{
    config::{DisplayConfig, SourcesConfig},
    dataset::CutoutSource,
    AnnotateError, Result,
};

pub use reference::{reference_id, ReferenceIndex};
pub use stretch::SingleBand;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const NOT_FOUND_FILL: Rgb<u8> = Rgb([220, 220, 220]);
const ERROR_FILL: Rgb<u8> = Rgb([200, 200, 200]);
const ALARM_FILL: Rgb<u8> = Rgb([255, 0, 0]);
const CAPTION: Rgb<u8> = Rgb([90, 90, 90]);

/// Fixed 2×3 grid of square cells with uniform spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    cell_size: u32,
    spacing: u32,
}

impl GridLayout {
    pub const ROWS: usize = 2;
    pub const COLS: usize = 3;
    pub const MIN_CELL_SIZE: u32 = 50;
    pub const MARGIN: u32 = 20;
    pub const MAX_CELL_SIZE: u32 = 4096;
    pub const MAX_SPACING: u32 = 1024;

    /// Sizes are clamped to `1..=MAX_CELL_SIZE` and `..=MAX_SPACING`, which
    /// keeps every canvas dimension well inside `u32`.
    pub fn new(cell_size: u32, spacing: u32) -> Self {
        Self {
            cell_size: cell_size.clamp(1, Self::MAX_CELL_SIZE),
            spacing: spacing.min(Self::MAX_SPACING),
        }
    }

    pub const fn slots() -> usize {
        Self::ROWS * Self::COLS
    }

    /// Largest square cells that fit a `width` × `height` canvas after a
    /// margin on every side, never below [`Self::MIN_CELL_SIZE`].
    pub fn fit(width: u32, height: u32, spacing: u32) -> Self {
        let spacing = spacing.min(Self::MAX_SPACING);
        let cols = Self::COLS as u32;
        let rows = Self::ROWS as u32;
        let area_width = width
            .saturating_sub(2 * Self::MARGIN)
            .saturating_sub(spacing * (cols - 1));
        let area_height = height
            .saturating_sub(2 * Self::MARGIN)
            .saturating_sub(spacing * (rows - 1));
        let cell_size = (area_width / cols)
            .min(area_height / rows)
            .max(Self::MIN_CELL_SIZE);
        Self::new(cell_size, spacing)
    }

    pub fn cell_size(&self) -> u32 {
        self.cell_size
    }

    pub fn spacing(&self) -> u32 {
        self.spacing
    }

    pub fn width(&self) -> u32 {
        let cols = Self::COLS as u32;
        self.cell_size * cols + self.spacing * (cols - 1)
    }

    pub fn height(&self) -> u32 {
        let rows = Self::ROWS as u32;
        self.cell_size * rows + self.spacing * (rows - 1)
    }

    /// `(row, col)` of grid slot `slot`, filled row by row.
    pub fn position(slot: usize) -> (usize, usize) {
        (slot / Self::COLS, slot % Self::COLS)
    }

    /// Top-left pixel of grid slot `slot`.
    pub fn origin(&self, slot: usize) -> (u32, u32) {
        let (row, col) = Self::position(slot);
        let step = self.cell_size + self.spacing;
        (col as u32 * step, row as u32 * step)
    }
}

/// How a cell's image was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStatus {
    Rendered,
    /// Single-band data that could not be stretched; flat mid-gray.
    Degenerate,
    /// No reference file for this object.
    NotFound,
    /// Data existed but could not be read or had an unusable shape.
    ErrorLoading,
    /// The view has no data source at all. Configuration defect.
    Unconfigured,
}

impl CellStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Rendered => "rendered",
            Self::Degenerate => "degenerate",
            Self::NotFound => "not found",
            Self::ErrorLoading => "error loading",
            Self::Unconfigured => "no source",
        }
    }

    pub fn is_placeholder(self) -> bool {
        self != Self::Rendered
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellReport {
    pub view: String,
    pub row: usize,
    pub col: usize,
    pub status: CellStatus,
}

/// One rendered review frame.
#[derive(Debug, Clone)]
pub struct CompositeFrame {
    pub object_index: usize,
    pub object_id: String,
    pub image: RgbImage,
    pub cells: Vec<CellReport>,
}

impl CompositeFrame {
    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.image
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(AnnotateError::from)
    }

    pub fn cell(&self, view: &str) -> Option<&CellReport> {
        self.cells.iter().find(|cell| cell.view == view)
    }
}

/// Turns per-object array data and reference files into grid frames.
pub struct ImageCompositor {
    layout: GridLayout,
    views: Vec<String>,
    dataset: Arc<dyn CutoutSource>,
    references: HashMap<String, ReferenceIndex>,
}

impl ImageCompositor {
    /// Fails if `views` has more entries than the grid has cells.
    pub fn new(
        layout: GridLayout,
        views: Vec<String>,
        dataset: Arc<dyn CutoutSource>,
    ) -> Result<Self> {
        if views.len() > GridLayout::slots() {
            return Err(AnnotateError::InvalidConfig(format!(
                "{} views configured but the grid only has {} cells",
                views.len(),
                GridLayout::slots()
            )));
        }
        Ok(Self {
            layout,
            views,
            dataset,
            references: HashMap::new(),
        })
    }

    /// Builds the configured grid and indexes each reference directory once.
    pub fn from_config(
        display: &DisplayConfig,
        sources: &SourcesConfig,
        dataset: Arc<dyn CutoutSource>,
    ) -> Result<Self> {
        let mut compositor = Self::new(display.layout(), display.views.clone(), dataset)?;
        for (view, directory) in &sources.references {
            let index = ReferenceIndex::build(directory)?;
            compositor = compositor.with_reference(view.clone(), index);
        }
        Ok(compositor)
    }

    pub fn with_reference(mut self, view: impl Into<String>, index: ReferenceIndex) -> Self {
        self.references.insert(view.into(), index);
        self
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    pub fn views(&self) -> &[String] {
        &self.views
    }

    /// Renders every configured view of object `index` into one frame.
    pub fn render(&self, index: usize) -> Result<CompositeFrame> {
        let object_id = self
            .dataset
            .object_id(index)
            .ok_or_else(|| AnnotateError::IndexOutOfRange {
                index,
                len: self.dataset.len(),
            })?
            .to_string();

        let mut canvas = RgbImage::from_pixel(self.layout.width(), self.layout.height(), WHITE);
        let mut cells = Vec::with_capacity(self.views.len());
        let cell_size = self.layout.cell_size();

        for (slot, view) in self.views.iter().enumerate() {
            let (image, status) = self.render_view(view, index, &object_id);
            let fitted = fit_to_cell(&image, cell_size);
            let (x, y) = self.layout.origin(slot);
            let offset_x = (cell_size - fitted.width()) / 2;
            let offset_y = (cell_size - fitted.height()) / 2;
            imageops::replace(
                &mut canvas,
                &fitted,
                i64::from(x + offset_x),
                i64::from(y + offset_y),
            );

            tracing::debug!(view = view.as_str(), status = status.label(), "rendered cell");
            let (row, col) = GridLayout::position(slot);
            cells.push(CellReport {
                view: view.clone(),
                row,
                col,
                status,
            });
        }

        Ok(CompositeFrame {
            object_index: index,
            object_id,
            image: canvas,
            cells,
        })
    }

    fn render_view(&self, view: &str, index: usize, object_id: &str) -> (RgbImage, CellStatus) {
        if self.dataset.has_view(view) {
            return match self.dataset.cutout(view, index) {
                Ok(cutout) => self.render_array(view, cutout),
                Err(err) => {
                    tracing::warn!(view, index, error = %err, "cutout unavailable");
                    self.placeholder(CellStatus::ErrorLoading)
                }
            };
        }

        if let Some(references) = self.references.get(view) {
            let Some(path) = references.lookup(object_id) else {
                return self.placeholder(CellStatus::NotFound);
            };
            return match image::open(path) {
                Ok(decoded) => (decoded.to_rgb8(), CellStatus::Rendered),
                Err(err) => {
                    tracing::warn!(
                        view,
                        path = %path.display(),
                        error = %err,
                        "reference image unreadable"
                    );
                    self.placeholder(CellStatus::ErrorLoading)
                }
            };
        }

        tracing::warn!(view, "view has no data source configured");
        self.placeholder(CellStatus::Unconfigured)
    }

    fn render_array(&self, view: &str, cutout: ArrayD<f32>) -> (RgbImage, CellStatus) {
        match cutout.ndim() {
            2 => match cutout.into_dimensionality::<Ix2>() {
                Ok(band) => match stretch::render_single_band(band.view()) {
                    SingleBand::Degenerate(image) => {
                        (DynamicImage::ImageLuma8(image).to_rgb8(), CellStatus::Degenerate)
                    }
                    rendered => (
                        DynamicImage::ImageLuma8(rendered.into_image()).to_rgb8(),
                        CellStatus::Rendered,
                    ),
                },
                Err(_) => self.placeholder(CellStatus::ErrorLoading),
            },
            3 => {
                let rendered = cutout
                    .into_dimensionality::<Ix3>()
                    .ok()
                    .and_then(|bands| stretch::render_multi_band(bands.view()));
                match rendered {
                    Some(image) => (image, CellStatus::Rendered),
                    None => {
                        tracing::warn!(view, "multi-band cutout is not (3, height, width)");
                        self.placeholder(CellStatus::ErrorLoading)
                    }
                }
            }
            ndim => {
                tracing::warn!(view, ndim, "cutout has unsupported dimensionality");
                self.placeholder(CellStatus::ErrorLoading)
            }
        }
    }

    /// Cell-sized fill, optionally with a red marker where a caption would go.
    /// Cell-sized stand-in for a view that produced no image. Missing and
    /// unreadable data are captioned; an unconfigured view is solid alarm
    /// red.
    fn placeholder(&self, status: CellStatus) -> (RgbImage, CellStatus) {
        let size = self.layout.cell_size();
        let fill = match status {
            CellStatus::NotFound => NOT_FOUND_FILL,
            CellStatus::Unconfigured => ALARM_FILL,
            _ => ERROR_FILL,
        };
        let mut image = RgbImage::from_pixel(size, size, fill);
        if status != CellStatus::Unconfigured {
            caption::draw_caption(&mut image, status.label(), CAPTION);
        }
        (image, status)
    }
}

/// Scales `image` to fit inside a `cell_size` square, keeping aspect ratio.
fn fit_to_cell(image: &RgbImage, cell_size: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return RgbImage::new(1, 1);
    }
    let ratio = f64::min(
        f64::from(cell_size) / f64::from(width),
        f64::from(cell_size) / f64::from(height),
    );
    let new_width = ((f64::from(width) * ratio) as u32).clamp(1, cell_size);
    let new_height = ((f64::from(height) * ratio) as u32).clamp(1, cell_size);
    if (new_width, new_height) == (width, height) {
        return image.clone();
    }
    imageops::resize(image, new_width, new_height, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dataset::InMemoryDataset;

    const CELL: u32 = 40;
    const SPACING: u32 = 4;

    fn dataset() -> InMemoryDataset {
        let ids = vec!["a".to_string(), "b".to_string()];
        let native = ArrayD::from_shape_fn(IxDyn(&[2, 3, 8, 8]), |idx| {
            if idx[1] == 0 {
                1.0
            } else {
                0.0
            }
        });
        let mut r_band = ArrayD::from_elem(IxDyn(&[2, 8, 8]), f32::NAN);
        for (i, v) in r_band.iter_mut().enumerate().skip(64) {
            *v = (i % 5) as f32;
        }
        InMemoryDataset::new(ids)
            .with_view("native", native)
            .unwrap()
            .with_view("r_band_binned_2x2", r_band)
            .unwrap()
    }

    fn compositor(views: &[&str]) -> ImageCompositor {
        ImageCompositor::new(
            GridLayout::new(CELL, SPACING),
            views.iter().map(|v| v.to_string()).collect(),
            Arc::new(dataset()),
        )
        .unwrap()
    }

    /// Caption-colored pixels of grid slot `slot`, relative to its origin.
    fn caption_pixels(frame: &CompositeFrame, slot: usize) -> Vec<(u32, u32)> {
        let (x0, y0) = GridLayout::new(CELL, SPACING).origin(slot);
        let mut pixels = Vec::new();
        for y in 0..CELL {
            for x in 0..CELL {
                if *frame.image.get_pixel(x0 + x, y0 + y) == CAPTION {
                    pixels.push((x, y));
                }
            }
        }
        pixels
    }

    /// Resampling may round a channel by one level.
    fn assert_near(actual: Rgb<u8>, expected: [u8; 3]) {
        for (a, e) in actual.0.iter().zip(expected) {
            assert!(a.abs_diff(e) <= 1, "{actual:?} is not close to {expected:?}");
        }
    }

    fn statuses(frame: &CompositeFrame) -> Vec<CellStatus> {
        frame.cells.iter().map(|cell| cell.status).collect()
    }

    #[test]
    fn output_size_is_determined_by_layout() {
        let layout = GridLayout::new(CELL, SPACING);
        assert_eq!((layout.width(), layout.height()), (3 * 40 + 2 * 4, 2 * 40 + 4));
        assert_eq!(layout.origin(0), (0, 0));
        assert_eq!(layout.origin(4), (44, 44));

        let frame = compositor(&["native"]).render(0).unwrap();
        assert_eq!(frame.image.dimensions(), (layout.width(), layout.height()));
        assert_eq!(frame.object_id, "a");
    }

    #[test]
    fn fit_respects_margin_spacing_and_minimum() {
        let layout = GridLayout::fit(1000, 600, 10);
        // (1000 - 40 - 20) / 3 = 313, (600 - 40 - 10) / 2 = 275
        assert_eq!(layout.cell_size(), 275);
        assert_eq!(GridLayout::fit(100, 100, 10).cell_size(), GridLayout::MIN_CELL_SIZE);
    }

    #[test]
    fn multi_band_view_fills_its_cell() {
        let frame = compositor(&["native"]).render(0).unwrap();
        assert_eq!(statuses(&frame), vec![CellStatus::Rendered]);
        // Red band is 1.0 everywhere, the others 0.
        assert_near(*frame.image.get_pixel(CELL / 2, CELL / 2), [255, 0, 0]);
        // The spacing gutter stays white.
        assert_eq!(frame.image.get_pixel(CELL + 1, 5).0, [255, 255, 255]);
    }

    #[test]
    fn all_nan_single_band_renders_degenerate_placeholder() {
        let frame = compositor(&["native", "r_band_binned_2x2"]).render(0).unwrap();
        assert_eq!(
            statuses(&frame),
            vec![CellStatus::Rendered, CellStatus::Degenerate]
        );
        let (x, y) = GridLayout::new(CELL, SPACING).origin(1);
        assert_near(*frame.image.get_pixel(x + CELL / 2, y + CELL / 2), [128, 128, 128]);

        let frame = compositor(&["r_band_binned_2x2"]).render(1).unwrap();
        assert_eq!(statuses(&frame), vec![CellStatus::Rendered]);
    }

    #[test]
    fn reference_views_distinguish_missing_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b_ctx.jpg"), b"not a jpeg").unwrap();
        let index = ReferenceIndex::build(dir.path()).unwrap();
        let compositor = compositor(&["legacy_context", "legacy_enhanced"])
            .with_reference("legacy_context", index);

        let missing = compositor.render(0).unwrap();
        assert_eq!(
            statuses(&missing),
            vec![CellStatus::NotFound, CellStatus::Unconfigured]
        );
        let (x, y) = GridLayout::new(CELL, SPACING).origin(0);
        assert_eq!(missing.image.get_pixel(x + CELL - 2, y + CELL - 2).0, [220, 220, 220]);
        let (x, y) = GridLayout::new(CELL, SPACING).origin(1);
        assert_eq!(missing.image.get_pixel(x + CELL - 2, y + CELL - 2).0, [255, 0, 0]);

        let broken = compositor.render(1).unwrap();
        assert_eq!(broken.cell("legacy_context").unwrap().status, CellStatus::ErrorLoading);
        let (x, y) = GridLayout::new(CELL, SPACING).origin(0);
        assert_eq!(broken.image.get_pixel(x + CELL - 2, y + CELL - 2).0, [200, 200, 200]);

        // The captions themselves differ, not just the fill.
        let not_found = caption_pixels(&missing, 0);
        let error_loading = caption_pixels(&broken, 0);
        assert!(!not_found.is_empty());
        assert!(!error_loading.is_empty());
        assert_ne!(not_found, error_loading);
        assert!(caption_pixels(&missing, 1).is_empty());
    }

    #[test]
    fn rejects_more_views_than_cells() {
        let views = (0..7).map(|i| format!("view{i}")).collect();
        let result =
            ImageCompositor::new(GridLayout::new(CELL, SPACING), views, Arc::new(dataset()));
        assert!(matches!(result, Err(AnnotateError::InvalidConfig(_))));
    }

    #[test]
    fn layout_sizes_are_bounded() {
        let layout = GridLayout::new(u32::MAX, u32::MAX);
        assert_eq!(layout.cell_size(), GridLayout::MAX_CELL_SIZE);
        assert_eq!(layout.spacing(), GridLayout::MAX_SPACING);
        assert_eq!(layout.width(), 3 * 4096 + 2 * 1024);
        assert_eq!(GridLayout::fit(u32::MAX, u32::MAX, u32::MAX).cell_size(), 4096);
    }

    #[test]
    fn reference_images_are_scaled_and_centered() {
        let dir = tempfile::tempdir().unwrap();
        let wide = RgbImage::from_pixel(80, 20, Rgb([0, 0, 255]));
        wide.save(dir.path().join("a_ctx.png")).unwrap();
        let compositor = compositor(&["legacy_context"])
            .with_reference("legacy_context", ReferenceIndex::build(dir.path()).unwrap());

        let frame = compositor.render(0).unwrap();
        assert_eq!(statuses(&frame), vec![CellStatus::Rendered]);
        // 80x20 scaled to 40x10, centered vertically at rows 15..25.
        assert_eq!(frame.image.get_pixel(20, 5).0, [255, 255, 255]);
        assert_near(*frame.image.get_pixel(20, 20), [0, 0, 255]);
        assert_eq!(frame.image.get_pixel(20, 34).0, [255, 255, 255]);
    }

    #[test]
    fn from_config_indexes_reference_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b_enh.jpg"), b"").unwrap();
        let display = DisplayConfig {
            cell_size: CELL,
            spacing: SPACING,
            views: vec!["native".into(), "legacy_enhanced".into()],
            ..DisplayConfig::default()
        };
        let mut sources = SourcesConfig::default();
        sources
            .references
            .insert("legacy_enhanced".into(), dir.path().to_path_buf());

        let compositor =
            ImageCompositor::from_config(&display, &sources, Arc::new(dataset())).unwrap();
        assert_eq!(compositor.layout(), GridLayout::new(CELL, SPACING));
        let frame = compositor.render(0).unwrap();
        assert_eq!(
            statuses(&frame),
            vec![CellStatus::Rendered, CellStatus::NotFound]
        );

        sources
            .references
            .insert("legacy_context".into(), dir.path().join("missing"));
        assert!(ImageCompositor::from_config(&display, &sources, Arc::new(dataset())).is_err());
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        assert!(matches!(
            compositor(&["native"]).render(2),
            Err(AnnotateError::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn saves_frame_as_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let frame = compositor(&["native"]).render(1).unwrap();
        frame.save_png(&path).unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.width(), frame.image.width());
    }
}
