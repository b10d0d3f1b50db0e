//! Cheap image signals for the specialized and heuristic adapters.
//!
//! Two signals are extracted:
//! - keywords in the upload file name
//! - saturated color regions on a downsampled decode (red for fire
//!   extinguishers, blue for oxygen tanks, yellow/orange for toolboxes)

use std::collections::BTreeMap;
use std::io::Cursor;

use image::GenericImageView;
use sscan_models::{BoundingBox, CanonicalLabel};

use crate::normalizer::mentions;

/// Share of analyzed pixels a color must cover to count as a signal.
pub const MIN_COLOR_FRACTION: f64 = 0.02;

/// Longest side of the downsampled analysis image.
const ANALYSIS_SIZE: u32 = 128;

const MIN_SATURATION: f64 = 0.39;
const MIN_VALUE: f64 = 0.39;

/// Pixels of one signal color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorRegion {
    /// Fraction of analyzed pixels in [0, 1].
    pub fraction: f64,
    /// Normalized box around every matching pixel.
    pub bounding_box: Option<BoundingBox>,
}

/// Per-class color coverage of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorSignals {
    /// Original image size in pixels.
    pub width: u32,
    pub height: u32,
    regions: BTreeMap<CanonicalLabel, ColorRegion>,
}

#[derive(Default)]
struct RegionAcc {
    count: u64,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl RegionAcc {
    fn add(&mut self, x: u32, y: u32) {
        if self.count == 0 {
            (self.min_x, self.min_y, self.max_x, self.max_y) = (x, y, x, y);
        } else {
            self.min_x = self.min_x.min(x);
            self.min_y = self.min_y.min(y);
            self.max_x = self.max_x.max(x);
            self.max_y = self.max_y.max(y);
        }
        self.count += 1;
    }
}

impl ColorSignals {
    /// Decode and analyze `bytes`. Returns `None` for undecodable data.
    ///
    /// CPU bound; call from a blocking task.
    pub fn analyze(bytes: &[u8]) -> Option<Self> {
        let img = image::load_from_memory(bytes).ok()?;
        let (width, height) = img.dimensions();
        let small = img.thumbnail(ANALYSIS_SIZE, ANALYSIS_SIZE).to_rgb8();
        let (tw, th) = small.dimensions();
        let total = f64::from(tw) * f64::from(th);
        if total == 0.0 {
            return None;
        }

        let mut acc: BTreeMap<CanonicalLabel, RegionAcc> = BTreeMap::new();
        for (x, y, pixel) in small.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            if let Some(label) = classify_pixel(r, g, b) {
                acc.entry(label).or_default().add(x, y);
            }
        }

        let regions = acc
            .into_iter()
            .map(|(label, a)| {
                let bounding_box = BoundingBox::from_pixels(
                    f64::from(a.min_x),
                    f64::from(a.min_y),
                    f64::from(a.max_x + 1),
                    f64::from(a.max_y + 1),
                    tw,
                    th,
                );
                let region = ColorRegion {
                    fraction: a.count as f64 / total,
                    bounding_box,
                };
                (label, region)
            })
            .collect();

        Some(Self { width, height, regions })
    }

    pub fn region(&self, label: CanonicalLabel) -> Option<&ColorRegion> {
        self.regions.get(&label)
    }

    /// Fraction of pixels for `label`, zero when absent.
    pub fn fraction(&self, label: CanonicalLabel) -> f64 {
        self.region(label).map_or(0.0, |r| r.fraction)
    }

    /// True when `label`'s color covers at least [`MIN_COLOR_FRACTION`].
    pub fn has_signal(&self, label: CanonicalLabel) -> bool {
        self.fraction(label) >= MIN_COLOR_FRACTION
    }

    /// Labels with a color signal, strongest first.
    pub fn present(&self) -> Vec<CanonicalLabel> {
        let mut labels: Vec<(CanonicalLabel, f64)> = self
            .regions
            .iter()
            .filter(|(_, r)| r.fraction >= MIN_COLOR_FRACTION)
            .map(|(l, r)| (*l, r.fraction))
            .collect();
        labels.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        labels.into_iter().map(|(l, _)| l).collect()
    }
}

/// HSV hue in degrees, saturation and value in [0, 1].
fn to_hsv(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let (r, g, b) = (f64::from(r) / 255.0, f64::from(g) / 255.0, f64::from(b) / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    (hue, saturation, max)
}

fn classify_pixel(r: u8, g: u8, b: u8) -> Option<CanonicalLabel> {
    let (h, s, v) = to_hsv(r, g, b);
    if s < MIN_SATURATION || v < MIN_VALUE {
        return None;
    }
    match h {
        h if !(20.0..320.0).contains(&h) => Some(CanonicalLabel::FireExtinguisher),
        h if (30.0..=80.0).contains(&h) => Some(CanonicalLabel::Toolbox),
        h if (190.0..=250.0).contains(&h) => Some(CanonicalLabel::OxygenTank),
        _ => None,
    }
}

/// Labels among `candidates` whose keywords appear in `file_name`, in
/// candidate order.
pub fn keyword_hits(file_name: &str, candidates: &[CanonicalLabel]) -> Vec<CanonicalLabel> {
    candidates
        .iter()
        .copied()
        .filter(|label| mentions(file_name, *label))
        .collect()
}

/// Pixel size of an encoded image without decoding it fully.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
