//! Core value types shared across the engine

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::CameraError;

/// Physical camera position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    Front,
    Back,
}

impl LensFacing {
    pub fn as_str(&self) -> &'static str {
        match self {
            LensFacing::Front => "front",
            LensFacing::Back => "back",
        }
    }

    /// Lenient parse used by host glue: anything but "front" selects the back camera.
    pub fn from_host(value: &str) -> Self {
        if value.eq_ignore_ascii_case("front") {
            LensFacing::Front
        } else {
            LensFacing::Back
        }
    }
}

impl fmt::Display for LensFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LensFacing {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "front" => Ok(LensFacing::Front),
            "back" => Ok(LensFacing::Back),
            other => Err(CameraError::InvalidArgument(format!("unknown lens: {other}"))),
        }
    }
}

/// Discrete resolution tier selected at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Sd,
    Hd,
    Fhd,
    Uhd,
    Highest,
    Lowest,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 6] = [
        QualityPreset::Sd,
        QualityPreset::Hd,
        QualityPreset::Fhd,
        QualityPreset::Uhd,
        QualityPreset::Highest,
        QualityPreset::Lowest,
    ];

    /// Landscape target size for the fixed tiers; `None` for the relative ones.
    pub fn target_resolution(&self) -> Option<Resolution> {
        match self {
            QualityPreset::Sd => Some(Resolution::new(640, 480)),
            QualityPreset::Hd => Some(Resolution::new(1280, 720)),
            QualityPreset::Fhd => Some(Resolution::new(1920, 1080)),
            QualityPreset::Uhd => Some(Resolution::new(3840, 2160)),
            QualityPreset::Highest | QualityPreset::Lowest => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityPreset::Sd => "sd",
            QualityPreset::Hd => "hd",
            QualityPreset::Fhd => "fhd",
            QualityPreset::Uhd => "uhd",
            QualityPreset::Highest => "highest",
            QualityPreset::Lowest => "lowest",
        }
    }

    /// Lenient parse used by host glue: unknown tiers fall back to FHD.
    pub fn from_host(value: &str) -> Self {
        value.parse().unwrap_or(QualityPreset::Fhd)
    }

    /// Pick the format this tier resolves to among `supported`.
    ///
    /// Fixed tiers take the largest supported format not exceeding the target,
    /// falling back to the smallest larger one.
    pub fn select(&self, supported: &[Resolution]) -> Option<Resolution> {
        let mut sorted: Vec<Resolution> = supported.to_vec();
        sorted.sort_by_key(|r| r.pixel_count());
        match self {
            QualityPreset::Highest => sorted.last().copied(),
            QualityPreset::Lowest => sorted.first().copied(),
            fixed => {
                let target = fixed.target_resolution()?;
                sorted
                    .iter()
                    .rev()
                    .find(|r| r.pixel_count() <= target.pixel_count())
                    .or_else(|| sorted.first())
                    .copied()
            }
        }
    }
}

impl Default for QualityPreset {
    fn default() -> Self {
        QualityPreset::Fhd
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityPreset {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sd" => Ok(QualityPreset::Sd),
            "hd" => Ok(QualityPreset::Hd),
            "fhd" => Ok(QualityPreset::Fhd),
            "uhd" => Ok(QualityPreset::Uhd),
            "highest" => Ok(QualityPreset::Highest),
            "lowest" => Ok(QualityPreset::Lowest),
            other => Err(CameraError::InvalidArgument(format!(
                "unknown quality preset: {other}"
            ))),
        }
    }
}

/// Flash behaviour. `Torch` is continuous light; the others apply at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMode {
    Off,
    Auto,
    On,
    Torch,
}

impl FlashMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashMode::Off => "off",
            FlashMode::Auto => "auto",
            FlashMode::On => "on",
            FlashMode::Torch => "torch",
        }
    }

    pub fn is_torch(&self) -> bool {
        matches!(self, FlashMode::Torch)
    }
}

impl Default for FlashMode {
    fn default() -> Self {
        FlashMode::Off
    }
}

impl fmt::Display for FlashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlashMode {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(FlashMode::Off),
            "auto" => Ok(FlashMode::Auto),
            "on" => Ok(FlashMode::On),
            "torch" => Ok(FlashMode::Torch),
            other => Err(CameraError::InvalidArgument(format!(
                "unknown flash mode: {other}"
            ))),
        }
    }
}

/// Point of interest in normalized view coordinates, both axes in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> Result<Self, CameraError> {
        let in_range = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_range(x) || !in_range(y) {
            return Err(CameraError::InvalidArgument(format!(
                "point ({x}, {y}) is outside the unit square"
            )));
        }
        Ok(Self { x, y })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    /// Same size with the long edge vertical.
    pub fn portrait(&self) -> Self {
        Self {
            width: self.width.min(self.height),
            height: self.width.max(self.height),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How a device reports its display aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectPolicy {
    /// The platform must pick one of the canonical ratios.
    Canonical,
    /// The exact output ratio is reported.
    Exact,
}

/// The two canonical display ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanonicalRatio {
    FourThree,
    SixteenNine,
}

impl CanonicalRatio {
    pub fn value(&self) -> f64 {
        match self {
            CanonicalRatio::FourThree => 4.0 / 3.0,
            CanonicalRatio::SixteenNine => 16.0 / 9.0,
        }
    }

    /// Ratio closest to the sensor's native shape; ties go to 16:9.
    pub fn best_fit(sensor: Resolution) -> Self {
        let native = sensor.ratio();
        if native <= 0.0 {
            return CanonicalRatio::SixteenNine;
        }
        let diff_4_3 = (native - CanonicalRatio::FourThree.value()).abs();
        let diff_16_9 = (native - CanonicalRatio::SixteenNine.value()).abs();
        if diff_4_3 < diff_16_9 {
            CanonicalRatio::FourThree
        } else {
            CanonicalRatio::SixteenNine
        }
    }
}

/// One video frame as delivered by a device: packed RGB24, already in output orientation.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub sequence: u64,
    /// Presentation time on the device clock.
    pub timestamp: Duration,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl VideoFrame {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

/// A block of interleaved f32 PCM samples.
#[derive(Debug, Clone)]
pub struct AudioSamples {
    /// Presentation time of the first sample on the device clock.
    pub timestamp: Duration,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioSamples {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / self.channels as f64;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }
}
