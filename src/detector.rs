use image::DynamicImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Error decoding image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("ONNX runtime error: {0}")]
    Runtime(String),
    #[error("Unexpected model output: {0}")]
    Output(String),
    #[error("No class labels found for {0}")]
    MissingLabels(String),
    #[error("Failed to read labels: {0}")]
    Labels(#[from] std::io::Error),
}

/// A single box as produced by the detector, in image-space corner form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxPrediction {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

impl BoxPrediction {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn intersection(&self, other: &BoxPrediction) -> f32 {
        let w = self.x2.min(other.x2) - self.x1.max(other.x1);
        let h = self.y2.min(other.y2) - self.y1.max(other.y1);
        w.max(0.0) * h.max(0.0)
    }

    pub fn iou(&self, other: &BoxPrediction) -> f32 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// A tracked detection: the box plus the track id the session's tracker
/// assigned, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub bbox: BoxPrediction,
    pub track_id: Option<u64>,
}

/// Fixed per-deployment detector thresholds.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub iou: f32,
    pub min_confidence: f32,
}

pub trait Detector: Send + Sync + 'static {
    fn detect(
        &self,
        image: &DynamicImage,
        thresholds: &Thresholds,
    ) -> Result<Vec<BoxPrediction>, DetectorError>;
}

/// Output of a successful load: the detector and the labels indexed by class id.
pub struct LoadedModel {
    pub detector: Box<dyn Detector>,
    pub labels: Vec<String>,
}

pub trait ModelLoader: Send + Sync + 'static {
    fn load(&self, path: &Path) -> Result<LoadedModel, DetectorError>;
}

pub fn decode_frame(bytes: &[u8]) -> Result<DynamicImage, DetectorError> {
    let image = image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DetectorError::Decode(image::ImageError::IoError(e)))?
        .decode()?;
    Ok(image)
}

/// Greedy class-aware non-maximum suppression.
pub fn non_max_suppression(mut boxes: Vec<BoxPrediction>, iou_threshold: f32) -> Vec<BoxPrediction> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result: Vec<BoxPrediction> = Vec::new();

    for candidate in boxes {
        let suppressed = result.iter().any(|kept| {
            kept.class_id == candidate.class_id && kept.iou(&candidate) >= iou_threshold
        });
        if !suppressed {
            result.push(candidate);
        }
    }

    result
}
