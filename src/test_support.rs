//! In-memory stand-ins for the ONNX collaborator.

use crate::{
    config::ModelsConfig,
    detector::{BoxPrediction, Detector, DetectorError, LoadedModel, ModelLoader, Thresholds},
};
use image::{DynamicImage, ImageBuffer, Rgb};
use std::{
    io::Cursor,
    path::{Path, PathBuf},
    time::Duration,
};

/// Emits one box per frame whose `x1` is the frame width, so callers can
/// tag frames through their dimensions. The class id is the model's last.
pub struct FakeDetector {
    class_id: usize,
    delay: Duration,
    jitter: bool,
}

impl Detector for FakeDetector {
    fn detect(
        &self,
        image: &DynamicImage,
        _thresholds: &Thresholds,
    ) -> Result<Vec<BoxPrediction>, DetectorError> {
        if image.width() == 13 {
            return Err(DetectorError::Runtime("width 13 always fails".to_string()));
        }
        let delay = if self.jitter {
            Duration::from_millis((image.width() % 4) as u64 * 5)
        } else {
            self.delay
        };
        std::thread::sleep(delay);

        let x = image.width() as f32;
        Ok(vec![BoxPrediction {
            x1: x,
            y1: 0.0,
            x2: x + 10.0,
            y2: 10.0,
            confidence: 0.9,
            class_id: self.class_id,
        }])
    }
}

/// Reads comma separated labels from the model file. A file containing
/// `corrupt` fails to load.
#[derive(Default)]
pub struct FakeLoader {
    pub detect_delay: Duration,
    pub load_delay: Duration,
    pub jitter: bool,
}

impl ModelLoader for FakeLoader {
    fn load(&self, path: &Path) -> Result<LoadedModel, DetectorError> {
        std::thread::sleep(self.load_delay);
        let content = std::fs::read_to_string(path)?;
        if content.trim() == "corrupt" {
            return Err(DetectorError::Runtime("corrupt model file".to_string()));
        }

        let labels: Vec<String> = content
            .split(',')
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .collect();
        let detector = FakeDetector {
            class_id: labels.len().saturating_sub(1),
            delay: self.detect_delay,
            jitter: self.jitter,
        };

        Ok(LoadedModel {
            detector: Box::new(detector),
            labels,
        })
    }
}

pub fn models_config(dir: &Path) -> ModelsConfig {
    ModelsConfig {
        model_dir: dir.to_path_buf(),
        extension: "onnx".to_string(),
        default_model: None,
        input_size: 640,
        iou_threshold: 0.5,
        min_confidence: 0.45,
        prefer_gpu: false,
    }
}

pub fn write_model(dir: &Path, name: &str, labels: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, labels).unwrap();
    path
}

pub fn solid_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([0, 128, 255])))
}

pub fn png_frame(width: u32, height: u32) -> Vec<u8> {
    let mut image_data = Vec::new();
    solid_image(width, height)
        .write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
        .unwrap();
    image_data
}
