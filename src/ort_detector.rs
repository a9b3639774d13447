use crate::{
    config::ModelsConfig,
    detector::{non_max_suppression, BoxPrediction, Detector, DetectorError, LoadedModel, ModelLoader, Thresholds},
    labels::{load_labels_file, parse_names_metadata, sidecar_path},
};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{s, Array, Axis, Ix4};
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::{fmt, path::Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda,
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cuda => write!(f, "cuda"),
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

fn transform_image(image: &DynamicImage, input_size: u32) -> Array<f32, Ix4> {
    let size = input_size as usize;
    let img = image.resize_exact(input_size, input_size, FilterType::CatmullRom);

    let mut input = Array::zeros((1, 3, size, size));
    for pixel in img.pixels() {
        let x = pixel.0 as _;
        let y = pixel.1 as _;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Decodes a YOLOv8/YOLO11 head of shape `[1, 4 + classes, anchors]` into
/// image-space boxes above `min_confidence`.
fn decode_output(
    outputs: &ndarray::ArrayD<f32>,
    input_size: u32,
    img_width: u32,
    img_height: u32,
    min_confidence: f32,
) -> Result<Vec<BoxPrediction>, DetectorError> {
    let shape = outputs.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
        return Err(DetectorError::Output(format!(
            "expected [1, 4 + classes, anchors], got {:?}",
            shape
        )));
    }

    let x_scale = img_width as f32 / input_size as f32;
    let y_scale = img_height as f32 / input_size as f32;

    let transposed = outputs.t();
    let output = transposed.slice(s![.., .., 0]);
    let mut boxes = Vec::new();

    for row in output.axis_iter(Axis(0)) {
        let row: Vec<_> = row.iter().copied().collect();
        let Some((class_id, prob)) = row
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
        else {
            continue;
        };

        if prob < min_confidence {
            continue;
        }

        let xc = row[0] * x_scale;
        let yc = row[1] * y_scale;
        let w = row[2] * x_scale;
        let h = row[3] * y_scale;

        boxes.push(BoxPrediction {
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
            confidence: prob,
            class_id,
        });
    }

    Ok(boxes)
}

pub struct OrtDetector {
    session: Mutex<Session>,
    output_name: String,
    input_size: u32,
}

impl OrtDetector {
    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ndarray::ArrayD<f32>, DetectorError> {
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::Runtime(format!("failed to build tensor: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectorError::Runtime(format!("inference failed: {}", e)))?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Output(format!("failed to extract tensor: {}", e)))?;

        ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| DetectorError::Output(format!("invalid tensor shape: {}", e)))
    }
}

impl Detector for OrtDetector {
    fn detect(
        &self,
        image: &DynamicImage,
        thresholds: &Thresholds,
    ) -> Result<Vec<BoxPrediction>, DetectorError> {
        let (img_width, img_height) = image.dimensions();
        let input = transform_image(image, self.input_size);
        let outputs = self.run_inference(&input)?;
        let boxes = decode_output(
            &outputs,
            self.input_size,
            img_width,
            img_height,
            thresholds.min_confidence,
        )?;

        Ok(non_max_suppression(boxes, thresholds.iou))
    }
}

fn build_session(path: &Path, prefer_gpu: bool) -> Result<(Session, Device), ort::Error> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    let cuda = CUDAExecutionProvider::default();
    if prefer_gpu && cuda.is_available().unwrap_or(false) {
        let session = builder
            .with_execution_providers([cuda.build()])?
            .commit_from_file(path)?;
        return Ok((session, Device::Cuda));
    }

    Ok((builder.commit_from_file(path)?, Device::Cpu))
}

/// Loads ONNX exports from disk, preferring an accelerator when one is present.
pub struct OrtModelLoader {
    input_size: u32,
    prefer_gpu: bool,
}

impl OrtModelLoader {
    pub fn new(models_config: &ModelsConfig) -> Self {
        Self {
            input_size: models_config.input_size,
            prefer_gpu: models_config.prefer_gpu,
        }
    }
}

impl ModelLoader for OrtModelLoader {
    fn load(&self, path: &Path) -> Result<LoadedModel, DetectorError> {
        let (session, device) = build_session(path, self.prefer_gpu)
            .map_err(|e| DetectorError::Runtime(e.to_string()))?;
        tracing::info!(model = %path.display(), %device, "ONNX session created");

        let embedded = session
            .metadata()
            .ok()
            .and_then(|metadata| metadata.custom("names").ok().flatten())
            .and_then(|names| parse_names_metadata(&names));

        let labels = match embedded {
            Some(labels) => labels,
            None => {
                let sidecar = sidecar_path(path);
                if !sidecar.exists() {
                    return Err(DetectorError::MissingLabels(path.display().to_string()));
                }
                load_labels_file(&sidecar)?
            }
        };
        if labels.is_empty() {
            return Err(DetectorError::MissingLabels(path.display().to_string()));
        }

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| DetectorError::Output("model declares no outputs".to_string()))?;

        let detector = OrtDetector {
            session: Mutex::new(session),
            output_name,
            input_size: self.input_size,
        };

        Ok(LoadedModel {
            detector: Box::new(detector),
            labels,
        })
    }
}
