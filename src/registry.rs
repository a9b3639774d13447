use crate::{
    config::ModelsConfig,
    detector::{Detector, DetectorError, ModelLoader, RawDetection, Thresholds},
    tracker::Tracker,
};
use image::DynamicImage;
use parking_lot::RwLock;
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Model {0} not found.")]
    NotFound(String),
    #[error("Failed to load model {name}: {source}")]
    LoadError {
        name: String,
        #[source]
        source: DetectorError,
    },
    #[error("No model is loaded")]
    Unloaded,
    #[error("Inference failed: {0}")]
    Inference(#[from] DetectorError),
    #[error("Failed to list models: {0}")]
    Io(#[from] std::io::Error),
}

fn is_zero(count: &usize) -> bool {
    *count == 0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelMetadata {
    pub name: String,
    #[serde(rename = "classes")]
    pub class_labels: Vec<String>,
    #[serde(rename = "count", skip_serializing_if = "is_zero")]
    pub class_count: usize,
}

impl ModelMetadata {
    pub fn new(name: &str, class_labels: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            class_count: class_labels.len(),
            class_labels,
        }
    }

    /// What the control surface reports before any model has loaded.
    pub fn unloaded() -> Self {
        Self::new("None", Vec::new())
    }
}

/// An immutable (detector, metadata) pairing. Replaced wholesale on swap.
pub struct ActiveModel {
    detector: Box<dyn Detector>,
    metadata: ModelMetadata,
    generation: u64,
}

impl ActiveModel {
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Raw tracked output together with the snapshot that produced it.
pub struct Inference {
    pub detections: Vec<RawDetection>,
    pub model: Arc<ActiveModel>,
}

pub struct ModelRegistry {
    active: RwLock<Option<Arc<ActiveModel>>>,
    // serializes swaps and holds the last generation handed out
    swap: Mutex<u64>,
    loader: Arc<dyn ModelLoader>,
    models_config: ModelsConfig,
    thresholds: Thresholds,
}

fn scan_model_dir(models_config: &ModelsConfig) -> Result<Vec<String>, RegistryError> {
    let dir = &models_config.model_dir;
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut models = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !models_config.is_model_file(&path) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            models.push(name.to_string());
        }
    }
    models.sort();

    Ok(models)
}

fn resolve_model_path(models_config: &ModelsConfig, name: &str) -> Result<PathBuf, RegistryError> {
    if name.trim().is_empty() {
        return Err(RegistryError::NotFound(name.to_string()));
    }

    let in_dir = models_config.model_dir.join(name);
    let literal = Path::new(name).to_path_buf();

    [in_dir, literal]
        .into_iter()
        .find(|path| path.is_file() && models_config.is_model_file(path))
        .ok_or_else(|| RegistryError::NotFound(name.to_string()))
}

impl ModelRegistry {
    pub fn new(models_config: ModelsConfig, loader: Arc<dyn ModelLoader>) -> Self {
        let thresholds = Thresholds {
            iou: models_config.iou_threshold,
            min_confidence: models_config.min_confidence,
        };
        Self {
            active: RwLock::new(None),
            swap: Mutex::new(0),
            loader,
            models_config,
            thresholds,
        }
    }

    pub fn snapshot(&self) -> Option<Arc<ActiveModel>> {
        self.active.read().clone()
    }

    pub fn current(&self) -> Result<ModelMetadata, RegistryError> {
        self.snapshot()
            .map(|model| model.metadata.clone())
            .ok_or(RegistryError::Unloaded)
    }

    /// Model files in the configured directory, sorted by name. A missing
    /// directory lists as empty.
    pub async fn list(&self) -> Result<Vec<String>, RegistryError> {
        let models_config = self.models_config.clone();
        tokio::task::spawn_blocking(move || scan_model_dir(&models_config))
            .await
            .map_err(std::io::Error::other)?
    }

    /// Looks in the model directory first, then falls back to `name` as a
    /// literal path.
    pub async fn resolve(&self, name: &str) -> Result<PathBuf, RegistryError> {
        let models_config = self.models_config.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || resolve_model_path(&models_config, &name))
            .await
            .map_err(std::io::Error::other)?
    }

    /// Loads `name` and publishes it as the active model. On failure the
    /// previously active model, if any, stays in place.
    pub async fn load(&self, name: &str) -> Result<ModelMetadata, RegistryError> {
        let mut generation = self.swap.lock().await;
        let path = self.resolve(name).await?;

        tracing::info!(model = name, path = %path.display(), "Loading model");
        let loader = self.loader.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&path))
            .await
            .map_err(|e| DetectorError::Runtime(format!("model loading task failed: {}", e)))
            .and_then(|result| result)
            .map_err(|source| RegistryError::LoadError {
                name: name.to_string(),
                source,
            })?;

        if loaded.labels.is_empty() {
            return Err(RegistryError::LoadError {
                name: name.to_string(),
                source: DetectorError::MissingLabels(name.to_string()),
            });
        }

        *generation += 1;
        let metadata = ModelMetadata::new(name, loaded.labels);
        let model = Arc::new(ActiveModel {
            detector: loaded.detector,
            metadata: metadata.clone(),
            generation: *generation,
        });
        *self.active.write() = Some(model);

        tracing::info!(
            model = name,
            classes = metadata.class_count,
            generation = *generation,
            "Model loaded successfully"
        );
        Ok(metadata)
    }

    /// Boot-time selection: the configured default model, else the first
    /// listed one. Failure leaves the registry unloaded.
    pub async fn initialize(&self) -> Option<ModelMetadata> {
        let candidate = match &self.models_config.default_model {
            Some(name) => Some(name.clone()),
            None => match self.list().await {
                Ok(models) => models.into_iter().next(),
                Err(e) => {
                    tracing::warn!("Failed to list models: {}", e);
                    None
                }
            },
        };

        let Some(name) = candidate else {
            tracing::warn!(
                model_dir = %self.models_config.model_dir.display(),
                "No models found. Add .{} files to the model directory",
                self.models_config.extension
            );
            return None;
        };

        match self.load(&name).await {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::error!("Failed to load default model: {}", e);
                None
            }
        }
    }

    /// Runs detection and tracking against one snapshot of the active model.
    /// A swap during the call does not affect it.
    pub fn infer(
        &self,
        image: &DynamicImage,
        tracker: &mut Tracker,
    ) -> Result<Inference, RegistryError> {
        let model = self.snapshot().ok_or(RegistryError::Unloaded)?;
        let boxes = model.detector.detect(image, &self.thresholds)?;
        let detections = tracker.update(model.generation, &boxes);

        Ok(Inference { detections, model })
    }
}
