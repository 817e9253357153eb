//! Wake-word detector (C3): per-model streaming classifier implementing the
//! stride/FIFO/refractory algorithm of §4.2. The tflite wrapper is grounded
//! on the teacher's `models/wakeword.rs`, generalized to a model-ID-keyed,
//! non-singleton instance (the teacher's `lazy_static!` global is not
//! reused — each detector owns its own interpreter).

pub mod pool;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tflitec::interpreter::{Interpreter, Options};
use tflitec::model::Model;
use tflitec::tensor::Shape;

use crate::features::{FeatureFrame, FEATURE_WIDTH};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("failed to load wake-word model at {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: tflitec::Error,
    },
    #[error("inference failed for model {model_id}: {source}")]
    Inference {
        model_id: String,
        #[source]
        source: tflitec::Error,
    },
    #[error("failed to read manifest at {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse manifest at {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One entry from a wake-word manifest: a model ID, its human phrase, and
/// the path to its tflite classifier.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WakeWordManifest {
    pub id: String,
    pub phrase: String,
    pub model_path: PathBuf,
    #[serde(default = "default_cutoff")]
    pub probability_cutoff: f32,
    #[serde(default = "default_sliding_window")]
    pub sliding_window_size: usize,
    #[serde(default = "default_refractory")]
    pub refractory_seconds: f64,
    #[serde(default = "default_stride")]
    pub stride_frames: usize,
}

fn default_cutoff() -> f32 {
    0.5
}
fn default_sliding_window() -> usize {
    5
}
fn default_refractory() -> f64 {
    2.0
}
fn default_stride() -> usize {
    3
}

pub fn load_manifests(dir: &Path) -> Result<Vec<WakeWordManifest>, DetectorError> {
    let mut manifests = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(manifests),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let raw = std::fs::read_to_string(&path).map_err(|source| DetectorError::Manifest {
            path: path.clone(),
            source,
        })?;
        let manifest: WakeWordManifest =
            serde_json::from_str(&raw).map_err(|source| DetectorError::ManifestParse { path, source })?;
        manifests.push(manifest);
    }
    manifests.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(manifests)
}

struct WakeWordModel {
    model: Model<'static>,
    input_len: usize,
}

impl WakeWordModel {
    fn load(path: &Path, stride_frames: usize) -> Result<Self, DetectorError> {
        let model = Model::new(path.to_string_lossy().as_ref()).map_err(|source| DetectorError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            model,
            input_len: stride_frames * FEATURE_WIDTH,
        })
    }

    fn predict(&self, model_id: &str, features: &[f32]) -> Result<f32, DetectorError> {
        let mut options = Options::default();
        options.thread_count = 1;
        let interpreter =
            Interpreter::new(&self.model, Some(options)).map_err(|source| DetectorError::Inference {
                model_id: model_id.to_string(),
                source,
            })?;
        interpreter
            .resize_input(0, Shape::new(vec![1, self.input_len]))
            .map_err(|source| DetectorError::Inference { model_id: model_id.to_string(), source })?;
        interpreter
            .allocate_tensors()
            .map_err(|source| DetectorError::Inference { model_id: model_id.to_string(), source })?;
        interpreter
            .copy(features, 0)
            .map_err(|source| DetectorError::Inference { model_id: model_id.to_string(), source })?;
        interpreter
            .invoke()
            .map_err(|source| DetectorError::Inference { model_id: model_id.to_string(), source })?;
        let output = interpreter
            .output(0)
            .map_err(|source| DetectorError::Inference { model_id: model_id.to_string(), source })?;
        let data = output.data::<f32>();
        Ok(data.first().copied().unwrap_or(0.0).clamp(0.0, 1.0))
    }
}

/// Streaming per-model detector implementing §4.2's stride/FIFO/refractory
/// algorithm. `feed` returns `true` exactly once per detection.
pub struct WakeWordDetector {
    id: String,
    model: WakeWordModel,
    stride: usize,
    cutoff: f32,
    refractory: Duration,
    accumulator: Vec<FeatureFrame>,
    probabilities: VecDeque<f32>,
    window: usize,
    ignore_until: Option<Instant>,
    faulted: bool,
}

impl WakeWordDetector {
    pub fn load(manifest: &WakeWordManifest) -> Result<Self, DetectorError> {
        let model = WakeWordModel::load(&manifest.model_path, manifest.stride_frames)?;
        Ok(Self {
            id: manifest.id.clone(),
            model,
            stride: manifest.stride_frames,
            cutoff: manifest.probability_cutoff,
            refractory: Duration::from_secs_f64(manifest.refractory_seconds),
            accumulator: Vec::new(),
            probabilities: VecDeque::new(),
            window: manifest.sliding_window_size,
            ignore_until: None,
            faulted: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn reset(&mut self) {
        self.accumulator.clear();
        self.probabilities.clear();
        self.ignore_until = None;
        self.faulted = false;
    }

    /// Feed one feature frame. Returns `Ok(true)` exactly once when a
    /// detection fires; never crashes on inference failure — marks the
    /// detector faulted and returns the error to the caller instead.
    pub fn feed(&mut self, frame: FeatureFrame) -> Result<bool, DetectorError> {
        if self.faulted {
            return Ok(false);
        }
        self.accumulator.push(frame);
        if self.accumulator.len() < self.stride {
            return Ok(false);
        }

        let mut input = Vec::with_capacity(self.stride * FEATURE_WIDTH);
        for frame in self.accumulator.drain(..) {
            input.extend_from_slice(&frame.bands);
        }

        let probability = match self.model.predict(&self.id, &input) {
            Ok(p) => p,
            Err(err) => {
                self.faulted = true;
                return Err(err);
            }
        };

        self.probabilities.push_back(probability);
        while self.probabilities.len() > self.window {
            self.probabilities.pop_front();
        }
        if self.probabilities.len() < self.window {
            return Ok(false);
        }

        let mean = self.probabilities.iter().sum::<f32>() / self.probabilities.len() as f32;
        let now = Instant::now();
        let ready = self.ignore_until.map(|until| now >= until).unwrap_or(true);
        if mean > self.cutoff && ready {
            self.ignore_until = Some(now + self.refractory);
            return Ok(true);
        }
        Ok(false)
    }
}
