//! ONNX Runtime backend for the segmentation and detection models.
//!
//! Sessions are created per (worker identity, model kind) by the cache;
//! `Session::run` needs exclusive access, so each handle wraps its
//! session in a mutex. Model outputs follow the YOLO layout
//! `[1, rows, n]` with box center/size in rows 0..4, confidence in row 4
//! and an optional class index in row 5.

use crate::config::{InferenceDevice, ModelConfig, ModelsConfig};
use crate::detect::BoundingBox;
use crate::error::{Error, Result};
use crate::inference::{
    Detector, LoadedModel, ModelKind, ModelLoader, RawDetection, Segmenter,
};
use crate::segment::{ContainerClass, RegionProposal};
use image::{RgbImage, imageops::FilterType};
use ndarray::Array4;
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[cfg(not(feature = "cuda"))]
use tracing::warn;

/// Loads ONNX sessions from the configured model files.
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    models: ModelsConfig,
    device: InferenceDevice,
}

impl OnnxModelLoader {
    /// Create a loader over the configured model files.
    pub fn new(models: ModelsConfig, device: InferenceDevice) -> Self {
        Self { models, device }
    }

    fn model_config(&self, kind: ModelKind) -> Result<&ModelConfig> {
        let config = match kind {
            ModelKind::Segmentation => self.models.segmentation.as_ref(),
            ModelKind::Detection => self.models.detection.as_ref(),
        };
        config.ok_or_else(|| Error::ConfigValidation {
            message: format!("no {kind} model configured"),
        })
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self, kind: ModelKind) -> Result<LoadedModel> {
        let config = self.model_config(kind)?;
        let session = build_session(&config.path, self.device, kind)?;

        Ok(match kind {
            ModelKind::Segmentation => LoadedModel::Segmentation(Box::new(OnnxSegmenter {
                session: Mutex::new(session),
            })),
            ModelKind::Detection => LoadedModel::Detection(Box::new(OnnxDetector {
                session: Mutex::new(session),
                resolution: config.resolution,
            })),
        })
    }
}

/// Execution providers for the requested device, best to worst.
fn execution_providers(device: InferenceDevice) -> Vec<ExecutionProviderDispatch> {
    let mut providers = Vec::new();

    if device != InferenceDevice::Cpu {
        #[cfg(feature = "cuda")]
        {
            use ort::execution_providers::CUDAExecutionProvider;
            providers.push(CUDAExecutionProvider::default().build());
        }
        #[cfg(not(feature = "cuda"))]
        if device == InferenceDevice::Gpu {
            warn!("GPU requested but this build has no CUDA support, using CPU");
        }
    }

    providers.push(CPUExecutionProvider::default().build());
    providers
}

/// Build an ONNX session from a model file.
fn build_session(path: &Path, device: InferenceDevice, kind: ModelKind) -> Result<Session> {
    if !path.exists() {
        return Err(Error::ModelFileNotFound {
            path: path.to_path_buf(),
        });
    }
    let bytes = std::fs::read(path)?;

    let providers = execution_providers(device);
    debug!(%kind, model = %path.display(), providers = providers.len(), "Building ONNX session");

    Session::builder()
        .and_then(|builder| builder.with_execution_providers(providers))
        .and_then(|builder| builder.commit_from_memory(&bytes))
        .map_err(|e| Error::ModelLoad {
            kind,
            reason: e.to_string(),
        })
}

/// A candidate box extracted from a model output tensor.
struct Candidate {
    bbox: BoundingBox,
    confidence: f32,
    class_index: usize,
}

/// Preprocess to the model's NCHW float input.
fn preprocess(image: &RgbImage, resolution: u32) -> Array4<f32> {
    let resized = image::imageops::resize(image, resolution, resolution, FilterType::Triangle);
    let size = resolution as usize;
    Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
        f32::from(resized.get_pixel(x as u32, y as u32)[channel]) / 255.0
    })
}

/// Run one inference pass and extract candidate boxes in image
/// coordinates.
fn infer_boxes(
    session: &mut MutexGuard<'_, Session>,
    image: &RgbImage,
    resolution: u32,
    min_confidence: f32,
) -> Result<Vec<Candidate>> {
    let (width, height) = image.dimensions();
    let input = preprocess(image, resolution);

    let input_name = session.inputs[0].name.clone();
    let output_name = session.outputs[0].name.clone();

    let input_value = Value::from_array(input).map_err(|e| Error::Inference {
        reason: format!("failed to create input tensor: {e}"),
    })?;
    let outputs = session
        .run(ort::inputs![input_name.as_str() => &input_value])
        .map_err(|e| Error::Inference {
            reason: e.to_string(),
        })?;

    let view = outputs[output_name.as_str()]
        .try_extract_array::<f32>()
        .map_err(|e| Error::Inference {
            reason: format!("failed to extract output tensor: {e}"),
        })?;
    let shape = view.shape();
    if shape.len() != 3 {
        return Err(Error::Inference {
            reason: format!("expected 3D model output, got {}D", shape.len()),
        });
    }
    let rows = shape[1];
    let boxes = shape[2];
    if rows < 5 {
        return Err(Error::Inference {
            reason: format!("model output has {rows} rows, need at least 5"),
        });
    }

    // Scale model coordinates back to the source image.
    let scale_x = width as f32 / resolution as f32;
    let scale_y = height as f32 / resolution as f32;

    let mut candidates = Vec::new();
    for i in 0..boxes {
        let confidence = view[[0, 4, i]];
        if confidence < min_confidence {
            continue;
        }

        let cx = view[[0, 0, i]];
        let cy = view[[0, 1, i]];
        let w = view[[0, 2, i]];
        let h = view[[0, 3, i]];

        candidates.push(Candidate {
            bbox: BoundingBox {
                x1: (cx - w / 2.0) * scale_x,
                y1: (cy - h / 2.0) * scale_y,
                x2: (cx + w / 2.0) * scale_x,
                y2: (cy + h / 2.0) * scale_y,
            },
            confidence,
            class_index: if rows > 5 { view[[0, 5, i]] as usize } else { 0 },
        });
    }

    Ok(candidates)
}

/// ONNX-backed region-proposal model.
struct OnnxSegmenter {
    session: Mutex<Session>,
}

impl Segmenter for OnnxSegmenter {
    fn propose_regions(
        &self,
        image: &RgbImage,
        min_confidence: f32,
        resolution: u32,
    ) -> Result<Vec<RegionProposal>> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let candidates = infer_boxes(&mut session, image, resolution, min_confidence)?;

        Ok(candidates
            .into_iter()
            .map(|c| RegionProposal {
                outline: vec![
                    (c.bbox.x1, c.bbox.y1),
                    (c.bbox.x2, c.bbox.y1),
                    (c.bbox.x2, c.bbox.y2),
                    (c.bbox.x1, c.bbox.y2),
                ],
                label: ContainerClass::from_class_index(c.class_index),
                confidence: c.confidence,
            })
            .collect())
    }
}

/// ONNX-backed plant detector.
struct OnnxDetector {
    session: Mutex<Session>,
    resolution: u32,
}

impl Detector for OnnxDetector {
    fn detect_tile(&self, tile: &RgbImage, min_confidence: f32) -> Result<Vec<RawDetection>> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let candidates = infer_boxes(&mut session, tile, self.resolution, min_confidence)?;

        Ok(candidates
            .into_iter()
            .map(|c| RawDetection {
                bbox: c.bbox,
                confidence: c.confidence,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_file_is_reported() {
        let loader = OnnxModelLoader::new(
            ModelsConfig {
                segmentation: None,
                detection: Some(ModelConfig {
                    path: "/nonexistent/detector.onnx".into(),
                    resolution: 640,
                }),
            },
            InferenceDevice::Cpu,
        );

        assert!(matches!(
            loader.load(ModelKind::Detection),
            Err(Error::ModelFileNotFound { .. })
        ));
        assert!(matches!(
            loader.load(ModelKind::Segmentation),
            Err(Error::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let image = RgbImage::from_pixel(100, 60, image::Rgb([255, 128, 0]));
        let tensor = preprocess(&image, 32);
        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < f32::EPSILON);
        assert!(tensor[[0, 2, 0, 0]].abs() < f32::EPSILON);
    }
}
