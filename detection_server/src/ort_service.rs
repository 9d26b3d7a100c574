use crate::{
    config::{ModelConfig, Validatable},
    detection::{BoundingBox, Detection},
    labels::ClassLabels,
    model_service::{ModelError, ModelService},
};
use async_trait::async_trait;
use image::{imageops::FilterType, RgbImage};
use ndarray::{s, Array, ArrayD, ArrayViewD, Axis, Ix3, Ix4};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

#[derive(Debug, Clone, Copy)]
pub struct DetectionParams {
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl From<&ModelConfig> for DetectionParams {
    fn from(config: &ModelConfig) -> Self {
        Self {
            input_size: config.input_size,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
        }
    }
}

fn transform_image(image: &RgbImage, input_size: u32) -> Array<f32, Ix4> {
    let size = input_size as usize;
    let resized = image::imageops::resize(image, input_size, input_size, FilterType::CatmullRom);

    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Decodes a `[1, 4 + classes, anchors]` head into boxes scaled back to the source image.
fn extract_boxes(
    output: ArrayViewD<f32>,
    img_width: u32,
    img_height: u32,
    num_labels: usize,
    params: &DetectionParams,
) -> Result<Vec<BoundingBox>, ModelError> {
    let shape = output.shape().to_vec();
    let output = output
        .into_dimensionality::<Ix3>()
        .map_err(|_| ModelError::OutputShape(shape.clone()))?;
    if shape[0] != 1 || shape[1] <= 4 {
        return Err(ModelError::OutputShape(shape));
    }

    let num_classes = shape[1] - 4;
    if num_classes != num_labels {
        return Err(ModelError::LabelMismatch {
            model: num_classes,
            labels: num_labels,
        });
    }

    let width = img_width as f32;
    let height = img_height as f32;
    let scale_x = width / params.input_size as f32;
    let scale_y = height / params.input_size as f32;

    let output = output.index_axis(Axis(0), 0);
    let mut boxes = Vec::new();

    for anchor in output.axis_iter(Axis(1)) {
        let (class_id, confidence) = anchor
            .slice(s![4..])
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, candidate| {
                if candidate.1 > best.1 {
                    candidate
                } else {
                    best
                }
            });

        if confidence < params.confidence_threshold {
            continue;
        }

        let xc = anchor[0] * scale_x;
        let yc = anchor[1] * scale_y;
        let w = anchor[2] * scale_x;
        let h = anchor[3] * scale_y;

        let bbox = BoundingBox {
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
            class_id,
            confidence: confidence.clamp(0., 1.),
        };
        boxes.push(bbox.clip(width, height));
    }

    Ok(boxes)
}

/// Greedy per-class suppression, highest confidence first.
fn non_max_suppression(
    mut boxes: Vec<BoundingBox>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<BoundingBox> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }

    kept
}

fn label_boxes(
    boxes: Vec<BoundingBox>,
    labels: &ClassLabels,
) -> Result<Vec<Detection>, ModelError> {
    boxes
        .into_iter()
        .map(|bbox| {
            labels
                .get(bbox.class_id)
                .map(|name| Detection::new(bbox, name))
                .ok_or(ModelError::LabelMismatch {
                    model: bbox.class_id + 1,
                    labels: labels.len(),
                })
        })
        .collect()
}

fn load_error(e: impl std::fmt::Display) -> ModelError {
    ModelError::Load(e.to_string())
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    labels: Arc<ClassLabels>,
    params: DetectionParams,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig, labels: ClassLabels) -> Result<Self, ModelError> {
        model_config.validate().map_err(ModelError::Load)?;

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let mut builder = Session::builder()
                    .map_err(load_error)?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .map_err(load_error)?;
                if model_config.use_cuda {
                    builder = builder
                        .with_execution_providers([CUDAExecutionProvider::default().build()])
                        .map_err(load_error)?;
                }
                let session = builder
                    .commit_from_file(model_config.get_path())
                    .map_err(load_error)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            labels: Arc::new(labels),
            params: DetectionParams::from(model_config),
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("failed to extract tensor: {}", e)))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        ArrayD::from_shape_vec(dims.clone(), data.to_vec())
            .map_err(|_| ModelError::OutputShape(dims))
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        let input = transform_image(image, self.params.input_size);
        let output = self.run_inference(&input)?;

        let boxes = extract_boxes(
            output.view(),
            image.width(),
            image.height(),
            self.labels.len(),
            &self.params,
        )?;
        let boxes = non_max_suppression(
            boxes,
            self.params.iou_threshold,
            self.params.max_detections,
        );

        label_boxes(boxes, &self.labels)
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(&self, image: RgbImage) -> Result<Vec<Detection>, ModelError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.detect(&image))
            .await
            .map_err(|e| ModelError::Join(e.to_string()))?
    }
}
