//! Object detection using YOLO-family ONNX models.
//!
//! A [`DetectionModel`] wraps a loaded ONNX Runtime session plus its label
//! table. Models are created by [`OnnxLoader`] (the registry's production
//! loader) and shared across sessions behind an `Arc`.
//!
//! No ort or ndarray types escape this module: inference takes a
//! [`RasterFrame`] and returns plain [`Detection`] values.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use image::DynamicImage;
use ndarray::Array;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use argus_models::Detection;

use crate::error::{VisionError, VisionResult};
use crate::frame::RasterFrame;
use crate::registry::WeightLoader;

/// COCO class names (80 classes) used as the label table for the bundled
/// YOLOv8 weights.
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
    "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
    "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
    "skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
    "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

/// Map a raw class index to a label, falling back to the stringified index
/// when the table has no entry.
pub fn label_for(labels: &[String], class_id: usize) -> String {
    labels
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| class_id.to_string())
}

/// Detector configuration shared by all loaded models.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Confidence threshold for detections
    pub confidence_threshold: f32,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Input image size (model expects square input)
    pub input_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// Inference seam used by streaming sessions, so tests can substitute a
/// fake scorer.
pub trait Infer: Send + Sync {
    /// Run detection on one frame.
    ///
    /// Zero detections is an empty list, never an error. A failure is fatal
    /// to this call only; callers degrade without tearing down their loop.
    fn infer(&self, frame: &RasterFrame) -> VisionResult<Vec<Detection>>;
}

/// A loaded detection model: ONNX session plus label table.
///
/// Immutable after load apart from the interior session lock (ort sessions
/// take `&mut self` to run).
#[derive(Debug)]
pub struct DetectionModel {
    session: Mutex<Session>,
    labels: Vec<String>,
    config: DetectorConfig,
    path: PathBuf,
}

impl DetectionModel {
    /// Artifact path this model was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The model's label table.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Preprocess a frame: resize to the square model input, normalize to
    /// [0,1], NCHW layout.
    fn preprocess(&self, img: &DynamicImage) -> VisionResult<Value> {
        let input_size = self.config.input_size;

        let resized = img.resize_exact(
            input_size,
            input_size,
            image::imageops::FilterType::Triangle,
        );

        let rgb = resized.to_rgb8();
        let (w, h) = (input_size as usize, input_size as usize);

        // HWC -> CHW with normalization to [0, 1]
        let mut chw_data: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let pixel = rgb.get_pixel(x as u32, y as u32);
                    chw_data.push(pixel[c] as f32 / 255.0);
                }
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| VisionError::detection(format!("Failed to create input tensor: {}", e)))
    }

    /// Run the session and return the flattened output tensor.
    fn run_session(&self, input: Value) -> VisionResult<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| VisionError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| VisionError::detection(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get("output0")
            .ok_or_else(|| VisionError::detection("Missing output0 tensor"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::detection(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }
}

impl Infer for DetectionModel {
    fn infer(&self, frame: &RasterFrame) -> VisionResult<Vec<Detection>> {
        let img = frame.to_dynamic()?;
        let input = self.preprocess(&img)?;
        let raw = self.run_session(input)?;

        let detections = postprocess(
            &raw,
            &self.labels,
            &self.config,
            frame.width,
            frame.height,
        )?;

        debug!(count = detections.len(), "Detection completed");
        Ok(detections)
    }
}

/// One detection candidate in pixel corner coordinates, before NMS.
#[derive(Debug, Clone)]
struct Candidate {
    class_id: usize,
    confidence: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

/// Postprocess a YOLOv8 output tensor.
///
/// The raw output is `[1, 4 + num_classes, num_boxes]`: center-format boxes
/// in model-input coordinates followed by per-class scores. Candidates above
/// the confidence threshold are scaled back to source-frame pixels, clamped,
/// and filtered with class-wise NMS. Output ordering is confidence-descending
/// and stable for identical input.
fn postprocess(
    raw: &[f32],
    labels: &[String],
    config: &DetectorConfig,
    orig_width: u32,
    orig_height: u32,
) -> VisionResult<Vec<Detection>> {
    let num_classes = labels.len().max(1);
    let num_features = 4 + num_classes;

    if raw.is_empty() || raw.len() % num_features != 0 {
        return Err(VisionError::detection(format!(
            "Unexpected output size {} for {} features",
            raw.len(),
            num_features
        )));
    }
    let num_boxes = raw.len() / num_features;

    // Output is [features, boxes]; transpose to iterate per box.
    let output = Array::from_shape_vec((num_features, num_boxes), raw.to_vec())
        .map_err(|e| VisionError::detection(format!("Failed to reshape output: {}", e)))?;
    let boxes = output.t();

    let input_size = config.input_size as f32;
    let scale_w = orig_width as f32 / input_size;
    let scale_h = orig_height as f32 / input_size;
    let max_x = (orig_width as f32 - 1.0).max(1.0);
    let max_y = (orig_height as f32 - 1.0).max(1.0);

    let mut candidates: Vec<Candidate> = Vec::new();

    for i in 0..num_boxes {
        let cx = boxes[[i, 0]];
        let cy = boxes[[i, 1]];
        let w = boxes[[i, 2]];
        let h = boxes[[i, 3]];

        let mut best_class = 0;
        let mut best_score = 0.0f32;
        for c in 0..num_classes {
            let score = boxes[[i, 4 + c]];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < config.confidence_threshold {
            continue;
        }

        // Center format -> corner format, scaled to source pixels.
        let x1 = ((cx - w / 2.0) * scale_w).clamp(0.0, max_x);
        let y1 = ((cy - h / 2.0) * scale_h).clamp(0.0, max_y);
        let x2 = ((cx + w / 2.0) * scale_w).clamp(0.0, orig_width as f32);
        let y2 = ((cy + h / 2.0) * scale_h).clamp(0.0, orig_height as f32);

        // Clamping can collapse boxes that sat outside the frame.
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        candidates.push(Candidate {
            class_id: best_class,
            confidence: best_score,
            x1,
            y1,
            x2,
            y2,
        });
    }

    let kept = non_maximum_suppression(candidates, config.nms_threshold);

    Ok(kept
        .into_iter()
        .map(|c| {
            Detection::new(
                label_for(labels, c.class_id),
                c.confidence,
                [c.x1, c.y1, c.x2, c.y2],
            )
        })
        .collect())
}

/// Class-wise non-maximum suppression, highest confidence first.
fn non_maximum_suppression(mut candidates: Vec<Candidate>, nms_threshold: f32) -> Vec<Candidate> {
    if candidates.is_empty() {
        return candidates;
    }

    // Stable sort keeps ordering deterministic for equal confidences.
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(candidates[i].clone());

        for j in (i + 1)..candidates.len() {
            if suppressed[j] || candidates[i].class_id != candidates[j].class_id {
                continue;
            }
            if iou(&candidates[i], &candidates[j]) > nms_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection over union for corner-format boxes.
fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Production weight loader: builds an ONNX Runtime session from an `.onnx`
/// artifact.
pub struct OnnxLoader {
    config: DetectorConfig,
}

impl OnnxLoader {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl Default for OnnxLoader {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[async_trait]
impl WeightLoader for OnnxLoader {
    type Model = DetectionModel;

    async fn load(&self, path: &Path) -> VisionResult<DetectionModel> {
        if !path.exists() {
            return Err(VisionError::ModelNotFound(path.to_path_buf()));
        }
        if path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| !e.eq_ignore_ascii_case("onnx"))
            .unwrap_or(true)
        {
            return Err(VisionError::model_load(format!(
                "{}: only .onnx artifacts are loadable by the runtime",
                path.display()
            )));
        }

        let session = create_session(path)?;
        info!(
            path = %path.display(),
            input_size = self.config.input_size,
            "Detection model initialized"
        );

        Ok(DetectionModel {
            session: Mutex::new(session),
            labels: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
            config: self.config.clone(),
            path: path.to_path_buf(),
        })
    }
}

/// Create an ONNX Runtime session with execution provider selection.
fn create_session(model_path: &Path) -> VisionResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| VisionError::model_load(format!("Failed to read model file: {}", e)))?;

    let mut builder = Session::builder()
        .map_err(|e| VisionError::model_load(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| VisionError::model_load(format!("Failed to set optimization level: {}", e)))?;

    // Try CUDA on Linux with cuda feature
    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, falling back to CPU");
    }

    info!("Using CPU execution provider for detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| VisionError::model_load(format!("Failed to load ONNX model: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn config(input_size: u32) -> DetectorConfig {
        DetectorConfig {
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            input_size,
        }
    }

    /// Build a flattened `[4 + classes, boxes]` tensor from per-box rows of
    /// `(cx, cy, w, h, scores...)`.
    fn tensor(rows: &[Vec<f32>]) -> Vec<f32> {
        let num_boxes = rows.len();
        let num_features = rows[0].len();
        let mut out = vec![0.0; num_boxes * num_features];
        for (b, row) in rows.iter().enumerate() {
            for (f, v) in row.iter().enumerate() {
                out[f * num_boxes + b] = *v;
            }
        }
        out
    }

    #[test]
    fn test_postprocess_scales_to_pixel_corners() {
        // One box centered at (320, 320) sized 100x80 in a 640 input,
        // class 1 at 0.9.
        let raw = tensor(&[vec![320.0, 320.0, 100.0, 80.0, 0.1, 0.9]]);
        let labels = labels(&["cat", "dog"]);

        let dets = postprocess(&raw, &labels, &config(640), 1280, 640).unwrap();

        assert_eq!(dets.len(), 1);
        let det = &dets[0];
        assert_eq!(det.label, "dog");
        assert!((det.confidence - 0.9).abs() < 1e-6);
        // scale_w = 2.0, scale_h = 1.0
        assert!((det.bbox[0] - 540.0).abs() < 1e-3);
        assert!((det.bbox[1] - 280.0).abs() < 1e-3);
        assert!((det.bbox[2] - 740.0).abs() < 1e-3);
        assert!((det.bbox[3] - 360.0).abs() < 1e-3);
        assert!(det.is_well_formed());
    }

    #[test]
    fn test_postprocess_below_threshold_is_empty_not_error() {
        let raw = tensor(&[vec![320.0, 320.0, 100.0, 80.0, 0.2, 0.1]]);
        let labels = labels(&["cat", "dog"]);

        let dets = postprocess(&raw, &labels, &config(640), 640, 640).unwrap();
        assert!(dets.is_empty());
    }

    #[test]
    fn test_postprocess_clamps_out_of_frame_boxes() {
        // Box hanging off the left edge.
        let raw = tensor(&[vec![10.0, 320.0, 100.0, 80.0, 0.9, 0.0]]);
        let labels = labels(&["cat", "dog"]);

        let dets = postprocess(&raw, &labels, &config(640), 640, 640).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox[0], 0.0);
        assert!(dets[0].is_well_formed());
    }

    #[test]
    fn test_postprocess_rejects_malformed_output() {
        let labels = labels(&["cat", "dog"]);
        // 5 values cannot be [6, n].
        let err = postprocess(&[0.0; 5], &labels, &config(640), 640, 640).unwrap_err();
        assert!(matches!(err, VisionError::Detection(_)));
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap() {
        let raw = tensor(&[
            vec![320.0, 320.0, 100.0, 100.0, 0.9, 0.0],
            // Heavy overlap, same class, lower score: suppressed.
            vec![325.0, 322.0, 100.0, 100.0, 0.8, 0.0],
            // Same spot but other class: kept.
            vec![322.0, 320.0, 100.0, 100.0, 0.0, 0.7],
        ]);
        let labels = labels(&["cat", "dog"]);

        let dets = postprocess(&raw, &labels, &config(640), 640, 640).unwrap();

        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].label, "cat");
        assert_eq!(dets[1].label, "dog");
        // Confidence-descending ordering.
        assert!(dets[0].confidence >= dets[1].confidence);
    }

    #[test]
    fn test_postprocess_is_deterministic() {
        let raw = tensor(&[
            vec![100.0, 100.0, 50.0, 50.0, 0.6, 0.0],
            vec![400.0, 400.0, 60.0, 60.0, 0.0, 0.6],
        ]);
        let labels = labels(&["cat", "dog"]);

        let a = postprocess(&raw, &labels, &config(640), 640, 640).unwrap();
        let b = postprocess(&raw, &labels, &config(640), 640, 640).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_label_fallback_is_stringified_index() {
        let table = labels(&["cat"]);
        assert_eq!(label_for(&table, 0), "cat");
        assert_eq!(label_for(&table, 7), "7");
    }

    #[test]
    fn test_coco_table() {
        assert_eq!(COCO_CLASSES.len(), 80);
        assert_eq!(COCO_CLASSES[0], "person");
        assert_eq!(COCO_CLASSES[2], "car");
    }

    #[tokio::test]
    async fn test_loader_rejects_missing_and_non_onnx() {
        let loader = OnnxLoader::default();

        let missing = loader.load(Path::new("/nope/none.onnx")).await.unwrap_err();
        assert!(matches!(missing, VisionError::ModelNotFound(_)));

        let dir = tempfile::tempdir().unwrap();
        let pt = dir.path().join("legacy.pt");
        std::fs::write(&pt, b"weights").unwrap();
        let err = loader.load(&pt).await.unwrap_err();
        assert!(matches!(err, VisionError::ModelLoad(_)));
    }
}
