//! Object detection model behind `tract-onnx`.
//!
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use common::protocol::{Detection, ImageFrame};
use image::RgbImage;
use ndarray::s;
use smallvec::SmallVec;
use tract_onnx::prelude::*;

use crate::utils::download_file;

type OnnxModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type OnnxOutput = SmallVec<[Arc<Tensor>; 4]>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

const INPUT_WIDTH: u32 = 300;
const INPUT_HEIGHT: u32 = 300;

const MODEL_FILENAME: &str = "ssd_mobilenet_v1_10.onnx";
const MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/object_detection_segmentation/ssd-mobilenetv1/model/ssd_mobilenet_v1_10.onnx";

/// An object detector over raw RGBA frames.
pub trait InferModel {
    fn run(&self, image_data: &ImageFrame) -> Result<Vec<Detection>>;
}

/// SSD MobileNet v1 trained on COCO.
pub struct SsdMobilenet {
    model: OnnxModel,
    min_confidence: f32,
    max_iou: f32,
}

impl SsdMobilenet {
    /// Load the model, downloading it to the cache directory if needed.
    pub async fn load(
        model_path: Option<PathBuf>,
        min_confidence: f32,
        max_iou: f32,
    ) -> Result<Self> {
        let path = match model_path {
            Some(path) => path,
            None => cached_model_path().await?,
        };

        let input_fact = InferenceFact::dt_shape(
            u8::datum_type(),
            tvec!(1, INPUT_HEIGHT as usize, INPUT_WIDTH as usize, 3),
        );
        let model = tract_onnx::onnx()
            .model_for_path(&path)?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        log::info!("Loaded detection model from {}", path.display());
        Ok(Self {
            model,
            min_confidence,
            max_iou,
        })
    }

    fn preproc(&self, image_data: &ImageFrame) -> Result<Tensor> {
        let rgb = rgba_to_rgb(image_data)?;
        let resized = image::imageops::resize(
            &rgb,
            INPUT_WIDTH,
            INPUT_HEIGHT,
            image::imageops::FilterType::Triangle,
        );

        let tensor: Tensor = tract_ndarray::Array4::from_shape_fn(
            (1, INPUT_HEIGHT as usize, INPUT_WIDTH as usize, 3),
            |(_, y, x, c)| resized[(x as u32, y as u32)][c],
        )
        .into();

        Ok(tensor)
    }

    /// Map raw model output to detections in source-image pixel space.
    ///
    /// The model emits normalized corner boxes `[y0, x0, y1, x1]` with one
    /// score and class id per box.
    fn postproc(&self, raw: OnnxOutput, frame_width: f32, frame_height: f32) -> Result<Vec<Detection>> {
        let boxes = raw[0].to_array_view::<f32>()?;
        let classes = raw[1].to_array_view::<f32>()?;
        let scores = raw[2].to_array_view::<f32>()?;

        let mut candidates: Vec<(f32, [f32; 4], usize)> = Vec::new();
        for (i, score) in scores.slice(s![0, ..]).iter().enumerate() {
            if *score < self.min_confidence {
                continue;
            }
            let b = boxes.slice(s![0usize, i, ..]);
            let corners = [
                b[1] * frame_width,
                b[0] * frame_height,
                b[3] * frame_width,
                b[2] * frame_height,
            ];
            candidates.push((*score, corners, classes[[0, i]] as usize));
        }

        candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        let selected = non_maximum_suppression(candidates, self.max_iou);

        Ok(selected
            .into_iter()
            .map(|(score, corners, class_id)| Detection {
                class: class_label(class_id).to_owned(),
                score,
                bbox: [
                    corners[0],
                    corners[1],
                    corners[2] - corners[0],
                    corners[3] - corners[1],
                ],
            })
            .collect())
    }
}

impl InferModel for SsdMobilenet {
    fn run(&self, image_data: &ImageFrame) -> Result<Vec<Detection>> {
        let input = self.preproc(image_data)?;
        let raw = self.model.run(tvec!(input))?;
        self.postproc(raw, image_data.width as f32, image_data.height as f32)
    }
}

/// Resolve the cached model file, downloading it on first use.
async fn cached_model_path() -> Result<PathBuf> {
    let dir = dirs::cache_dir()
        .ok_or_else(|| anyhow!("no cache directory available"))?
        .join("roadwatch");
    std::fs::create_dir_all(&dir)?;

    let path = dir.join(MODEL_FILENAME);
    if !path.exists() {
        log::info!("Downloading detection model to {}", path.display());
        let client = reqwest::Client::new();
        download_file(&client, MODEL_URL, &path).await?;
    }

    Ok(path)
}

fn rgba_to_rgb(image_data: &ImageFrame) -> Result<RgbImage> {
    let expected = image_data.width as usize * image_data.height as usize * 4;
    if image_data.data.len() != expected {
        bail!(
            "pixel buffer of {} bytes does not match {}x{} RGBA",
            image_data.data.len(),
            image_data.width,
            image_data.height
        );
    }

    let mut rgb = Vec::with_capacity(expected / 4 * 3);
    for pixel in image_data.data.chunks_exact(4) {
        rgb.extend_from_slice(&pixel[..3]);
    }

    RgbImage::from_raw(image_data.width, image_data.height, rgb)
        .ok_or_else(|| anyhow!("pixel buffer does not form an image"))
}

/// Run non-maximum-suppression on candidate bounding boxes.
///
/// Walks the ascending-sorted candidates from the most confident end and
/// keeps only those without a too-large IoU against an already selected box.
fn non_maximum_suppression(
    mut sorted_candidates: Vec<(f32, [f32; 4], usize)>,
    max_iou: f32,
) -> Vec<(f32, [f32; 4], usize)> {
    let mut selected: Vec<(f32, [f32; 4], usize)> = vec![];

    'candidates: while let Some((score, bbox, class_id)) = sorted_candidates.pop() {
        for (_, selected_bbox, _) in selected.iter() {
            if iou(&bbox, selected_bbox) > max_iou {
                continue 'candidates;
            }
        }
        selected.push((score, bbox, class_id));
    }

    selected
}

/// Intersection-over-union of two corner-format boxes `[x0, y0, x1, y1]`.
fn iou(bbox_a: &[f32; 4], bbox_b: &[f32; 4]) -> f32 {
    let overlap_box: [f32; 4] = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Area of a corner-format box; ill-defined boxes have zero area.
fn bbox_area(bbox: &[f32; 4]) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

/// COCO label for a model class id.
pub fn class_label(class_id: usize) -> &'static str {
    COCO_LABELS.get(class_id).copied().unwrap_or("unknown")
}

/// COCO class labels indexed by the 91-slot model class id.
const COCO_LABELS: [&str; 91] = [
    "unlabeled",
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "street sign",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "hat",
    "backpack",
    "umbrella",
    "shoe",
    "eye glasses",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "plate",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "mirror",
    "dining table",
    "window",
    "desk",
    "toilet",
    "door",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "blender",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];
