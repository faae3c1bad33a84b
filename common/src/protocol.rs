//! Wire types of the detection worker and the GPS data socket.
//!
use serde::{Deserialize, Serialize};

/// Commands accepted by the detection worker.
///
/// Messages are matched purely by their `type` tag, there is no correlation
/// id. Consumers may assume at most one in-flight request per type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerCommand {
    Load,
    #[serde(rename_all = "camelCase")]
    Detect { image_data: ImageFrame },
}

/// Events emitted by the detection worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerEvent {
    ModelLoaded,
    Predictions { predictions: Vec<Detection> },
}

/// Raw RGBA8 pixel buffer with dimensions, row-major.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// One model output: class label, confidence and bounding box.
///
/// The bounding box is `[x, y, width, height]` in source-image pixel
/// coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub score: f32,
    pub bbox: [f32; 4],
}

/// Messages arriving on the GPS data socket.
#[derive(Debug, Serialize, Deserialize)]
pub enum ProtoMsg {
    Fix(FixMsg),
}

/// A single geolocation sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixMsg {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: u64,
}

impl FixMsg {
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: u64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_ms,
        }
    }
}
