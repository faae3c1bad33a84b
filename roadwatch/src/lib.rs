//! Real-time object detection on a camera feed with GPS-tagged logging.
//!
pub mod alert;
pub mod controller;
pub mod data_socket;
pub mod endpoints;
pub mod gps;
pub mod logbook;
pub mod meter;
pub mod nn;
pub mod render;
pub mod sensors;
pub mod utils;
pub mod worker;

use tokio::sync::broadcast;

pub type AnnotatedSender = broadcast::Sender<Vec<u8>>;
pub type AnnotatedReceiver = broadcast::Receiver<Vec<u8>>;

/// Queue depth of the annotated-frame broadcast towards HTTP subscribers.
const BROADCAST_QUEUE_DEPTH: usize = 20;

/// Create the broadcast channel carrying annotated JPEG stream items.
pub fn broadcast_channel() -> (AnnotatedSender, AnnotatedReceiver) {
    broadcast::channel(BROADCAST_QUEUE_DEPTH)
}

/// Wrap a JPEG buffer as one item of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Vec<u8> {
    [
        "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
        data,
        "\r\n\r\n".as_bytes(),
    ]
    .concat()
}
