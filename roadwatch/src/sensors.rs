//! Camera capture and the frame dispatch loop.
//!
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use common::protocol::{ImageFrame, WorkerCommand};
use image::RgbImage;
use rscam::{Camera, Config, Frame};
use tokio::{sync::mpsc::error::TrySendError, task::JoinHandle};

use crate::{meter::FpsMeter, worker::CommandSender};

pub type CaptureFn = Box<dyn Fn() -> Option<Frame> + Send + Sync>;

/// Latest decoded camera frame, shared with the render path.
pub type LatestFrame = Arc<Mutex<Option<RgbImage>>>;

/// Get a capture function to a video device on a Linux machine.
pub fn get_capture_fn_linux(
    device_name: &str,
    format: &str,
    resolution: Option<(u32, u32)>,
    frame_rate: Option<(u32, u32)>,
) -> Result<CaptureFn> {
    let mut cam = Camera::new(device_name)?;
    log_supported_formats(&cam, format);
    let format = format.as_bytes();

    log::info!("Using camera {}", device_name);

    let resolution = resolution
        .map(Ok)
        .unwrap_or_else(|| get_max_resolution(&cam, format))?;

    let frame_rate = frame_rate
        .map(Ok)
        .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

    cam.start(&Config {
        interval: frame_rate,
        resolution,
        format,
        ..Default::default()
    })?;

    let callback = move || cam.capture().ok();
    Ok(Box::new(callback))
}

/// Spawn the frame dispatch loop on a blocking task.
///
/// Each cycle captures a frame (paced by the camera's frame interval),
/// decodes it, publishes it as the latest frame for the render path, moves
/// the pixel buffer into a `detect` command and advances the frame-rate
/// meter. The loop never waits for a prediction; when the worker is still
/// busy the frame is skipped.
pub fn spawn_capture_loop(
    capture_fn: CaptureFn,
    cmd_tx: CommandSender,
    meter: Arc<FpsMeter>,
    latest_frame: LatestFrame,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut skipped: u64 = 0;

        loop {
            let frame = match capture_fn() {
                Some(frame) => frame,
                None => {
                    log::warn!("Camera capture failed, retrying");
                    std::thread::sleep(Duration::from_millis(100));
                    continue;
                }
            };

            let rgb: RgbImage = match turbojpeg::decompress_image(&frame[..]) {
                Ok(image) => image,
                Err(err) => {
                    log::warn!("Skipping undecodable camera frame: {}", err);
                    continue;
                }
            };

            *latest_frame.lock().unwrap() = Some(rgb.clone());

            let image_data = rgb_to_rgba_frame(&rgb);
            match cmd_tx.try_send(WorkerCommand::Detect { image_data }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Inference is still outstanding, drop this frame.
                    skipped += 1;
                    log::trace!("Worker busy, skipped frame ({} so far)", skipped);
                }
                Err(TrySendError::Closed(_)) => {
                    log::info!("Worker channel closed, stopping capture");
                    break;
                }
            }

            if let Some(fps) = meter.update() {
                log::debug!("Capture rate: {} fps", fps);
            }
        }
    })
}

/// Expand an RGB image into the RGBA wire frame.
fn rgb_to_rgba_frame(rgb: &RgbImage) -> ImageFrame {
    let mut data = Vec::with_capacity((rgb.width() * rgb.height() * 4) as usize);
    for pixel in rgb.pixels() {
        data.extend_from_slice(&pixel.0);
        data.push(255);
    }

    ImageFrame {
        width: rgb.width(),
        height: rgb.height(),
        data,
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32)> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Map to iterator over ((width, height), num_pixels)
            .map(|res| (res, res.0 * res.1))
            // Get the highest resolution in terms of number of pixels
            .max_by(|a, b| a.1.cmp(&b.1))
            // Extract width and height values
            .map(|res| *res.0),
        rscam::ResolutionInfo::Stepwise {
            min: _,
            max,
            step: _,
        } => Some(max),
    }
    .ok_or_else(|| anyhow!("no resolution found"))
}

/// Get the maximum supported frame rate for the given format and resolution.
fn get_max_frame_rate(cam: &Camera, format: &[u8], resolution: (u32, u32)) -> Result<(u32, u32)> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(frame_rates) => frame_rates
            .iter()
            // Map discrete values to real frame rate
            .map(|(denominator, numerator)| ((denominator, numerator), numerator / denominator))
            // Get the highest frame rate
            .max_by(|a, b| a.1.cmp(&b.1))
            // Extract denominator and numerator
            .map(|((&d, &n), _)| (d, n)),
        rscam::IntervalInfo::Stepwise {
            min: _,
            max,
            step: _,
        } => Some(max),
    }
    .ok_or_else(|| anyhow!("no frame rate found"))
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam
        .formats()
        .map(|fmt| match fmt {
            Ok(fmt) => Some(fmt),
            Err(_) => None,
        })
        .collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn rgba_frame_gets_an_opaque_alpha_channel() {
        let mut rgb = RgbImage::new(2, 1);
        rgb.put_pixel(0, 0, image::Rgb([1, 2, 3]));
        rgb.put_pixel(1, 0, image::Rgb([4, 5, 6]));

        let frame = rgb_to_rgba_frame(&rgb);
        assert_eq!(frame.width, 2);
        assert_eq!(frame.height, 1);
        assert_eq!(frame.data, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn get_cam_info_if_available() -> Result<()> {
        let cam_name = "/dev/video0";
        let cam = Camera::new(cam_name);

        match cam {
            Err(err) => println!("Could not initialize camera (maybe none available): {err}"),
            Ok(cam) => {
                let format = b"MJPG";

                let selected_resolution = get_max_resolution(&cam, format)?;
                let frame_rates = cam.intervals(format, selected_resolution)?;
                println!("Supported frame rates: {frame_rates:?}");
            }
        }

        Ok(())
    }
}
