//! Bounding box and label rendering.
//!
use common::protocol::Detection;
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use lazy_static::lazy_static;

/// Detections at or below this score are neither drawn nor logged.
pub const DISPLAY_THRESHOLD: f32 = 0.5;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const FILL_ALPHA: f32 = 0.2;
const LABEL_ALPHA: f32 = 0.7;
const LABEL_BAR_HEIGHT: i32 = 25;

/// Filter a prediction batch down to the displayable detections.
pub fn qualifying(predictions: &[Detection]) -> Vec<&Detection> {
    predictions
        .iter()
        .filter(|prediction| prediction.score > DISPLAY_THRESHOLD)
        .collect()
}

/// Draw the given detections onto the frame.
///
/// Each detection gets a translucent green fill, a two pixel outline and a
/// dark label bar above the box with class name and confidence.
pub fn draw_detections(frame: &mut RgbImage, detections: &[&Detection]) {
    for detection in detections {
        draw_one(frame, detection);
    }
}

fn draw_one(frame: &mut RgbImage, detection: &Detection) {
    let width = frame.width() as i32;
    let height = frame.height() as i32;

    let [bx, by, bw, bh] = detection.bbox;
    let x0 = (bx.round() as i32).clamp(0, width - 1);
    let y0 = (by.round() as i32).clamp(0, height - 1);
    let x1 = ((bx + bw).round() as i32).clamp(x0 + 1, width);
    let y1 = ((by + bh).round() as i32).clamp(y0 + 1, height);

    blend_rect(frame, x0, y0, x1, y1, BOX_COLOR, FILL_ALPHA);

    let rect = Rect::at(x0, y0).of_size((x1 - x0) as u32, (y1 - y0) as u32);
    draw_hollow_rect_mut(frame, rect, BOX_COLOR);
    if x1 - x0 > 2 && y1 - y0 > 2 {
        let inner = Rect::at(x0 + 1, y0 + 1).of_size((x1 - x0 - 2) as u32, (y1 - y0 - 2) as u32);
        draw_hollow_rect_mut(frame, inner, BOX_COLOR);
    }

    let label = format!("{} {:.0}%", detection.class, detection.score * 100.0);
    let bar_width = detection.class.len() as i32 * 10 + 40;
    let bar_y0 = (y0 - LABEL_BAR_HEIGHT).max(0);
    let bar_x1 = (x0 + bar_width).min(width);
    blend_rect(frame, x0, bar_y0, bar_x1, y0, LABEL_BACKGROUND, LABEL_ALPHA);

    if let Some(font) = LABEL_FONT.as_ref() {
        draw_text_mut(
            frame,
            BOX_COLOR,
            x0 + 5,
            bar_y0 + 4,
            rusttype::Scale { x: 16.0, y: 16.0 },
            font,
            &label,
        );
    }
}

/// Alpha-blend a solid color over a pixel rectangle.
fn blend_rect(frame: &mut RgbImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb<u8>, alpha: f32) {
    for y in y0.max(0)..y1.min(frame.height() as i32) {
        for x in x0.max(0)..x1.min(frame.width() as i32) {
            let pixel = frame.get_pixel_mut(x as u32, y as u32);
            for c in 0..3 {
                let blended = pixel[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha;
                pixel[c] = blended.round() as u8;
            }
        }
    }
}

lazy_static! {
    static ref LABEL_FONT: Option<rusttype::Font<'static>> = load_label_font();
}

/// Load the label font from the system, falling back to text-less boxes.
fn load_label_font() -> Option<rusttype::Font<'static>> {
    let path = std::env::var("ROADWATCH_FONT")
        .unwrap_or_else(|_| "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf".to_owned());

    match std::fs::read(&path) {
        Ok(bytes) => rusttype::Font::try_from_vec(bytes),
        Err(err) => {
            log::warn!("label font {} unavailable, drawing boxes without text: {}", path, err);
            None
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;

    fn detection(score: f32) -> Detection {
        Detection {
            class: "person".into(),
            score,
            bbox: [20.0, 30.0, 40.0, 40.0],
        }
    }

    #[test]
    fn threshold_is_exclusive() {
        let predictions = vec![detection(0.49), detection(0.5), detection(0.51)];
        let displayable = qualifying(&predictions);

        assert_eq!(displayable.len(), 1);
        assert_eq!(displayable[0].score, 0.51);
    }

    #[test]
    fn fill_blends_into_the_frame() {
        let mut frame = RgbImage::from_pixel(100, 100, Rgb([10, 10, 10]));
        let det = detection(0.9);
        draw_detections(&mut frame, &[&det]);

        // Box interior picked up the translucent green fill.
        let inside = frame.get_pixel(40, 50);
        assert!(inside[1] > 10, "green channel was {}", inside[1]);

        // Pixels left of box and label bar stay untouched.
        assert_eq!(*frame.get_pixel(5, 5), Rgb([10, 10, 10]));
    }

    #[test]
    fn boxes_partially_outside_the_frame_are_clamped() {
        let mut frame = RgbImage::new(100, 100);
        let det = Detection {
            class: "truck".into(),
            score: 0.8,
            bbox: [90.0, -10.0, 50.0, 50.0],
        };

        // Must not panic on out-of-bounds coordinates.
        draw_detections(&mut frame, &[&det]);
    }
}
