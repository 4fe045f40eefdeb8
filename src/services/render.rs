use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

use crate::models::detection::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([255, 56, 56]);
const BOX_THICKNESS: i64 = 2;

/// Draw bounding boxes for the given detections onto the source image and
/// return the result as PNG bytes. Box edges falling outside the image are
/// clipped to the image bounds; a box entirely outside is skipped.
pub fn annotate(image_bytes: &[u8], labels: &[Detection]) -> Result<Vec<u8>, RenderError> {
    let mut canvas = image::load_from_memory(image_bytes)?.to_rgb8();
    for det in labels {
        draw_box(&mut canvas, det);
    }
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(canvas).write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

fn draw_box(canvas: &mut RgbImage, det: &Detection) {
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let last_x = (w - 1) as i64;
    let last_y = (h - 1) as i64;
    let x0 = ((det.cx - det.width / 2.0) * w as f64).round() as i64;
    let x1 = ((det.cx + det.width / 2.0) * w as f64).round() as i64;
    let y0 = ((det.cy - det.height / 2.0) * h as f64).round() as i64;
    let y1 = ((det.cy + det.height / 2.0) * h as f64).round() as i64;
    if x1 < x0 || y1 < y0 || x1 < 0 || y1 < 0 || x0 > last_x || y0 > last_y {
        return;
    }

    // Loop bounds are clipped up front so a bogus box cannot make the loops
    // run beyond the image.
    let (cx0, cx1) = (x0.clamp(0, last_x), x1.clamp(0, last_x));
    let (cy0, cy1) = (y0.clamp(0, last_y), y1.clamp(0, last_y));

    for t in 0..BOX_THICKNESS {
        for row in [y0 + t, y1 - t] {
            if (0..=last_y).contains(&row) {
                for x in cx0..=cx1 {
                    canvas.put_pixel(x as u32, row as u32, BOX_COLOR);
                }
            }
        }
        for col in [x0 + t, x1 - t] {
            if (0..=last_x).contains(&col) {
                for y in cy0..=cy1 {
                    canvas.put_pixel(col as u32, y as u32, BOX_COLOR);
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("image annotation failed: {0}")]
pub struct RenderError(#[from] image::ImageError);
