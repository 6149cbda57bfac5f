use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::models::Detection;

const PALETTE: [[u8; 3]; 11] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
    [132, 56, 255],
];

const LINE_WIDTH: u32 = 3;

pub fn class_color(class_id: u32) -> Rgb<u8> {
    Rgb(PALETTE[class_id as usize % PALETTE.len()])
}

/// Draw one rectangle per detection that carries a box
pub fn draw_detections(img: &DynamicImage, detections: &[Detection]) -> DynamicImage {
    let mut canvas = img.to_rgb8();
    let (width, height) = canvas.dimensions();

    for detection in detections {
        let Some(bbox) = detection.bbox else {
            continue;
        };
        let color = class_color(detection.class_id);

        // Nested rectangles give a thicker outline
        for inset in 0..LINE_WIDTH {
            let w = bbox.width.saturating_sub(2 * inset);
            let h = bbox.height.saturating_sub(2 * inset);
            if w == 0 || h == 0 || bbox.x >= width || bbox.y >= height {
                break;
            }
            let rect = Rect::at((bbox.x + inset) as i32, (bbox.y + inset) as i32).of_size(w, h);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }

    DynamicImage::ImageRgb8(canvas)
}
