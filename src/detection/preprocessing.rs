use image::{DynamicImage, Rgb, RgbImage};
use image::imageops::FilterType;

/// Grey used by the detector for letterbox padding
pub const PAD_VALUE: u8 = 114;

/// Geometry of a letterboxed image, used to map model coordinates back
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub src_width: u32,
    pub src_height: u32,
}

impl Letterbox {
    pub fn for_size(src_width: u32, src_height: u32, target: u32) -> Self {
        let scale = (target as f32 / src_width as f32).min(target as f32 / src_height as f32);
        let scaled_w = (src_width as f32 * scale).round();
        let scaled_h = (src_height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((target as f32 - scaled_w) / 2.0).floor(),
            pad_y: ((target as f32 - scaled_h) / 2.0).floor(),
            src_width,
            src_height,
        }
    }

    /// Map a point from model input space to source image space
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize keeping aspect ratio and pad to a `target` x `target` square
pub fn letterbox(img: &DynamicImage, target: u32) -> (RgbImage, Letterbox) {
    let rgb = img.to_rgb8();
    let geometry = Letterbox::for_size(rgb.width(), rgb.height(), target);

    let scaled_w = ((rgb.width() as f32 * geometry.scale).round() as u32).clamp(1, target);
    let scaled_h = ((rgb.height() as f32 * geometry.scale).round() as u32).clamp(1, target);
    let scaled = image::imageops::resize(&rgb, scaled_w, scaled_h, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(target, target, Rgb([PAD_VALUE; 3]));
    image::imageops::overlay(
        &mut canvas,
        &scaled,
        geometry.pad_x as i64,
        geometry.pad_y as i64,
    );

    (canvas, geometry)
}

/// Planar RGB in [0, 1], laid out as [3, height, width]
pub fn to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; plane * 3];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        for channel in 0..3 {
            data[channel * plane + offset] = pixel[channel] as f32 / 255.0;
        }
    }

    data
}
