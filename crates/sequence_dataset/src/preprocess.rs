use crate::types::DatasetConfig;
use image::imageops::FilterType;
use image::RgbImage;

/// Resize + per-channel normalization into a CHW f32 buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameTransform {
    pub width: u32,
    pub height: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl FrameTransform {
    pub fn from_config(cfg: &DatasetConfig) -> Self {
        Self {
            width: cfg.target_size.0,
            height: cfg.target_size.1,
            mean: cfg.mean,
            std: cfg.std,
        }
    }

    pub fn frame_len(&self) -> usize {
        3 * self.width as usize * self.height as usize
    }

    pub fn apply(&self, img: &RgbImage) -> Vec<f32> {
        let resized;
        let img = if img.dimensions() != (self.width, self.height) {
            resized = image::imageops::resize(img, self.width, self.height, FilterType::Triangle);
            &resized
        } else {
            img
        };

        let mut out = Vec::with_capacity(self.frame_len());
        for c in 0..3 {
            let (mean, std) = (self.mean[c], self.std[c]);
            for y in 0..self.height {
                for x in 0..self.width {
                    let v = img.get_pixel(x, y)[c] as f32 / 255.0;
                    out.push((v - mean) / std);
                }
            }
        }
        out
    }
}
