use image::{imageops, RgbImage};
use ndarray::Array4;

/// Channel layout expected by the landmark model
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorLayout {
    /// [1, 3, height, width]
    Nchw,
    /// [1, height, width, 3]
    Nhwc,
}

/// Preprocessor for converting RGB frames to landmark model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    layout: TensorLayout,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32, layout: TensorLayout) -> Self {
        Self {
            target_width,
            target_height,
            layout,
        }
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Preprocess an RGB frame into a normalized tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Lay out as NCHW or NHWC
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        } else {
            image.clone()
        };

        let (width, height) = resized.dimensions();
        let (h, w) = (height as usize, width as usize);
        let mut tensor = match self.layout {
            TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, h, w)),
            TensorLayout::Nhwc => Array4::<f32>::zeros((1, h, w, 3)),
        };

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                match self.layout {
                    TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
                    TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                }
            }
        }

        tensor
    }

    /// Map a model-space coordinate triple back to normalized image space.
    /// Depth is scaled by the input width, like x.
    pub fn normalize_point(&self, x: f32, y: f32, z: f32) -> (f32, f32, f32) {
        let w = self.target_width as f32;
        let h = self.target_height as f32;
        (x / w, y / h, z / w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts() {
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(1, 0, image::Rgb([255, 0, 51]));

        let nchw = Preprocessor::new(2, 2, TensorLayout::Nchw).preprocess(&img);
        assert_eq!(nchw.shape(), &[1, 3, 2, 2]);
        assert!((nchw[[0, 0, 0, 1]] - 1.0).abs() < 1e-6);
        assert!((nchw[[0, 2, 0, 1]] - 0.2).abs() < 1e-6);

        let nhwc = Preprocessor::new(2, 2, TensorLayout::Nhwc).preprocess(&img);
        assert_eq!(nhwc.shape(), &[1, 2, 2, 3]);
        assert!((nhwc[[0, 0, 1, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_point() {
        let pre = Preprocessor::new(224, 224, TensorLayout::Nhwc);
        let (x, y, _) = pre.normalize_point(112.0, 56.0, 0.0);
        assert!((x - 0.5).abs() < 1e-6);
        assert!((y - 0.25).abs() < 1e-6);
    }
}
