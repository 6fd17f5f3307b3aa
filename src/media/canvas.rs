use super::types::Dimensions;
use image::imageops::{self, FilterType};
use image::RgbaImage;

/// An offscreen RGBA surface that source frames are drawn onto.
pub struct Canvas {
    pixels: RgbaImage,
}

impl Canvas {
    pub fn new(dims: Dimensions) -> Self {
        Self {
            pixels: RgbaImage::new(dims.width, dims.height),
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.pixels.width(), self.pixels.height())
    }

    /// Draws `frame` stretched over the whole canvas.
    pub fn draw(&mut self, frame: &RgbaImage) {
        if frame.dimensions() == self.pixels.dimensions() {
            self.pixels.copy_from_slice(frame.as_raw());
        } else {
            self.pixels = imageops::resize(
                frame,
                self.pixels.width(),
                self.pixels.height(),
                FilterType::Triangle,
            );
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_draw_same_size_copies_pixels() {
        let mut canvas = Canvas::new(Dimensions::new(4, 2));
        let frame = RgbaImage::from_pixel(4, 2, Rgba([1, 2, 3, 255]));
        canvas.draw(&frame);
        assert_eq!(canvas.pixels(), &frame);
    }

    #[test]
    fn test_draw_scales_to_canvas() {
        let mut canvas = Canvas::new(Dimensions::new(8, 4));
        let frame = RgbaImage::from_pixel(32, 16, Rgba([200, 100, 50, 255]));
        canvas.draw(&frame);
        assert_eq!(canvas.dimensions(), Dimensions::new(8, 4));
        assert_eq!(canvas.pixels().get_pixel(3, 2), &Rgba([200, 100, 50, 255]));
    }
}
