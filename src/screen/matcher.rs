//! Template matching on captured frames.

use image::{GrayImage, RgbaImage};

use super::types::{Hit, Point};

/// Locates a template inside a frame
pub trait TemplateMatcher {
    /// Best position of `needle` in `haystack` scoring at least `min_score`
    fn best_match(&self, haystack: &RgbaImage, needle: &RgbaImage, min_score: f32) -> Option<Hit>;
}

/// Grayscale zero-mean normalized cross-correlation matcher.
///
/// The score of a position is the correlation between the template and the
/// window after subtracting each one's mean, in `-1.0..=1.0`. Uniform
/// brightness or contrast changes do not move the score, while unrelated
/// text on the same background stays far below 1. A flat template, or a flat
/// window, never matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelMatcher;

impl TemplateMatcher for PixelMatcher {
    fn best_match(&self, haystack: &RgbaImage, needle: &RgbaImage, min_score: f32) -> Option<Hit> {
        let frame = image::imageops::grayscale(haystack);
        let template = image::imageops::grayscale(needle);
        best_gray_match(&frame, &template, min_score)
    }
}

/// Squared deviation below which a patch counts as flat.
/// Integer pixels put any non-flat patch above it.
const FLAT_VARIANCE: f64 = 0.5;

fn best_gray_match(frame: &GrayImage, template: &GrayImage, min_score: f32) -> Option<Hit> {
    let (fw, fh) = frame.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > fw || th > fh {
        return None;
    }

    let n = f64::from(tw) * f64::from(th);
    let template_raw = template.as_raw();
    let mean = template_raw.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let centered: Vec<f64> = template_raw.iter().map(|&v| f64::from(v) - mean).collect();
    let template_var: f64 = centered.iter().map(|v| v * v).sum();
    if template_var < FLAT_VARIANCE {
        return None;
    }
    let template_norm = template_var.sqrt();

    let sums = IntegralImage::new(frame);
    let frame_raw = frame.as_raw();
    let threshold = f64::from(min_score.clamp(-1.0, 1.0));
    let mut best: Option<(u32, u32, f64)> = None;

    for y in 0..=(fh - th) {
        for x in 0..=(fw - tw) {
            let (sum, sum_sq) = sums.window(x, y, tw, th);
            let window_var = sum_sq - sum * sum / n;
            if window_var < FLAT_VARIANCE {
                continue;
            }

            // the template is zero-mean, so the window mean drops out
            let mut cross = 0.0;
            for ty in 0..th {
                let frame_row = ((y + ty) * fw + x) as usize;
                let template_row = (ty * tw) as usize;
                for tx in 0..tw as usize {
                    cross += centered[template_row + tx] * f64::from(frame_raw[frame_row + tx]);
                }
            }

            let score = (cross / (template_norm * window_var.sqrt())).clamp(-1.0, 1.0);
            if score >= threshold && best.is_none_or(|(_, _, s)| score > s) {
                best = Some((x, y, score));
            }
        }
    }

    best.map(|(x, y, score)| Hit {
        center: Point::new((x + tw / 2) as i32, (y + th / 2) as i32),
        score: score as f32,
    })
}

/// Summed-area tables of pixel values and their squares
struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sum_sq: Vec<u64>,
}

impl IntegralImage {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = img.dimensions();
        let stride = w as usize + 1;
        let mut sum = vec![0u64; stride * (h as usize + 1)];
        let mut sum_sq = vec![0u64; stride * (h as usize + 1)];
        for (y, row) in img.as_raw().chunks_exact(w as usize).enumerate() {
            let (mut run, mut run_sq) = (0u64, 0u64);
            for (x, &v) in row.iter().enumerate() {
                run += u64::from(v);
                run_sq += u64::from(v) * u64::from(v);
                let at = (y + 1) * stride + x + 1;
                sum[at] = sum[at - stride] + run;
                sum_sq[at] = sum_sq[at - stride] + run_sq;
            }
        }
        Self { stride, sum, sum_sq }
    }

    /// Sum and sum of squares over a `w x h` window at `(x, y)`
    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let area = |t: &[u64]| {
            (t[y1 * self.stride + x1] + t[y0 * self.stride + x0])
                - (t[y0 * self.stride + x1] + t[y1 * self.stride + x0])
        };
        (area(&self.sum) as f64, area(&self.sum_sq) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::backend::{FrameSource, VirtualDisplay};
    use image::DynamicImage;

    fn ok_screen() -> VirtualDisplay {
        let mut screen = VirtualDisplay::with_color(64, 48, [30, 30, 30]);
        screen.draw_text(20, 10, "OK", [255, 255, 255], [0, 0, 120]);
        screen
    }

    #[test]
    fn test_exact_match_reports_center() {
        let mut screen = ok_screen();
        let template = DynamicImage::ImageRgb8(screen.crop(20, 10, 16, 8)).to_rgba8();

        let hit = PixelMatcher.best_match(&screen.grab().unwrap(), &template, 0.9).unwrap();
        assert_eq!(hit.center, Point::new(28, 14));
        assert!(hit.score > 0.999);
    }

    #[test]
    fn test_contrast_change_keeps_score() {
        let mut screen = ok_screen();
        let mut restyled = VirtualDisplay::new(16, 8);
        restyled.draw_text(0, 0, "OK", [180, 180, 180], [60, 60, 60]);

        let hit = PixelMatcher
            .best_match(&screen.grab().unwrap(), &restyled.grab().unwrap(), 0.9)
            .unwrap();
        assert_eq!(hit.center, Point::new(28, 14));
        assert!(hit.score > 0.999);
    }

    #[test]
    fn test_inverted_text_is_not_a_match() {
        let mut screen = ok_screen();
        let mut inverted = VirtualDisplay::new(16, 8);
        inverted.draw_text(0, 0, "OK", [0, 0, 120], [255, 255, 255]);

        assert!(PixelMatcher
            .best_match(&screen.grab().unwrap(), &inverted.grab().unwrap(), 0.7)
            .is_none());
    }

    #[test]
    fn test_flat_template_never_matches() {
        let mut screen = VirtualDisplay::with_color(32, 32, [200, 200, 200]);
        let mut flat = VirtualDisplay::with_color(8, 8, [200, 200, 200]);
        assert!(PixelMatcher
            .best_match(&screen.grab().unwrap(), &flat.grab().unwrap(), -1.0)
            .is_none());
    }

    #[test]
    fn test_score_respects_threshold() {
        let mut screen = ok_screen();
        let mut smudged = screen.crop(20, 10, 16, 8);
        for (x, y, px) in smudged.enumerate_pixels_mut() {
            if (x + 3 * y) % 3 == 0 {
                *px = image::Rgb([0, 0, 120]);
            }
        }
        let template = DynamicImage::ImageRgb8(smudged).to_rgba8();
        let frame = screen.grab().unwrap();

        let hit = PixelMatcher.best_match(&frame, &template, 0.0).unwrap();
        assert_eq!(hit.center, Point::new(28, 14));
        assert!(hit.score > 0.7 && hit.score < 0.8);
        assert!(PixelMatcher.best_match(&frame, &template, 0.8).is_none());
    }

    #[test]
    fn test_integral_window_sums() {
        let mut img = GrayImage::new(4, 3);
        for (x, y, px) in img.enumerate_pixels_mut() {
            px.0 = [(x + 4 * y) as u8];
        }
        let sums = IntegralImage::new(&img);
        // pixels 5, 6, 9, 10
        assert_eq!(sums.window(1, 1, 2, 2), (30.0, 242.0));
        assert_eq!(sums.window(0, 0, 4, 3).0, 66.0);
    }

    #[test]
    fn test_template_larger_than_frame() {
        let mut screen = VirtualDisplay::new(4, 4);
        let mut big = VirtualDisplay::new(8, 8);
        assert!(PixelMatcher
            .best_match(&screen.grab().unwrap(), &big.grab().unwrap(), 0.0)
            .is_none());
    }
}
