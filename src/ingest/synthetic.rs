use crate::frame::{RawImage, RGB_CHANNELS};

const PLATE_GRAY: u8 = 150;
const SEAM_GRAY: u8 = 90;
const PORE_GRAY: u8 = 30;

/// Deterministic synthetic feed used behind `stub://` sources.
///
/// Renders a grey plate with a darker horizontal weld seam and a small dark
/// "pore" that drifts along the seam, one step per frame. A `limit` makes
/// the feed finite like a video file; `None` makes it endless like a camera.
pub(crate) struct SyntheticFeed {
    width: u32,
    height: u32,
    limit: Option<u64>,
    frame_count: u64,
}

impl SyntheticFeed {
    pub(crate) fn new(width: u32, height: u32, limit: Option<u64>) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            limit,
            frame_count: 0,
        }
    }

    /// Next frame, or `None` once the limit is reached.
    pub(crate) fn next_frame(&mut self) -> Option<RawImage> {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return None;
        }
        let pixels = self.render();
        self.frame_count += 1;
        RawImage::new(pixels, self.width, self.height).ok()
    }

    fn render(&self) -> Vec<u8> {
        let w = self.width as usize;
        let h = self.height as usize;
        let seam_half = (h / 16).max(1);
        let seam_center = h / 2;
        let pore_x = ((self.frame_count * 7) % self.width as u64) as usize;
        let pore_radius = seam_half.min(4);

        let mut pixels = vec![PLATE_GRAY; w * h * RGB_CHANNELS];
        for y in 0..h {
            let in_seam = y + seam_half >= seam_center && y <= seam_center + seam_half;
            if !in_seam {
                continue;
            }
            for x in 0..w {
                let in_pore = x.abs_diff(pore_x) <= pore_radius
                    && y.abs_diff(seam_center) <= pore_radius;
                let value = if in_pore { PORE_GRAY } else { SEAM_GRAY };
                let offset = (y * w + x) * RGB_CHANNELS;
                pixels[offset..offset + RGB_CHANNELS].fill(value);
            }
        }
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_feed_stops_at_limit() {
        let mut feed = SyntheticFeed::new(32, 16, Some(3));
        assert!(feed.next_frame().is_some());
        assert!(feed.next_frame().is_some());
        assert!(feed.next_frame().is_some());
        assert!(feed.next_frame().is_none());
        assert_eq!(feed.frame_count, 3);
    }

    #[test]
    fn frames_show_seam_and_change_over_time() {
        let mut feed = SyntheticFeed::new(64, 32, None);
        let first = feed.next_frame().expect("frame");
        let second = feed.next_frame().expect("frame");

        assert_eq!(first.pixel(10, 0), Some([PLATE_GRAY; 3]));
        assert_eq!(first.pixel(30, 16), Some([SEAM_GRAY; 3]));
        assert_eq!(first.pixel(0, 16), Some([PORE_GRAY; 3]));
        assert_ne!(first, second);
    }
}
