//! Click marker stamped onto persisted step screenshots, marking where the
//! resolved point landed. Owned by the Stepper for the length of one run.

pub struct ClickMarker {
    radius: i32,
    color: image::Rgba<u8>,
}

impl ClickMarker {
    pub fn new(radius: u32) -> Self {
        Self {
            radius: radius.max(2) as i32,
            color: image::Rgba([255, 69, 58, 255]),
        }
    }

    /// Draw a ring plus crosshair centered on image-space `(x, y)`.
    /// Parts falling outside the frame are skipped.
    pub fn stamp(&self, frame: &mut image::RgbaImage, x: i32, y: i32) {
        let r = self.radius;

        for dy in -r - 1..=r + 1 {
            for dx in -r - 1..=r + 1 {
                let d2 = dx * dx + dy * dy;
                if d2 >= (r - 1) * (r - 1) && d2 <= (r + 1) * (r + 1) {
                    self.put(frame, x + dx, y + dy);
                }
            }
        }
        for d in -r..=r {
            self.put(frame, x + d, y);
            self.put(frame, x, y + d);
        }
    }

    fn put(&self, frame: &mut image::RgbaImage, x: i32, y: i32) {
        if x < 0 || y < 0 {
            return;
        }
        let (x, y) = (x as u32, y as u32);
        if x < frame.width() && y < frame.height() {
            frame.put_pixel(x, y, self.color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(w: u32, h: u32) -> image::RgbaImage {
        image::RgbaImage::from_pixel(w, h, image::Rgba([0, 0, 0, 255]))
    }

    #[test]
    fn test_stamp_draws_cross_and_ring() {
        let marker = ClickMarker::new(10);
        let mut frame = blank(100, 100);
        marker.stamp(&mut frame, 50, 50);

        let hit = image::Rgba([255, 69, 58, 255]);
        assert_eq!(*frame.get_pixel(50, 50), hit);
        assert_eq!(*frame.get_pixel(60, 50), hit);
        assert_eq!(*frame.get_pixel(50, 40), hit);
        // Well outside the ring stays untouched.
        assert_eq!(*frame.get_pixel(80, 80), image::Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_stamp_near_edges_is_clipped() {
        let marker = ClickMarker::new(18);
        let mut frame = blank(40, 40);
        marker.stamp(&mut frame, 0, 0);
        marker.stamp(&mut frame, 39, 39);
        marker.stamp(&mut frame, -5, 100);
        assert_eq!(*frame.get_pixel(0, 0), image::Rgba([255, 69, 58, 255]));
    }
}
