//! Pixel-level change metric between two captures.

/// Mean per-pixel change over the overlapping area of two frames. Per pixel
/// the metric is the largest RGB channel difference; alpha is ignored. An
/// empty overlap yields 0.0.
pub fn mean_abs_diff(before: &image::RgbaImage, after: &image::RgbaImage) -> f64 {
    let width = before.width().min(after.width());
    let height = before.height().min(after.height());
    if width == 0 || height == 0 {
        return 0.0;
    }
    let mut sum: u64 = 0;
    for y in 0..height {
        for x in 0..width {
            let a = before.get_pixel(x, y).0;
            let b = after.get_pixel(x, y).0;
            let dr = (i16::from(a[0]) - i16::from(b[0])).unsigned_abs();
            let dg = (i16::from(a[1]) - i16::from(b[1])).unsigned_abs();
            let db = (i16::from(a[2]) - i16::from(b[2])).unsigned_abs();
            sum += u64::from(dr.max(dg).max(db));
        }
    }
    sum as f64 / (u64::from(width) * u64::from(height)) as f64
}
