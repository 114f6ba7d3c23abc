//! Screen capture boundary: the primary-monitor source, device-space
//! regions, and the JPEG rendition sent to the model.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::errors::{DeskDriverError, DeskDriverResult};

/// Axis-aligned rectangle in device pixels. The origin is signed so a
/// region centered near a screen edge can be built first and clamped after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Square region of side `edge` centered on a point.
    pub fn centered(cx: i32, cy: i32, edge: u32) -> Self {
        Self::from_center(cx, cy, edge, edge)
    }

    pub fn from_center(cx: i32, cy: i32, w: u32, h: u32) -> Self {
        Self {
            x: cx - (w as i32) / 2,
            y: cy - (h as i32) / 2,
            w,
            h,
        }
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + (self.w as i32) / 2, self.y + (self.h as i32) / 2)
    }

    /// Scale both edges by `factor` around the center.
    pub fn grown(&self, factor: f64) -> Self {
        let (cx, cy) = self.center();
        let w = ((f64::from(self.w) * factor).round() as u32).max(1);
        let h = ((f64::from(self.h) * factor).round() as u32).max(1);
        Self::from_center(cx, cy, w, h)
    }

    pub fn shifted(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }

    /// Intersect with a `width`×`height` frame, keeping at least one pixel.
    pub fn clamped_to(&self, width: u32, height: u32) -> Self {
        let fw = i64::from(width.max(1));
        let fh = i64::from(height.max(1));
        let x0 = i64::from(self.x).clamp(0, fw - 1);
        let y0 = i64::from(self.y).clamp(0, fh - 1);
        let x1 = (i64::from(self.x) + i64::from(self.w)).clamp(x0 + 1, fw);
        let y1 = (i64::from(self.y) + i64::from(self.h)).clamp(y0 + 1, fh);
        Self {
            x: x0 as i32,
            y: y0 as i32,
            w: (x1 - x0) as u32,
            h: (y1 - y0) as u32,
        }
    }
}

/// Where frames come from. One implementation grabs the primary monitor;
/// tests substitute scripted frames.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    /// Capture the primary display, optionally cropped to `region`
    /// (clamped to the frame).
    async fn capture(&self, region: Option<Region>) -> DeskDriverResult<image::RgbaImage>;
}

pub struct XcapScreen;

#[async_trait]
impl ScreenSource for XcapScreen {
    async fn capture(&self, region: Option<Region>) -> DeskDriverResult<image::RgbaImage> {
        // xcap does blocking OS calls.
        let frame = tokio::task::spawn_blocking(capture_primary)
            .await
            .map_err(|e| DeskDriverError::Screen(format!("capture task failed: {e}")))??;
        match region {
            Some(r) => Ok(crop_region(&frame, r)),
            None => Ok(frame),
        }
    }
}

fn capture_primary() -> DeskDriverResult<image::RgbaImage> {
    let monitors = xcap::Monitor::all()
        .map_err(|e| DeskDriverError::Screen(format!("enumerate monitors: {e}")))?;
    let monitor = monitors
        .iter()
        .find(|m| m.is_primary())
        .or_else(|| monitors.first())
        .ok_or_else(|| DeskDriverError::Screen("no monitor found".into()))?;
    monitor
        .capture_image()
        .map_err(|e| DeskDriverError::Screen(format!("capture failed: {e}")))
}

/// Copy out the part of `frame` covered by `region` (clamped).
pub fn crop_region(frame: &image::RgbaImage, region: Region) -> image::RgbaImage {
    let r = region.clamped_to(frame.width(), frame.height());
    image::imageops::crop_imm(frame, r.x as u32, r.y as u32, r.w, r.h).to_image()
}

/// What the model actually sees: a width-capped JPEG plus its dimensions.
pub struct EncodedShot {
    pub data_url: String,
    /// The resized frame itself, kept for step artifacts and text targeting.
    pub image: image::RgbaImage,
    pub width: u32,
    pub height: u32,
}

/// Downscale to at most `max_width` (aspect preserved, matching dimension
/// truncation) and encode as a JPEG data URL.
pub fn encode_for_model(
    frame: &image::RgbaImage,
    max_width: u32,
    quality: u8,
) -> DeskDriverResult<EncodedShot> {
    let (w, h) = frame.dimensions();
    let image = if max_width > 0 && w > max_width {
        let new_h = ((f64::from(h) * f64::from(max_width) / f64::from(w)) as u32).max(1);
        image::imageops::resize(
            frame,
            max_width,
            new_h,
            image::imageops::FilterType::CatmullRom,
        )
    } else {
        frame.clone()
    };

    let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut cursor = std::io::Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality);
    rgb.write_with_encoder(encoder)?;
    let b64 = base64::engine::general_purpose::STANDARD.encode(cursor.into_inner());

    let (width, height) = image.dimensions();
    Ok(EncodedShot {
        data_url: format!("data:image/jpeg;base64,{b64}"),
        image,
        width,
        height,
    })
}
