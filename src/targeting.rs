//! Capability targeting backends: visible-text lookup and control-tree
//! queries. No OS-bound implementation ships; drivers plug in through the
//! traits and their hits re-enter the coordinate pipeline.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::DeskDriverResult;
use crate::screen::Region;

/// A text match, located in the coordinate space of the searched frame.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextHit {
    pub region: Region,
    pub score: f64,
    pub text: String,
}

/// Finds visible text on a frame (OCR or equivalent).
#[async_trait]
pub trait TextLocator: Send + Sync {
    /// Best match for `query` scoring at or above `min_score`, if any.
    async fn find_text(
        &self,
        frame: &image::RgbaImage,
        query: &str,
        min_score: f64,
    ) -> DeskDriverResult<Option<TextHit>>;
}

/// An accessibility-tree element. `region` is in device pixels when the
/// backend can report one.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ControlHit {
    pub id: String,
    pub name: String,
    pub region: Option<Region>,
}

impl ControlHit {
    /// Center point for verification targeting.
    pub fn target(&self) -> Option<(i32, i32)> {
        self.region.map(|r| r.center())
    }
}

/// Queries and drives the platform control tree.
#[async_trait]
pub trait ControlTree: Send + Sync {
    async fn find(
        &self,
        selector: &serde_json::Map<String, Value>,
        scope: &str,
    ) -> DeskDriverResult<Vec<ControlHit>>;

    /// Invoke the element's default action. `false` means the backend found
    /// the element but the invoke did not take.
    async fn invoke(&self, hit: &ControlHit) -> DeskDriverResult<bool>;

    async fn set_value(&self, hit: &ControlHit, value: &str) -> DeskDriverResult<bool>;
}

/// Express a frame-space hit as unit-normalized bbox args so the resolver
/// performs the image-to-device mapping instead of the caller.
pub fn hit_to_args(region: Region, image: (u32, u32)) -> serde_json::Map<String, Value> {
    let iw = f64::from(image.0.max(1));
    let ih = f64::from(image.1.max(1));
    let x0 = f64::from(region.x) / iw;
    let y0 = f64::from(region.y) / ih;
    let x1 = (f64::from(region.x) + f64::from(region.w)) / iw;
    let y1 = (f64::from(region.y) + f64::from(region.h)) / ih;

    let mut args = serde_json::Map::new();
    args.insert("bbox".into(), serde_json::json!([x0, y0, x1, y1]));
    args.insert("coord_system".into(), Value::String("unit_normalized".into()));
    args
}
