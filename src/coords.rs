//! Maps the many coordinate shapes a model may emit onto one absolute,
//! in-bounds device pixel.
//!
//! Resolution is a pure function of the args mapping plus the transmitted
//! image dimensions and the device dimensions; it never queries the OS.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Accepted argument shapes, in the order they are tried.
pub const ACCEPTED_SHAPES: &str = "{norm_x,norm_y}, {x,y}, {cx,cy}, {coordinate:[x,y]}, \
     {coordinates:[x,y]}, {point:[x,y]}, {target:[x,y]}, {location:[x,y]}, \
     {position:{x,y}}, {center:{x,y}}, {bbox:[x1,y1,x2,y2]}";

#[derive(Debug, Error)]
pub enum CoordinateError {
    #[error(
        "No usable coordinates in args (keys present: [{present}]; accepted: {accepted})",
        accepted = ACCEPTED_SHAPES
    )]
    NoMatch { present: String },
}

/// The pixel grid an emitted pair is expressed in.
///
/// `Unit` and `Thousandths` are relative to the transmitted image;
/// `Device` means the values are already device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordSpace {
    Device,
    Unit,
    Thousandths,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPoint {
    pub x: i32,
    pub y: i32,
    /// Which accepted shape supplied the value, e.g. `"x/y"` or `"bbox"`.
    pub coord_source: String,
    pub space: CoordSpace,
    pub clamped: bool,
}

/// Resolve `args` to an absolute device pixel.
///
/// Space policy: an explicit `coord_system` tag wins; the `norm_x`/`norm_y`
/// key pair forces unit scale; a pair with both values in `[0,1]` is taken
/// as unit scale; anything else is passed through as device pixels and
/// clamped. Raw values are never silently rescaled just for being large;
/// providers are known to answer in device space despite having seen only
/// the transmitted image.
pub fn resolve(
    args: &serde_json::Map<String, serde_json::Value>,
    image: (u32, u32),
    device: (u32, u32),
) -> Result<ResolvedPoint, CoordinateError> {
    let pair = extract(args).ok_or_else(|| CoordinateError::NoMatch {
        present: args.keys().cloned().collect::<Vec<_>>().join(", "),
    })?;
    let space = detect_space(args, &pair);

    // Normalized values map into image pixel space first, then each axis
    // scales independently by its own device/image ratio.
    let scale_axis = |v: f64, img_dim: u32, dev_dim: u32| -> f64 {
        let img = f64::from(img_dim);
        let dev = f64::from(dev_dim);
        match space {
            CoordSpace::Unit => v * img * dev / img,
            CoordSpace::Thousandths => v / 1000.0 * img * dev / img,
            CoordSpace::Device => v,
        }
    };

    let (x, x_clamped) = clamp_axis(scale_axis(pair.x, image.0, device.0), device.0);
    let (y, y_clamped) = clamp_axis(scale_axis(pair.y, image.1, device.1), device.1);

    Ok(ResolvedPoint {
        x,
        y,
        coord_source: pair.source.to_string(),
        space,
        clamped: x_clamped || y_clamped,
    })
}

struct RawPair {
    x: f64,
    y: f64,
    source: &'static str,
    forced: Option<CoordSpace>,
}

/// First fully-valid shape wins; a key that is present but malformed
/// (wrong arity, non-numeric member) does not match and the next shape
/// is tried.
fn extract(args: &serde_json::Map<String, serde_json::Value>) -> Option<RawPair> {
    if let Some((x, y)) = scalar_pair(args, "norm_x", "norm_y") {
        return Some(RawPair {
            x,
            y,
            source: "norm_x/norm_y",
            forced: Some(CoordSpace::Unit),
        });
    }
    if let Some((x, y)) = scalar_pair(args, "x", "y") {
        return Some(RawPair {
            x,
            y,
            source: "x/y",
            forced: None,
        });
    }
    if let Some((x, y)) = scalar_pair(args, "cx", "cy") {
        return Some(RawPair {
            x,
            y,
            source: "cx/cy",
            forced: None,
        });
    }
    for key in ["coordinate", "coordinates", "point", "target", "location"] {
        if let Some((x, y)) = array_pair(args.get(key)) {
            return Some(RawPair {
                x,
                y,
                source: key,
                forced: None,
            });
        }
    }
    for key in ["position", "center"] {
        if let Some((x, y)) = nested_pair(args.get(key)) {
            return Some(RawPair {
                x,
                y,
                source: key,
                forced: None,
            });
        }
    }
    if let Some((x, y)) = bbox_center(args.get("bbox")) {
        return Some(RawPair {
            x,
            y,
            source: "bbox",
            forced: None,
        });
    }
    None
}

fn detect_space(args: &serde_json::Map<String, serde_json::Value>, pair: &RawPair) -> CoordSpace {
    if let Some(forced) = pair.forced {
        return forced;
    }
    if let Some(hint) = args.get("coord_system").and_then(|v| v.as_str()) {
        match hint.trim().to_ascii_lowercase().as_str() {
            "normalized_1000" | "normalized-1000" | "norm_1000" => {
                return CoordSpace::Thousandths;
            }
            "unit_normalized" | "normalized" | "0_1" | "[0,1]" => return CoordSpace::Unit,
            _ => {}
        }
    }
    if (0.0..=1.0).contains(&pair.x) && (0.0..=1.0).contains(&pair.y) {
        return CoordSpace::Unit;
    }
    CoordSpace::Device
}

fn clamp_axis(v: f64, dim: u32) -> (i32, bool) {
    let rounded = v.round();
    let max = f64::from(dim.max(1) - 1);
    let kept = rounded.clamp(0.0, max);
    (kept as i32, kept != rounded)
}

fn num(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        // Providers occasionally quote numbers.
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn scalar_pair(
    args: &serde_json::Map<String, serde_json::Value>,
    kx: &str,
    ky: &str,
) -> Option<(f64, f64)> {
    Some((num(args.get(kx)?)?, num(args.get(ky)?)?))
}

fn array_pair(v: Option<&serde_json::Value>) -> Option<(f64, f64)> {
    let arr = v?.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    Some((num(&arr[0])?, num(&arr[1])?))
}

fn nested_pair(v: Option<&serde_json::Value>) -> Option<(f64, f64)> {
    let obj = v?.as_object()?;
    Some((num(obj.get("x")?)?, num(obj.get("y")?)?))
}

fn bbox_center(v: Option<&serde_json::Value>) -> Option<(f64, f64)> {
    let arr = v?.as_array()?;
    if arr.len() != 4 {
        return None;
    }
    let x1 = num(&arr[0])?;
    let y1 = num(&arr[1])?;
    let x2 = num(&arr[2])?;
    let y2 = num(&arr[3])?;
    Some(((x1 + x2) / 2.0, (y1 + y2) / 2.0))
}
