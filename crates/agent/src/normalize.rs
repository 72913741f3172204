//! Mapping of model coordinates onto the screen.
//!
//! The model addresses the screen on a 0..=1000 grid in both axes; the
//! worker wants pixels.

use deskpilot_core::ScreenGeometry;
use serde_json::Value;
use tracing::warn;

/// Upper bound of the model's coordinate grid.
pub const GRID: f64 = 1000.0;

const X_KEYS: [&str; 3] = ["x", "from_x", "to_x"];
const Y_KEYS: [&str; 3] = ["y", "from_y", "to_y"];

/// Convert normalized coordinate arguments to pixels. Non-numeric or
/// out-of-grid values are passed through unchanged.
pub fn to_screen(args: &Value, screen: ScreenGeometry) -> Value {
    let Value::Object(map) = args else {
        return args.clone();
    };
    if !screen.is_known() {
        if X_KEYS.iter().chain(&Y_KEYS).any(|k| map.contains_key(*k)) {
            warn!("Screen size unknown; sending coordinates unscaled");
        }
        return args.clone();
    }

    let mut out = map.clone();
    for (keys, extent) in [(X_KEYS, screen.width), (Y_KEYS, screen.height)] {
        for key in keys {
            let Some(value) = out.get_mut(key) else {
                continue;
            };
            match value.as_f64() {
                Some(v) if (0.0..=GRID).contains(&v) => {
                    *value = Value::from((v / GRID * f64::from(extent)).round() as i64);
                }
                Some(v) => warn!(key, value = v, "Coordinate outside the 0-1000 grid"),
                None => {}
            }
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCREEN: ScreenGeometry = ScreenGeometry {
        width: 1920,
        height: 1080,
    };

    #[test]
    fn scales_point() {
        let out = to_screen(&json!({"x": 500, "y": 250, "button": "left"}), SCREEN);
        assert_eq!(out, json!({"x": 960, "y": 270, "button": "left"}));
    }

    #[test]
    fn scales_drag() {
        let out = to_screen(
            &json!({"from_x": 0, "from_y": 0, "to_x": 1000, "to_y": 1000}),
            SCREEN,
        );
        assert_eq!(out, json!({"from_x": 0, "from_y": 0, "to_x": 1920, "to_y": 1080}));
    }

    #[test]
    fn rounds_fractional_results() {
        let out = to_screen(&json!({"x": 333.3, "y": 1}), SCREEN);
        assert_eq!(out["x"], 640);
        assert_eq!(out["y"], 1);
    }

    #[test]
    fn leaves_other_values_alone() {
        let args = json!({"x": 1200, "y": "top", "text": "hello"});
        assert_eq!(to_screen(&args, SCREEN), args);
        assert_eq!(to_screen(&json!([1, 2]), SCREEN), json!([1, 2]));
    }

    #[test]
    fn unknown_screen_is_passthrough() {
        let args = json!({"x": 500, "y": 500});
        assert_eq!(to_screen(&args, ScreenGeometry::default()), args);
    }
}
