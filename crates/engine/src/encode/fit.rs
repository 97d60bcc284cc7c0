//! Resolution and fit-mode geometry
//!
//! Maps a source frame size onto a target box. All arithmetic is integer so
//! that a source already matching the box is never nudged by rounding, and
//! every produced dimension is even (4:2:0 chroma needs it).

use serde::{Deserialize, Serialize};

/// Geometric policy for mapping the source onto the target box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// Fit inside the box, keep aspect ratio, never upscale, no padding
    Contain,
    /// Fill the box and crop the overflow
    Cover,
    /// Fit inside the box like `Contain`, then pad to the exact box
    Pad,
    /// Scale to the exact box, ignoring aspect ratio
    Stretch,
}

impl FitMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "contain" | "fit" => Some(FitMode::Contain),
            "cover" | "fill" | "crop" => Some(FitMode::Cover),
            "pad" | "letterbox" => Some(FitMode::Pad),
            "stretch" | "scale" => Some(FitMode::Stretch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FitMode::Contain => "contain",
            FitMode::Cover => "cover",
            FitMode::Pad => "pad",
            FitMode::Stretch => "stretch",
        }
    }
}

/// Requested output size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetResolution {
    /// Keep the source size
    Original,
    /// Named landscape box; flipped for portrait sources
    Preset { name: &'static str, width: u32, height: u32 },
    /// Explicit `WxH`, used as given
    Explicit { width: u32, height: u32 },
}

const PRESETS: &[(&str, u32, u32)] = &[
    ("480p", 854, 480),
    ("720p", 1280, 720),
    ("1080p", 1920, 1080),
    ("1440p", 2560, 1440),
    ("2160p", 3840, 2160),
];

impl TargetResolution {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_lowercase();
        if value == "original" || value == "source" {
            return Some(TargetResolution::Original);
        }
        let value = match value.as_str() {
            "4k" | "uhd" => "2160p".to_string(),
            "2k" | "qhd" => "1440p".to_string(),
            "fhd" => "1080p".to_string(),
            "hd" => "720p".to_string(),
            "sd" => "480p".to_string(),
            _ => value,
        };
        if let Some((name, width, height)) = PRESETS.iter().find(|(n, _, _)| *n == value) {
            return Some(TargetResolution::Preset {
                name: *name,
                width: *width,
                height: *height,
            });
        }
        let (w, h) = value.split_once('x')?;
        let width = w.trim().parse::<u32>().ok().filter(|w| *w > 0)?;
        let height = h.trim().parse::<u32>().ok().filter(|h| *h > 0)?;
        Some(TargetResolution::Explicit { width, height })
    }

    /// Concrete box for a given source, `None` when no scaling is requested.
    pub fn target_box(&self, source_width: u32, source_height: u32) -> Option<(u32, u32)> {
        match *self {
            TargetResolution::Original => None,
            TargetResolution::Preset { width, height, .. } => {
                if source_height > source_width {
                    Some((height, width))
                } else {
                    Some((width, height))
                }
            }
            TargetResolution::Explicit { width, height } => Some((width, height)),
        }
    }

    pub fn label(&self) -> String {
        match self {
            TargetResolution::Original => "original".to_string(),
            TargetResolution::Preset { name, .. } => name.to_string(),
            TargetResolution::Explicit { width, height } => format!("{}x{}", width, height),
        }
    }
}

/// Resolved scaling plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitGeometry {
    pub scale_width: u32,
    pub scale_height: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub fit: FitMode,
}

impl FitGeometry {
    /// ffmpeg `-vf` chain realising this geometry
    pub fn filter(&self) -> String {
        let scale = format!("scale={}:{}", self.scale_width, self.scale_height);
        match self.fit {
            FitMode::Contain => scale,
            FitMode::Cover => format!("{},crop={}:{}", scale, self.output_width, self.output_height),
            FitMode::Pad => format!(
                "{},pad={}:{}:(ow-iw)/2:(oh-ih)/2:color=black",
                scale, self.output_width, self.output_height
            ),
            FitMode::Stretch => format!("{},setsar=1", scale),
        }
    }

    pub fn label(&self) -> String {
        format!("{}x{}", self.output_width, self.output_height)
    }
}

fn even_floor(v: u64) -> u32 {
    let v = v.min(u32::MAX as u64) as u32;
    (v - v % 2).max(2)
}

fn even_ceil(v: u64) -> u32 {
    let v = v.min((u32::MAX - 1) as u64) as u32;
    (v + v % 2).max(2)
}

/// Compute the scaling plan for `source` inside `target` under `fit`.
pub fn compute_geometry(source: (u32, u32), target: (u32, u32), fit: FitMode) -> FitGeometry {
    let (sw, sh) = (source.0.max(1) as u64, source.1.max(1) as u64);
    let (tw, th) = (target.0.max(1) as u64, target.1.max(1) as u64);

    match fit {
        FitMode::Contain | FitMode::Pad => {
            let (w, h) = if sw <= tw && sh <= th {
                (sw, sh)
            } else if sw * th <= sh * tw {
                // height-limited
                (sw * th / sh, th)
            } else {
                (tw, sh * tw / sw)
            };
            let (scale_width, scale_height) = (even_floor(w), even_floor(h));
            let (output_width, output_height) = if fit == FitMode::Pad {
                (even_floor(tw), even_floor(th))
            } else {
                (scale_width, scale_height)
            };
            FitGeometry {
                scale_width,
                scale_height,
                output_width,
                output_height,
                fit,
            }
        }
        FitMode::Cover => {
            let (w, h) = if sw * th >= sh * tw {
                // source wider than the box: match height
                ((sw * th).div_ceil(sh), th)
            } else {
                (tw, (sh * tw).div_ceil(sw))
            };
            FitGeometry {
                scale_width: even_ceil(w),
                scale_height: even_ceil(h),
                output_width: even_floor(tw),
                output_height: even_floor(th),
                fit,
            }
        }
        FitMode::Stretch => {
            let (w, h) = (even_floor(tw), even_floor(th));
            FitGeometry {
                scale_width: w,
                scale_height: h,
                output_width: w,
                output_height: h,
                fit,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_stretch_hits_target_exactly(
            sw in 16u32..8000, sh in 16u32..8000,
            tw in 1u32..4000, th in 1u32..4000,
        ) {
            let (tw, th) = (tw * 2, th * 2);
            let geometry = compute_geometry((sw, sh), (tw, th), FitMode::Stretch);
            prop_assert_eq!((geometry.output_width, geometry.output_height), (tw, th));
            prop_assert_eq!((geometry.scale_width, geometry.scale_height), (tw, th));
        }

        #[test]
        fn prop_contain_stays_within_bounds(
            sw in 2u32..8000, sh in 2u32..8000,
            tw in 2u32..4000, th in 2u32..4000,
        ) {
            let geometry = compute_geometry((sw, sh), (tw, th), FitMode::Contain);
            prop_assert!(geometry.output_width <= tw.max(2));
            prop_assert!(geometry.output_height <= th.max(2));
            // never upscale
            prop_assert!(geometry.output_width <= sw.max(2));
            prop_assert!(geometry.output_height <= sh.max(2));
            prop_assert_eq!(geometry.output_width % 2, 0);
            prop_assert_eq!(geometry.output_height % 2, 0);
        }

        #[test]
        fn prop_cover_fills_and_crops(
            sw in 16u32..8000, sh in 16u32..8000,
            tw in 1u32..2000, th in 1u32..2000,
        ) {
            let (tw, th) = (tw * 2, th * 2);
            let geometry = compute_geometry((sw, sh), (tw, th), FitMode::Cover);
            prop_assert!(geometry.scale_width >= tw);
            prop_assert!(geometry.scale_height >= th);
            prop_assert_eq!((geometry.output_width, geometry.output_height), (tw, th));
        }

        #[test]
        fn prop_pad_output_is_box(
            sw in 16u32..8000, sh in 16u32..8000,
            tw in 1u32..2000, th in 1u32..2000,
        ) {
            let (tw, th) = (tw * 2, th * 2);
            let geometry = compute_geometry((sw, sh), (tw, th), FitMode::Pad);
            prop_assert_eq!((geometry.output_width, geometry.output_height), (tw, th));
            prop_assert!(geometry.scale_width <= tw && geometry.scale_height <= th);
        }
    }

    #[test]
    fn test_contain_downscales_4k_to_1080p() {
        let geometry = compute_geometry((3840, 2160), (1920, 1080), FitMode::Contain);
        assert_eq!((geometry.output_width, geometry.output_height), (1920, 1080));
        assert_eq!(geometry.filter(), "scale=1920:1080");
    }

    #[test]
    fn test_contain_keeps_smaller_source() {
        let geometry = compute_geometry((1280, 720), (1920, 1080), FitMode::Contain);
        assert_eq!((geometry.output_width, geometry.output_height), (1280, 720));
    }

    #[test]
    fn test_cover_crops_ultrawide() {
        let geometry = compute_geometry((2560, 1080), (1920, 1080), FitMode::Cover);
        assert_eq!((geometry.scale_width, geometry.scale_height), (2560, 1080));
        assert_eq!(geometry.filter(), "scale=2560:1080,crop=1920:1080");
    }

    #[test]
    fn test_pad_letterboxes() {
        let geometry = compute_geometry((1920, 800), (1920, 1080), FitMode::Pad);
        assert_eq!((geometry.scale_width, geometry.scale_height), (1920, 800));
        assert!(geometry.filter().starts_with("scale=1920:800,pad=1920:1080"));
    }

    #[test]
    fn test_preset_follows_source_orientation() {
        let preset = TargetResolution::parse("1080p").unwrap();
        assert_eq!(preset.target_box(1920, 1080), Some((1920, 1080)));
        assert_eq!(preset.target_box(1080, 1920), Some((1080, 1920)));
        assert_eq!(TargetResolution::parse("original").unwrap().target_box(10, 10), None);
    }

    #[test]
    fn test_parse_resolution_forms() {
        assert_eq!(
            TargetResolution::parse("1280x720"),
            Some(TargetResolution::Explicit { width: 1280, height: 720 })
        );
        assert_eq!(TargetResolution::parse("4k").unwrap().label(), "2160p");
        assert_eq!(TargetResolution::parse("0x720"), None);
        assert_eq!(TargetResolution::parse("huge"), None);
    }
}
