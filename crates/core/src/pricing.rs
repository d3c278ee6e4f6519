//! Fixed generation price table and resolution tiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::media::{MediaType, SCENE_IMAGE_TO_IMAGE, SCENE_TEXT_TO_IMAGE};

/// Options key carrying the requested resolution tier.
pub const RESOLUTION_OPTION_KEY: &str = "resolution";

/// Output resolution tier, ordered from cheapest to most expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResolutionTier {
    #[serde(rename = "1k")]
    Standard,
    #[serde(rename = "2k")]
    High,
    #[serde(rename = "4k")]
    Ultra,
}

impl ResolutionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionTier::Standard => "1k",
            ResolutionTier::High => "2k",
            ResolutionTier::Ultra => "4k",
        }
    }

    /// Price multiplier applied to the base image price.
    fn image_multiplier(self) -> i32 {
        match self {
            ResolutionTier::Standard => 1,
            ResolutionTier::High => 5,
            ResolutionTier::Ultra => 10,
        }
    }

    /// Read the tier from a request's options object.
    ///
    /// A missing key (or missing options) means [`ResolutionTier::Standard`].
    pub fn from_options(options: Option<&serde_json::Value>) -> Result<Self, CoreError> {
        match options.and_then(|o| o.get(RESOLUTION_OPTION_KEY)) {
            None | Some(serde_json::Value::Null) => Ok(ResolutionTier::Standard),
            Some(serde_json::Value::String(s)) => s.parse(),
            Some(other) => Err(CoreError::Validation(format!(
                "Invalid resolution '{other}'. Must be one of: 1k, 2k, 4k"
            ))),
        }
    }
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionTier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1k" => Ok(ResolutionTier::Standard),
            "2k" => Ok(ResolutionTier::High),
            "4k" => Ok(ResolutionTier::Ultra),
            _ => Err(CoreError::Validation(format!(
                "Invalid resolution '{s}'. Must be one of: 1k, 2k, 4k"
            ))),
        }
    }
}

/// Base price of a standard-resolution text-to-image generation.
const TEXT_TO_IMAGE_BASE: i32 = 2;
/// Base price of a standard-resolution image-to-image generation.
const IMAGE_TO_IMAGE_BASE: i32 = 4;
/// Flat price of a music generation.
const MUSIC_PRICE: i32 = 10;

/// Credits charged for one generation.
///
/// The scene is expected to be valid for the media type already; an unknown
/// image scene is rejected rather than priced at zero.
pub fn price(media_type: MediaType, scene: &str, tier: ResolutionTier) -> Result<i32, CoreError> {
    match media_type {
        MediaType::Image => {
            let base = match scene {
                SCENE_TEXT_TO_IMAGE => TEXT_TO_IMAGE_BASE,
                SCENE_IMAGE_TO_IMAGE => IMAGE_TO_IMAGE_BASE,
                other => {
                    return Err(CoreError::Validation(format!(
                        "No price defined for image scene '{other}'"
                    )))
                }
            };
            Ok(base * tier.image_multiplier())
        }
        MediaType::Music => Ok(MUSIC_PRICE),
    }
}

/// Whether `tier` sits above the deployment's ungated ceiling and therefore
/// needs proof of a paid plan.
pub fn requires_paid_plan(tier: ResolutionTier, ungated_ceiling: ResolutionTier) -> bool {
    tier > ungated_ceiling
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SCENE_TEXT_TO_MUSIC;

    #[test]
    fn standard_image_prices() {
        let t2i = price(MediaType::Image, SCENE_TEXT_TO_IMAGE, ResolutionTier::Standard);
        let i2i = price(MediaType::Image, SCENE_IMAGE_TO_IMAGE, ResolutionTier::Standard);
        assert_eq!(t2i.unwrap(), 2);
        assert_eq!(i2i.unwrap(), 4);
    }

    #[test]
    fn higher_tiers_scale_image_price() {
        assert_eq!(
            price(MediaType::Image, SCENE_TEXT_TO_IMAGE, ResolutionTier::High).unwrap(),
            10
        );
        assert_eq!(
            price(MediaType::Image, SCENE_IMAGE_TO_IMAGE, ResolutionTier::Ultra).unwrap(),
            40
        );
    }

    #[test]
    fn music_is_flat_priced() {
        for tier in [ResolutionTier::Standard, ResolutionTier::Ultra] {
            assert_eq!(price(MediaType::Music, SCENE_TEXT_TO_MUSIC, tier).unwrap(), 10);
        }
    }

    #[test]
    fn unknown_image_scene_has_no_price() {
        assert!(price(MediaType::Image, "upscale", ResolutionTier::Standard).is_err());
    }

    #[test]
    fn tier_from_options() {
        let opts = serde_json::json!({ "resolution": "4K" });
        assert_eq!(ResolutionTier::from_options(Some(&opts)).unwrap(), ResolutionTier::Ultra);
        assert_eq!(ResolutionTier::from_options(None).unwrap(), ResolutionTier::Standard);

        let no_key = serde_json::json!({ "aspect_ratio": "1:1" });
        assert_eq!(
            ResolutionTier::from_options(Some(&no_key)).unwrap(),
            ResolutionTier::Standard
        );

        let bad = serde_json::json!({ "resolution": 2048 });
        assert!(ResolutionTier::from_options(Some(&bad)).is_err());
    }

    #[test]
    fn gating_applies_only_above_ceiling() {
        assert!(!requires_paid_plan(ResolutionTier::High, ResolutionTier::High));
        assert!(requires_paid_plan(ResolutionTier::Ultra, ResolutionTier::High));
        assert!(requires_paid_plan(ResolutionTier::High, ResolutionTier::Standard));
    }
}
