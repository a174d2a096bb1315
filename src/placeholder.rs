//! Fixed fallback image
//!
//! A constant 1x1 transparent PNG served whenever generation is skipped
//! (hidden files) or every backend strategy has been exhausted. The
//! contract is that a well-formed request always resolves to something
//! displayable, so this provider can never fail.

use crate::Preview;

/// 1x1 fully transparent PNG.
pub const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d,
    0x49, 0x48, 0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
    0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4, 0x89, 0x00, 0x00, 0x00,
    0x0b, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0x60, 0x00, 0x02, 0x00,
    0x00, 0x05, 0x00, 0x01, 0xe9, 0xfa, 0xdc, 0xd8, 0x00, 0x00, 0x00, 0x00,
    0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

pub const PLACEHOLDER_CONTENT_TYPE: &str = "image/png";

/// The constant fallback result. Carries no freshness token, so it is never
/// persisted to the cache tiers.
pub fn placeholder() -> Preview {
    Preview {
        bytes: PLACEHOLDER_PNG.to_vec(),
        content_type: PLACEHOLDER_CONTENT_TYPE,
        token: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_a_decodable_transparent_pixel() {
        let result = placeholder();
        assert_eq!(result.content_type, "image/png");
        assert!(result.token.is_none());

        let img = image::load_from_memory(&result.bytes).expect("valid png");
        assert_eq!((img.width(), img.height()), (1, 1));
        let rgba = img.to_rgba8();
        assert_eq!(rgba.get_pixel(0, 0)[3], 0); // fully transparent
    }

    #[test]
    fn test_placeholder_is_stable() {
        assert_eq!(placeholder().bytes, placeholder().bytes);
    }
}
