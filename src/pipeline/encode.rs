//! Card image handling: mime validation, format sniffing, base64 encoding.
//!
//! Cards arrive as the photo the user took. Nothing here decodes or
//! re-encodes pixels: the original bytes go to the model untouched, so JPEG
//! photos stay JPEG. The `image` crate is used only to recognise the format
//! from magic bytes when the caller does not know the mime type.

use crate::error::CardError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::fmt;
use tracing::debug;

/// Mime types accepted for card images.
pub const SUPPORTED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// A validated card image: non-empty bytes with a supported mime type.
#[derive(Clone, PartialEq, Eq)]
pub struct CardImage {
    bytes: Vec<u8>,
    mime: &'static str,
}

impl CardImage {
    /// Wrap raw bytes, validating the declared mime type.
    ///
    /// `image/jpg` is accepted and normalised to `image/jpeg`; parameters
    /// after `;` and letter case are ignored.
    pub fn new(bytes: Vec<u8>, mime: &str) -> Result<Self, CardError> {
        let mime = canonical_mime(mime).ok_or_else(|| CardError::UnsupportedImageType {
            mime: mime.to_string(),
        })?;
        if bytes.is_empty() {
            return Err(CardError::EmptyImage);
        }
        Ok(Self { bytes, mime })
    }

    /// Wrap raw bytes, detecting the format from their magic bytes.
    pub fn sniff(bytes: Vec<u8>) -> Result<Self, CardError> {
        if bytes.is_empty() {
            return Err(CardError::EmptyImage);
        }
        let format = image::guess_format(&bytes).map_err(|_| CardError::UnsupportedImageType {
            mime: "application/octet-stream".into(),
        })?;
        let mime = format.to_mime_type();
        debug!("Sniffed card image format: {}", mime);
        Self::new(bytes, mime)
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Base64-encode for a multimodal request body.
    ///
    /// `detail: "high"` keeps small print (phone digits, email addresses)
    /// legible to GPT-4-class models, which otherwise downsample to one tile.
    pub fn to_image_data(&self) -> ImageData {
        let b64 = STANDARD.encode(&self.bytes);
        debug!("Encoded {} card image → {} bytes base64", self.mime, b64.len());
        ImageData::new(b64, self.mime).with_detail("high")
    }
}

impl fmt::Debug for CardImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardImage")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Map a declared mime type onto the canonical supported one.
pub fn canonical_mime(mime: &str) -> Option<&'static str> {
    let base = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    match base.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("image/jpeg"),
        "image/png" => Some("image/png"),
        "image/webp" => Some("image/webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];

    #[test]
    fn accepts_supported_types() {
        for mime in SUPPORTED_MIME_TYPES {
            assert!(CardImage::new(vec![1, 2, 3], mime).is_ok(), "{mime}");
        }
    }

    #[test]
    fn jpg_alias_is_normalised() {
        let img = CardImage::new(vec![1], "Image/JPG; charset=binary").expect("valid");
        assert_eq!(img.mime(), "image/jpeg");
    }

    #[test]
    fn rejects_unsupported_and_empty() {
        assert!(matches!(
            CardImage::new(vec![1], "application/pdf"),
            Err(CardError::UnsupportedImageType { .. })
        ));
        assert!(matches!(
            CardImage::new(Vec::new(), "image/png"),
            Err(CardError::EmptyImage)
        ));
    }

    #[test]
    fn sniffs_magic_bytes() {
        assert_eq!(CardImage::sniff(PNG_MAGIC.to_vec()).expect("png").mime(), "image/png");
        assert_eq!(CardImage::sniff(JPEG_MAGIC.to_vec()).expect("jpeg").mime(), "image/jpeg");
        assert!(CardImage::sniff(b"%PDF-1.7".to_vec()).is_err());
    }

    #[test]
    fn encodes_original_bytes() {
        let img = CardImage::new(JPEG_MAGIC.to_vec(), "image/jpeg").expect("valid");
        let data = img.to_image_data();
        assert_eq!(data.mime_type, "image/jpeg");
        assert_eq!(STANDARD.decode(&data.data).expect("valid base64"), JPEG_MAGIC);
    }
}
