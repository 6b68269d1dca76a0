use std::path::Path;

use base64::{Engine, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::Serialize;

/// Where a [`CapturedFrame`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    LiveCamera,
    UserUpload,
}

/// An encoded still image ready to be analysed.
///
/// Frames are immutable once built; the payload is reference counted so
/// handing one to the orchestrator never copies the image.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    bytes: Bytes,
    mime: String,
    provenance: Provenance,
    captured_at: DateTime<Local>,
}

impl CapturedFrame {
    pub fn new(bytes: impl Into<Bytes>, mime: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            bytes: bytes.into(),
            mime: mime.into(),
            provenance,
            captured_at: Local::now(),
        }
    }

    /// Read a user selected image file as-is.
    ///
    /// The mime type is derived from the file extension; unknown extensions
    /// are sent as `image/jpeg`, which is what the camera path produces.
    pub async fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let mime = image::ImageFormat::from_path(path)
            .map(|f| f.to_mime_type())
            .unwrap_or("image/jpeg");
        Ok(Self::new(bytes, mime, Provenance::UserUpload))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    /// Base64 payload without any prefix.
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    /// `data:` URL suitable for an `image_url` content part.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.to_base64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_carries_mime_and_payload() {
        let frame = CapturedFrame::new(&b"abc"[..], "image/png", Provenance::UserUpload);
        assert_eq!(frame.to_data_url(), "data:image/png;base64,YWJj");
    }

    #[tokio::test]
    async fn file_frame_keeps_bytes_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sign.png");
        tokio::fs::write(&path, b"not really a png").await.unwrap();
        let frame = CapturedFrame::from_file(&path).await.unwrap();
        assert_eq!(frame.bytes(), b"not really a png");
        assert_eq!(frame.mime(), "image/png");
        assert_eq!(frame.provenance(), Provenance::UserUpload);
    }
}
