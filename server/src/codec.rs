use bytes::Bytes;
use frame_relay_common::config::CodecConfig;
use frame_relay_common::frame::{FrameError, RawPixelPacket};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid raw packet: {0}")]
    Validation(#[from] FrameError),
    #[error("jpeg encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("encoder task failed: {0}")]
    Join(String),
}

/// Converts raw 8-bit grayscale packets into JPEG at a fixed quality.
#[derive(Debug, Clone)]
pub struct JpegCodec {
    max_dim: u32,
    quality: u8,
}

impl JpegCodec {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            max_dim: config.max_dim,
            quality: config.quality.clamp(1, 100),
        }
    }

    pub fn encode(&self, raw: &RawPixelPacket) -> Result<Bytes, CodecError> {
        raw.validate(self.max_dim)?;
        let mut jpeg = Vec::with_capacity(raw.samples.len() / 4);
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode(
            &raw.samples,
            raw.width,
            raw.height,
            ExtendedColorType::L8,
        )?;
        debug!(
            width = raw.width,
            height = raw.height,
            raw = raw.samples.len(),
            jpeg = jpeg.len(),
            "encoded raw frame"
        );
        Ok(Bytes::from(jpeg))
    }

    /// Parse a binary push message and encode it on the blocking pool.
    pub async fn decode_message(&self, message: Bytes) -> Result<Bytes, CodecError> {
        let packet = RawPixelPacket::parse(message, self.max_dim)?;
        let codec = self.clone();
        tokio::task::spawn_blocking(move || codec.encode(&packet))
            .await
            .map_err(|e| CodecError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> JpegCodec {
        JpegCodec::new(&CodecConfig::default())
    }

    fn packet(width: u32, height: u32, samples: usize) -> RawPixelPacket {
        RawPixelPacket {
            width,
            height,
            samples: Bytes::from((0..samples).map(|i| (i * 16) as u8).collect::<Vec<_>>()),
        }
    }

    #[test]
    fn encodes_exact_packet_to_jpeg() {
        let jpeg = codec().encode(&packet(4, 4, 16)).unwrap();
        assert!(!jpeg.is_empty());
        // SOI marker
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn rejects_bad_dimensions() {
        for (w, h) in [(0, 4), (4, 0), (2001, 1), (1, 2001)] {
            let err = codec().encode(&packet(w, h, (w * h) as usize)).unwrap_err();
            assert!(
                matches!(err, CodecError::Validation(FrameError::BadDimensions { .. })),
                "{w}x{h}: {err}"
            );
        }
    }

    #[test]
    fn rejects_sample_length_mismatch() {
        let err = codec().encode(&packet(10, 10, 99)).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Validation(FrameError::LengthMismatch { got: 99, expected: 100, .. })
        ));
    }

    #[test]
    fn respects_configured_max_dim() {
        let small = JpegCodec::new(&CodecConfig {
            max_dim: 8,
            quality: 75,
        });
        assert!(small.encode(&packet(8, 8, 64)).is_ok());
        assert!(small.encode(&packet(9, 8, 72)).is_err());
    }

    #[tokio::test]
    async fn decode_message_parses_header_then_encodes() {
        let wire = Bytes::from(packet(4, 4, 16).to_bytes());
        let jpeg = codec().decode_message(wire).await.unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let short = Bytes::from_static(&[4, 0, 0]);
        assert!(matches!(
            codec().decode_message(short).await,
            Err(CodecError::Validation(FrameError::TooShort { .. }))
        ));
    }
}
