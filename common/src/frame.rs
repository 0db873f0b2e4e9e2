use bytes::Bytes;

/// The most recently published camera image and its publish metadata.
///
/// Cloning is cheap: the payload is a reference-counted [`Bytes`] so every
/// reader shares the same buffer and none can mutate it.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Compressed image bytes exactly as they will be served.
    pub payload: Bytes,
    /// Capture time in microseconds since the Unix epoch.
    pub captured_at_us: i64,
    /// Publish generation, 1 for the first frame.
    pub version: u64,
}

impl Frame {
    /// Capture time as fractional seconds, the form used in headers and JSON.
    pub fn timestamp_secs(&self) -> f64 {
        micros_to_secs(self.captured_at_us)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

pub fn micros_to_secs(us: i64) -> f64 {
    us as f64 / 1_000_000.0
}

/// Wall clock in microseconds since the Unix epoch.
pub fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// Uncompressed single-channel image pushed by the camera.
///
/// Wire format:
///   [0..4]  width   (u32 little-endian)
///   [4..8]  height  (u32 little-endian)
///   [8..]   samples (width * height bytes, row-major, 8-bit luma)
#[derive(Debug, Clone)]
pub struct RawPixelPacket {
    pub width: u32,
    pub height: u32,
    pub samples: Bytes,
}

pub const RAW_HEADER_SIZE: usize = 8;

impl RawPixelPacket {
    /// Split a binary push message into header and samples and check that the
    /// declared geometry is within `max_dim` and matches the sample count.
    pub fn parse(data: Bytes, max_dim: u32) -> Result<Self, FrameError> {
        if data.len() < RAW_HEADER_SIZE {
            return Err(FrameError::TooShort {
                got: data.len(),
                expected: RAW_HEADER_SIZE,
            });
        }
        let width = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let height = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let packet = Self {
            width,
            height,
            samples: data.slice(RAW_HEADER_SIZE..),
        };
        packet.validate(max_dim)?;
        Ok(packet)
    }

    pub fn validate(&self, max_dim: u32) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 || self.width > max_dim || self.height > max_dim {
            return Err(FrameError::BadDimensions {
                width: self.width,
                height: self.height,
                max_dim,
            });
        }
        // Both sides are bounded by max_dim, so the product cannot overflow usize.
        let expected = self.width as usize * self.height as usize;
        if self.samples.len() != expected {
            return Err(FrameError::LengthMismatch {
                got: self.samples.len(),
                expected,
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    /// Serialize back into the wire format. Used by test fixtures and tooling.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RAW_HEADER_SIZE + self.samples.len());
        buf.extend_from_slice(&self.width.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.samples);
        buf
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("raw packet too short: got {got} bytes, expected at least {expected}")]
    TooShort { got: usize, expected: usize },
    #[error("bad dimensions {width}x{height} (max {max_dim})")]
    BadDimensions { width: u32, height: u32, max_dim: u32 },
    #[error("sample count mismatch: got {got}, expected {expected} ({width}x{height})")]
    LengthMismatch {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },
}
