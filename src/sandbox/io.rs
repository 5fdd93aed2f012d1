//! Bounded capture of child stdout/stderr.

use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK: usize = 8 * 1024;

/// Output captured from one stream of a child process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    bytes: Vec<u8>,
    truncated: bool,
}

impl CapturedOutput {
    /// Create a captured output from bytes already in memory.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            truncated: false,
        }
    }

    /// Read `reader` to EOF, keeping at most `limit` bytes.
    ///
    /// Bytes past the limit are still read so the child never blocks on a
    /// full pipe, but they are discarded and the capture is flagged truncated.
    pub async fn capture<R>(mut reader: R, limit: usize) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut captured = Self::default();
        let mut buf = vec![0u8; CHUNK];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let room = limit.saturating_sub(captured.bytes.len());
            if n > room {
                captured.truncated = true;
            }
            captured.bytes.extend_from_slice(&buf[..n.min(room)]);
        }
        Ok(captured)
    }

    /// Get the captured output as a string.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).to_string()
    }

    /// Get the captured output as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether output was dropped because it exceeded the limit.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Get the length of captured data.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Check if the output holds anything other than whitespace.
    pub fn is_blank(&self) -> bool {
        self.bytes.iter().all(u8::is_ascii_whitespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_capture_within_limit() {
        let reader = Builder::new().read(b"hello ").read(b"world").build();
        let output = CapturedOutput::capture(reader, 1024).await.unwrap();
        assert_eq!(output.to_string_lossy(), "hello world");
        assert!(!output.is_truncated());
    }

    #[tokio::test]
    async fn test_capture_truncates_and_drains() {
        let reader = Builder::new()
            .read(b"0123456789")
            .read(b"abcdef")
            .read(b"more")
            .build();
        let output = CapturedOutput::capture(reader, 12).await.unwrap();
        assert_eq!(output.as_bytes(), b"0123456789ab");
        assert!(output.is_truncated());
    }

    #[tokio::test]
    async fn test_capture_exact_limit_is_not_truncated() {
        let reader = Builder::new().read(b"1234").build();
        let output = CapturedOutput::capture(reader, 4).await.unwrap();
        assert_eq!(output.len(), 4);
        assert!(!output.is_truncated());
    }

    #[tokio::test]
    async fn test_capture_propagates_read_errors() {
        let reader = Builder::new()
            .read(b"partial")
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        assert!(CapturedOutput::capture(reader, 64).await.is_err());
    }

    #[test]
    fn test_blank() {
        assert!(CapturedOutput::default().is_blank());
        assert!(CapturedOutput::new(b" \n\t".to_vec()).is_blank());
        assert!(!CapturedOutput::new(b"x".to_vec()).is_blank());
    }
}
