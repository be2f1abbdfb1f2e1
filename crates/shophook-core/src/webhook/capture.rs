//! Single-read capture of webhook request bodies.
//!
//! The body stream of an inbound request can be drained only once. The
//! capturer drains it into an owned buffer under a size bound; verification,
//! decoding and storage all read from that same buffer afterwards.

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use crate::crypto::sha256_hex;
use crate::error::{Result, ShophookError};

/// A fully drained request body.
///
/// Cloning is cheap and every clone sees the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPayload {
    bytes: Bytes,
}

impl CapturedPayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex SHA-256 of the body, used as an audit fingerprint.
    pub fn sha256(&self) -> String {
        sha256_hex(&self.bytes)
    }
}

impl From<Bytes> for CapturedPayload {
    fn from(bytes: Bytes) -> Self {
        Self { bytes }
    }
}

impl From<&'static [u8]> for CapturedPayload {
    fn from(bytes: &'static [u8]) -> Self {
        Self {
            bytes: Bytes::from_static(bytes),
        }
    }
}

/// Drains a body stream into a [`CapturedPayload`].
///
/// Fails with [`ShophookError::PayloadTooLarge`] as soon as more than
/// `max_bytes` have arrived, and with [`ShophookError::Read`] if the stream
/// errors before it ends.
pub async fn capture<S, B, E>(stream: S, max_bytes: usize) -> Result<CapturedPayload>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ShophookError::Read(e.to_string()))?;
        let chunk = chunk.as_ref();

        let size = buffer.len() + chunk.len();
        if size > max_bytes {
            return Err(ShophookError::PayloadTooLarge {
                size,
                limit: max_bytes,
            });
        }

        buffer.extend_from_slice(chunk);
    }

    Ok(CapturedPayload {
        bytes: buffer.freeze(),
    })
}

/// Rejects a declared `Content-Length` above the limit before reading anything.
pub fn check_declared_length(content_length: Option<u64>, max_bytes: usize) -> Result<()> {
    match content_length {
        Some(len) if len > max_bytes as u64 => Err(ShophookError::PayloadTooLarge {
            size: usize::try_from(len).unwrap_or(usize::MAX),
            limit: max_bytes,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = std::result::Result<Bytes, String>> {
        stream::iter(
            parts
                .iter()
                .copied()
                .map(|p: &'static str| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_capture_joins_chunks() {
        let payload = capture(chunks(&[r#"{"id":"#, "123", "}"]), 1024).await.unwrap();
        assert_eq!(payload.as_bytes(), br#"{"id":123}"#);

        let copy = payload.clone();
        assert_eq!(copy.as_bytes(), payload.as_bytes());
        assert_eq!(copy.sha256(), payload.sha256());
    }

    #[tokio::test]
    async fn test_capture_enforces_limit() {
        let err = capture(chunks(&["12345", "67890", "x"]), 10).await.unwrap_err();
        assert!(matches!(
            err,
            ShophookError::PayloadTooLarge { size: 11, limit: 10 }
        ));
    }

    #[tokio::test]
    async fn test_capture_exactly_at_limit_succeeds() {
        let payload = capture(chunks(&["12345", "67890"]), 10).await.unwrap();
        assert_eq!(payload.len(), 10);
    }

    #[tokio::test]
    async fn test_truncated_stream_is_read_error() {
        let parts: Vec<std::result::Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"{\"id\":")),
            Err("connection reset".to_string()),
        ];

        let err = capture(stream::iter(parts), 1024).await.unwrap_err();
        assert!(matches!(err, ShophookError::Read(ref msg) if msg.contains("connection reset")));
    }

    #[test]
    fn test_declared_length_check() {
        assert!(check_declared_length(None, 10).is_ok());
        assert!(check_declared_length(Some(10), 10).is_ok());
        assert!(matches!(
            check_declared_length(Some(11), 10),
            Err(ShophookError::PayloadTooLarge { .. })
        ));
    }
}
