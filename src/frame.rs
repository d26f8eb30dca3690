//! Wire frame with sequence number and payload checksum.
//!
//! Every frame the client sends, and the server echoes, has the same shape:
//!
//! ```text
//! ┌──────────────┬──────────────┬────────────────────────┐
//! │   Sequence   │   Checksum   │        Payload         │
//! │   (4 bytes)  │   (4 bytes)  │  (packet_size bytes)   │
//! └──────────────┴──────────────┴────────────────────────┘
//! ```
//!
//! - **Sequence**: 32-bit frame number, big-endian, starting at 0
//! - **Checksum**: first 4 bytes of the BLAKE3 digest of the payload, big-endian
//! - **Payload**: `packet_size` bytes; the size is agreed out of band
//!
//! There is no length prefix and no magic marker. The checksum is an integrity
//! signal only: a collision shows up as undetected corruption.
//!
//! # Examples
//!
//! ```
//! use echoperf::frame::{checksum, decode, encode, HEADER_SIZE};
//!
//! let payload = vec![7u8; 64];
//! let bytes = encode(42, &payload);
//! assert_eq!(bytes.len(), HEADER_SIZE + 64);
//!
//! let frame = decode(&bytes, 64).expect("valid frame");
//! assert_eq!(frame.sequence, 42);
//! assert_eq!(frame.checksum, checksum(&payload));
//! assert_eq!(frame.payload, payload);
//! ```

use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 8; // 4 (sequence) + 4 (checksum)

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame sequence number
    pub sequence: u32,
    /// Checksum the frame claims for its payload
    pub checksum: u32,
    /// Payload bytes
    pub payload: Vec<u8>,
}

/// Checksum of a payload: the first four digest bytes as a big-endian `u32`.
pub fn checksum(payload: &[u8]) -> u32 {
    let digest = blake3::hash(payload);
    let bytes = digest.as_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Checks that `payload` hashes to `claimed`.
///
/// # Errors
///
/// `Error::ChecksumMismatch` when the payload no longer matches.
pub fn verify_checksum(claimed: u32, payload: &[u8]) -> Result<()> {
    let actual = checksum(payload);
    if actual == claimed {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            expected: claimed,
            actual,
        })
    }
}

/// Encodes `payload` as frame `sequence`.
pub fn encode(sequence: u32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    encode_into(&mut bytes, sequence, payload);
    bytes
}

/// Encodes into a reusable buffer, replacing its contents.
pub fn encode_into(buf: &mut Vec<u8>, sequence: u32, payload: &[u8]) {
    buf.clear();
    write_header(buf, sequence, checksum(payload));
    buf.extend_from_slice(payload);
}

fn write_header(buf: &mut Vec<u8>, sequence: u32, checksum: u32) {
    buf.extend_from_slice(&sequence.to_be_bytes());
    buf.extend_from_slice(&checksum.to_be_bytes());
}

/// Splits a header into `(sequence, checksum)`.
pub fn parse_header(header: &[u8; HEADER_SIZE]) -> (u32, u32) {
    let sequence = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let checksum = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    (sequence, checksum)
}

/// Decodes one frame carrying `packet_size` payload bytes.
///
/// Bytes past the frame are ignored. The checksum is returned as claimed and
/// is not verified here.
///
/// # Errors
///
/// `Error::MalformedFrame` if fewer than `HEADER_SIZE + packet_size` bytes
/// are available.
pub fn decode(bytes: &[u8], packet_size: usize) -> Result<Frame> {
    let expected = HEADER_SIZE + packet_size;
    if bytes.len() < expected {
        return Err(Error::MalformedFrame {
            expected,
            actual: bytes.len(),
        });
    }

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&bytes[..HEADER_SIZE]);
    let (sequence, checksum) = parse_header(&header);

    Ok(Frame {
        sequence,
        checksum,
        payload: bytes[HEADER_SIZE..expected].to_vec(),
    })
}

/// Reads exactly one frame into `buf`, whose length is the full frame size.
///
/// Short reads are retried until the frame is complete. Returns `Ok(false)`
/// when the peer closed the stream cleanly before the first byte of a frame.
///
/// # Errors
///
/// `Error::MalformedFrame` if the stream ends part way through a frame, or
/// `Error::Io` on a transport failure.
pub async fn read_frame<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(Error::MalformedFrame {
                expected: buf.len(),
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_big_endian() {
        let payload = [0xAAu8; 16];
        let bytes = encode(0x0102_0304, &payload);

        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[4..8], &checksum(&payload).to_be_bytes());
        assert_eq!(&bytes[8..], &payload);
    }

    #[test]
    fn test_decode_inverts_encode() {
        let payload: Vec<u8> = (0..=255).collect();
        for seq in [0u32, 1, 4096, u32::MAX] {
            let frame = decode(&encode(seq, &payload), payload.len()).unwrap();
            assert_eq!(frame.sequence, seq);
            assert_eq!(frame.checksum, checksum(&payload));
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn test_short_frame() {
        let bytes = encode(1, &[0u8; 32]);
        match decode(&bytes[..20], 32) {
            Err(Error::MalformedFrame { expected, actual }) => {
                assert_eq!(expected, 40);
                assert_eq!(actual, 20);
            }
            other => panic!("Expected MalformedFrame, got {:?}", other),
        }
        assert!(decode(&[], 0).is_err());
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut bytes = encode(3, &[5u8; 8]);
        bytes.extend_from_slice(&[9u8; 4]);
        let frame = decode(&bytes, 8).unwrap();
        assert_eq!(frame.payload, vec![5u8; 8]);
    }

    #[test]
    fn test_verify_detects_mutation() {
        let mut frame = decode(&encode(1, &[0u8; 64]), 64).unwrap();
        assert!(verify_checksum(frame.checksum, &frame.payload).is_ok());

        frame.payload[10] ^= 0xFF;
        assert!(matches!(
            verify_checksum(frame.checksum, &frame.payload),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_encode_into_reuses_buffer() {
        let mut buf = encode(1, &[1u8; 8]);
        encode_into(&mut buf, 2, &[2u8; 8]);
        assert_eq!(buf, encode(2, &[2u8; 8]));
    }

    #[tokio::test]
    async fn test_read_frame_clean_eof() {
        let mut reader: &[u8] = &[];
        let mut buf = [0u8; HEADER_SIZE + 4];
        assert!(!read_frame(&mut reader, &mut buf).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_frame_truncated() {
        let bytes = encode(1, &[0u8; 4]);
        let mut reader: &[u8] = &bytes[..5];
        let mut buf = [0u8; HEADER_SIZE + 4];
        match read_frame(&mut reader, &mut buf).await {
            Err(Error::MalformedFrame { expected, actual }) => {
                assert_eq!(expected, 12);
                assert_eq!(actual, 5);
            }
            other => panic!("Expected MalformedFrame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_frame_sequential() {
        let mut stream = encode(0, &[1u8; 4]);
        stream.extend(encode(1, &[2u8; 4]));
        let mut reader: &[u8] = &stream;
        let mut buf = [0u8; HEADER_SIZE + 4];

        assert!(read_frame(&mut reader, &mut buf).await.unwrap());
        assert_eq!(decode(&buf, 4).unwrap().sequence, 0);
        assert!(read_frame(&mut reader, &mut buf).await.unwrap());
        assert_eq!(decode(&buf, 4).unwrap().sequence, 1);
        assert!(!read_frame(&mut reader, &mut buf).await.unwrap());
    }
}
