//! ICY (SHOUTcast) metadata framing for the flow endpoint.
//!
//! When a client sends `Icy-MetaData: 1`, the response interleaves a
//! metadata block after every `metaint` audio bytes: one length byte
//! (count of 16-byte units) followed by `StreamTitle='…';` zero-padded to
//! a multiple of 16 bytes.

use bytes::Bytes;

/// Metadata interval for lossless output; large enough that the in-band
/// overhead stays negligible at high bitrates.
pub const ICY_METAINT_LOSSLESS: usize = 65536;

/// Metadata interval for lossy output.
pub const ICY_METAINT_LOSSY: usize = 8192;

/// Title used when the queue has no current item (or none with a name).
pub const DEFAULT_STREAM_TITLE: &str = "Music Assistant";

/// Longest title embedded in a metadata block; the single length byte caps
/// a block at 255 × 16 payload bytes.
const MAX_TITLE_BYTES: usize = 1024;

/// Builds one ICY metadata block for the given stream title.
pub fn format_icy_metadata(title: &str) -> Bytes {
    let mut safe_title = String::new();
    for c in title.chars() {
        if safe_title.len() + c.len_utf8() > MAX_TITLE_BYTES {
            break;
        }
        safe_title.push(c);
    }

    let mut payload = format!("StreamTitle='{safe_title}';").into_bytes();
    while payload.len() % 16 != 0 {
        payload.push(0);
    }

    let mut block = Vec::with_capacity(1 + payload.len());
    block.push((payload.len() / 16) as u8);
    block.extend_from_slice(&payload);
    Bytes::from(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_shape() {
        let block = format_icy_metadata("Artist - Title");
        let length_byte = block[0] as usize;
        assert_eq!(block.len(), 1 + length_byte * 16);
        assert!(block[1..].starts_with(b"StreamTitle='Artist - Title';"));
    }

    #[test]
    fn test_padding_is_zeroes() {
        let block = format_icy_metadata("x");
        let payload_text = b"StreamTitle='x';".len();
        for &byte in &block[1 + payload_text..] {
            assert_eq!(byte, 0);
        }
    }

    #[test]
    fn test_exact_multiple_needs_no_padding() {
        // StreamTitle='';  is 15 bytes; a 1-char title makes it 16.
        let block = format_icy_metadata("x");
        assert_eq!(block[0], 1);
        assert_eq!(block.len(), 17);
    }

    #[test]
    fn test_empty_title() {
        let block = format_icy_metadata("");
        assert_eq!(block[0], 1);
        assert_eq!(&block[1..16], b"StreamTitle='';");
        assert_eq!(block[16], 0);
    }

    #[test]
    fn test_long_title_is_truncated_to_valid_block() {
        let long = "é".repeat(4000);
        let block = format_icy_metadata(&long);
        let length_byte = block[0] as usize;
        assert!(length_byte <= 255);
        assert_eq!(block.len(), 1 + length_byte * 16);
        // Truncation must not split the multi-byte character.
        let text_end = block[1..].iter().position(|&b| b == 0).unwrap_or(block.len() - 1);
        assert!(std::str::from_utf8(&block[1..1 + text_end]).is_ok());
    }
}
