// src/utils/string_encoding.rs

/// Decode a UTF-16LE byte run, dropping an odd trailing byte and any NUL padding.
pub fn decode_utf16le_lossy(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}

pub fn encode_utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_round_trip() {
        let encoded = encode_utf16le("Main Data");
        assert_eq!(encoded.len(), 18);
        assert_eq!(decode_utf16le_lossy(&encoded), "Main Data");
    }
}
