//! RFC 4648 Base32 (パディングなし)
//!
//! TOTPシークレットの表現に使用する。

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// バイト列をBase32（大文字、パディングなし）にエンコード
pub fn encode(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for &byte in bytes {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            output.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }

    // 残りビットは右側をゼロ埋めして1文字に
    if bits > 0 {
        output.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }

    output
}

/// Base32テキストをバイト列にデコード
///
/// アルファベット外の文字（空白、ハイフン、`=` など）は読み飛ばす。
/// 小文字は大文字として扱う。
pub fn decode(text: &str) -> Vec<u8> {
    let mut output = Vec::with_capacity(text.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for c in text.bytes() {
        let Some(value) = symbol_value(c) else {
            continue;
        };
        buffer = (buffer << 5) | u32::from(value);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            output.push((buffer >> bits) as u8);
        }
    }

    output
}

fn symbol_value(c: u8) -> Option<u8> {
    match c.to_ascii_uppercase() {
        c @ b'A'..=b'Z' => Some(c - b'A'),
        c @ b'2'..=b'7' => Some(c - b'2' + 26),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn test_encode_rfc4648_vectors() {
        assert_eq!(encode(b""), "");
        assert_eq!(encode(b"f"), "MY");
        assert_eq!(encode(b"fo"), "MZXQ");
        assert_eq!(encode(b"foo"), "MZXW6");
        assert_eq!(encode(b"foob"), "MZXW6YQ");
        assert_eq!(encode(b"fooba"), "MZXW6YTB");
        assert_eq!(encode(b"foobar"), "MZXW6YTBOI");
    }

    #[test]
    fn test_decode_rfc4648_vectors() {
        assert_eq!(decode("MZXW6YTBOI"), b"foobar");
        assert_eq!(decode("MZXW6YQ"), b"foob");
        assert_eq!(decode("MY======"), b"f");
    }

    #[test]
    fn test_decode_skips_separators_and_lowercase() {
        let expected = b"Hello!\xDE\xAD\xBE\xEF".to_vec();
        assert_eq!(decode("JBSWY3DPEHPK3PXP"), expected);
        assert_eq!(decode("jbsw y3dp-ehpk 3pxp"), expected);
        // アルファベット外の '0', '1', '8' は無視される
        assert_eq!(decode("JBSW0Y3DP1EHPK83PXP"), expected);
    }

    #[test]
    fn test_round_trip_random_buffers() {
        let mut rng = rand::thread_rng();
        for len in 10..=64 {
            let mut bytes = vec![0u8; len];
            rng.fill_bytes(&mut bytes);
            let encoded = encode(&bytes);
            assert!(encoded.bytes().all(|c| ALPHABET.contains(&c)));
            assert_eq!(decode(&encoded), bytes, "len = {}", len);
        }
    }
}
