//! Mcoded7: the 8-to-7-bit coding scheme that carries arbitrary bytes inside
//! a 7-bit-safe SysEx payload.
//!
//! Each group of up to 7 source bytes becomes a leading "high-bits" byte
//! followed by the low 7 bits of each source byte in the group. Bit `6-i` of
//! the leading byte holds the MSB of source byte `i` within the group.

use crate::error::TranscodeError;

const GROUP_LEN: usize = 7;

/// Size in bytes that `encode` will produce for `n` source bytes.
///
/// `ceil(n/7)*8 - (7 - n%7 if n%7 != 0 else 0)`.
pub fn encoded_len(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let full_groups = n / GROUP_LEN;
    let remainder = n % GROUP_LEN;
    if remainder == 0 {
        full_groups * 8
    } else {
        (full_groups + 1) * 8 - (GROUP_LEN - remainder)
    }
}

/// Encode arbitrary bytes into 7-bit-safe Mcoded7 form.
pub fn encode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(src.len()));
    for group in src.chunks(GROUP_LEN) {
        let mut high_bits: u8 = 0;
        for (i, &b) in group.iter().enumerate() {
            if b & 0x80 != 0 {
                high_bits |= 1 << (6 - i);
            }
        }
        out.push(high_bits);
        for &b in group {
            out.push(b & 0x7F);
        }
    }
    out
}

/// Decode Mcoded7-encoded bytes back to the original source bytes.
///
/// Every non-leading byte in the input must be `<= 0x7F`; any violation
/// rejects the whole block (a real device corrupting one byte must not
/// silently desync the rest of the message).
pub fn decode(src: &[u8]) -> Result<Vec<u8>, TranscodeError> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        let high_bits = src[i];
        i += 1;
        let group_len = (src.len() - i).min(GROUP_LEN);
        for j in 0..group_len {
            let data = src[i + j];
            if data & 0x80 != 0 {
                return Err(TranscodeError::NotSevenBitSafe {
                    index: i + j,
                    value: data,
                });
            }
            let msb = (high_bits >> (6 - j)) & 1;
            out.push(data | (msb << 7));
        }
        i += group_len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        for n in [0usize, 1, 6, 7, 8, 13, 14, 15, 100] {
            let src: Vec<u8> = (0..n).map(|i| (i * 37 + 11) as u8).collect();
            let encoded = encode(&src);
            assert_eq!(encoded.len(), encoded_len(n));
            assert!(encoded.iter().all(|&b| b <= 0x7F));
            let decoded = decode(&encoded).expect("decode");
            assert_eq!(decoded, src);
        }
    }

    #[test]
    fn encoded_len_matches_formula_boundaries() {
        assert_eq!(encoded_len(0), 0);
        assert_eq!(encoded_len(1), 2);
        assert_eq!(encoded_len(7), 8);
        assert_eq!(encoded_len(8), 10);
        assert_eq!(encoded_len(14), 16);
        assert_eq!(encoded_len(15), 18);
    }

    #[test]
    fn decode_rejects_high_bit_in_data_byte() {
        let mut bad = encode(b"abcdefg");
        bad[3] |= 0x80;
        let err = decode(&bad).unwrap_err();
        match err {
            TranscodeError::NotSevenBitSafe { index, .. } => assert_eq!(index, 3),
            other => panic!("wrong error variant: {other:?}"),
        }
    }

    #[test]
    fn all_high_bytes_set_round_trips() {
        let src = vec![0xFFu8; 7];
        let encoded = encode(&src);
        assert_eq!(encoded[0], 0x7F);
        assert_eq!(decode(&encoded).unwrap(), src);
    }
}
