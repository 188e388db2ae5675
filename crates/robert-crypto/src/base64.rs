use base64ct::{Base64, Encoding};

/// Standard (padded) base64 encode, as used by every ROBERT JSON field.
pub fn base64_encode(data: &[u8]) -> String {
    Base64::encode_string(data)
}

/// Standard (padded) base64 decode.
pub fn base64_decode(s: &str) -> Result<Vec<u8>, base64ct::Error> {
    Base64::decode_vec(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data = b"Hello, World!";
        let encoded = base64_encode(data);
        let decoded = base64_decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn padded_output() {
        assert_eq!(base64_encode(b"ab"), "YWI=");
    }

    #[test]
    fn standard_alphabet() {
        // Bytes that produce + and / in the standard alphabet
        let encoded = base64_encode(&[0xfb, 0xff, 0xfe]);
        assert_eq!(encoded, "+//+");
    }

    #[test]
    fn rejects_garbage() {
        assert!(base64_decode("not base64!").is_err());
    }

    #[test]
    fn empty_input() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_decode("").unwrap(), Vec::<u8>::new());
    }
}
