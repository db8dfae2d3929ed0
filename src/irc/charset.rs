//! Conversion between socket bytes and text.
//!
//! UTF-8 networks skip conversion entirely; anything else goes through an
//! `encoding_rs` codec. Neither direction can fail: undecodable input becomes
//! U+FFFD and characters the codec cannot represent are sent as `?`.

use encoding_rs::{EncoderResult, Encoding, UTF_8};

#[derive(Debug, Clone, Copy)]
pub struct Charset {
    /// `None` for UTF-8.
    codec: Option<&'static Encoding>,
}

impl Default for Charset {
    fn default() -> Self {
        Self { codec: None }
    }
}

impl Charset {
    pub fn for_label(label: &str) -> Self {
        match Encoding::for_label(label.trim().as_bytes()) {
            Some(encoding) if encoding == UTF_8 => Self::default(),
            Some(encoding) => Self {
                codec: Some(encoding),
            },
            None => {
                tracing::warn!(encoding = label, "unknown encoding, falling back to UTF-8");
                Self::default()
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.codec.unwrap_or(UTF_8).name()
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self.codec {
            None => String::from_utf8_lossy(bytes).into_owned(),
            Some(codec) => codec.decode_without_bom_handling(bytes).0.into_owned(),
        }
    }

    pub fn encode(&self, text: &str) -> Vec<u8> {
        let Some(codec) = self.codec else {
            return text.as_bytes().to_vec();
        };

        let mut encoder = codec.output_encoding().new_encoder();
        let mut out = Vec::with_capacity(text.len());
        let mut rest = text;
        loop {
            let capacity = encoder
                .max_buffer_length_from_utf8_without_replacement(rest.len())
                .unwrap_or(rest.len() * 4 + 16);
            let mut buf = vec![0u8; capacity.max(16)];
            let (result, read, written) =
                encoder.encode_from_utf8_without_replacement(rest, &mut buf, true);
            out.extend_from_slice(&buf[..written]);
            rest = &rest[read..];
            match result {
                EncoderResult::InputEmpty => break,
                EncoderResult::OutputFull => continue,
                EncoderResult::Unmappable(_) => out.push(b'?'),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_passthrough_and_lossy_decode() {
        let charset = Charset::for_label("UTF-8");
        assert_eq!(charset.name(), "UTF-8");
        assert_eq!(charset.encode("héllo ☃"), "héllo ☃".as_bytes());
        assert_eq!(charset.decode(b"ab\xffc"), "ab\u{FFFD}c");
    }

    #[test]
    fn test_latin1_round_trip() {
        let charset = Charset::for_label("ISO-8859-1");
        assert_eq!(charset.decode(b"caf\xe9"), "café");
        assert_eq!(charset.encode("café"), b"caf\xe9");
    }

    #[test]
    fn test_unencodable_becomes_question_mark() {
        let charset = Charset::for_label("latin1");
        assert_eq!(charset.encode("snow ☃ man"), b"snow ? man");
    }

    #[test]
    fn test_invalid_bytes_are_substituted() {
        let charset = Charset::for_label("Shift_JIS");
        let decoded = charset.decode(b"ok\x81");
        assert!(decoded.starts_with("ok"));
        assert!(decoded.contains('\u{FFFD}'));
    }

    #[test]
    fn test_unknown_label_is_utf8() {
        assert_eq!(Charset::for_label("klingon").name(), "UTF-8");
    }
}
