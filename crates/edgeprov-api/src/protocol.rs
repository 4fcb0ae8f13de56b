// RouterOS API wire codec
//
// A sentence is a sequence of length-prefixed words terminated by a
// zero-length word. Lengths use a variable 1-5 byte prefix. This module
// frames sentences over a byte stream (`ApiCodec`) and classifies reply
// sentences (`Reply`).

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::Error;

/// Upper bound for a single word; larger prefixes indicate a desynced stream.
const MAX_WORD_LEN: usize = 16 * 1024 * 1024;

/// One protocol sentence, without the terminating empty word.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence {
    pub words: Vec<String>,
}

impl Sentence {
    pub fn new(words: Vec<String>) -> Self {
        Self { words }
    }
}

// ── Length prefix ───────────────────────────────────────────────────

/// Append the encoded length prefix for a word of `len` bytes.
// Each branch is range-checked, so the narrowing casts are exact.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
pub fn encode_length(len: usize, dst: &mut BytesMut) {
    match len {
        0..0x80 => dst.put_u8(len as u8),
        0x80..0x4000 => dst.put_u16((len as u16) | 0x8000),
        0x4000..0x20_0000 => {
            let v = (len as u32) | 0x00C0_0000;
            dst.put_slice(&v.to_be_bytes()[1..]);
        }
        0x20_0000..0x1000_0000 => dst.put_u32((len as u32) | 0xE000_0000),
        _ => {
            dst.put_u8(0xF0);
            dst.put_u32(len as u32);
        }
    }
}

/// Decode a length prefix at the start of `src`.
///
/// Returns `(word_len, prefix_len)`, or `None` if more bytes are needed.
pub fn decode_length(src: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };

    let (prefix_len, mask) = if first & 0x80 == 0 {
        (1, 0x7F)
    } else if first & 0xC0 == 0x80 {
        (2, 0x3F)
    } else if first & 0xE0 == 0xC0 {
        (3, 0x1F)
    } else if first & 0xF0 == 0xE0 {
        (4, 0x0F)
    } else if first == 0xF0 {
        (5, 0x00)
    } else {
        return Err(Error::Protocol(format!(
            "unsupported control byte 0x{first:02X} in length prefix"
        )));
    };

    let Some(prefix) = src.get(..prefix_len) else {
        return Ok(None);
    };

    let mut len = usize::from(first & mask);
    for byte in &prefix[1..] {
        len = (len << 8) | usize::from(*byte);
    }
    Ok(Some((len, prefix_len)))
}

// ── Codec ───────────────────────────────────────────────────────────

/// Frames whole sentences for `tokio_util::codec::Framed`.
#[derive(Debug, Default)]
pub struct ApiCodec;

impl Decoder for ApiCodec {
    type Item = Sentence;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Sentence>, Error> {
        // Scan without consuming until a full sentence is buffered.
        let mut offset = 0;
        let mut spans = Vec::new();
        loop {
            let Some((len, prefix)) = decode_length(&src[offset..])? else {
                return Ok(None);
            };
            if len > MAX_WORD_LEN {
                return Err(Error::Protocol(format!("word of {len} bytes exceeds limit")));
            }
            let start = offset + prefix;
            if len == 0 {
                let frame = src.split_to(start);
                let words = spans
                    .into_iter()
                    .map(|(s, l)| decode_word(&frame[s..s + l]))
                    .collect();
                return Ok(Some(Sentence::new(words)));
            }
            if src.len() < start + len {
                src.reserve(start + len - src.len());
                return Ok(None);
            }
            spans.push((start, len));
            offset = start + len;
        }
    }
}

/// Words are UTF-8 on current RouterOS, but comments written through
/// older tools can carry legacy code pages. Those bytes become U+FFFD and
/// the word is logged, so reconciliation against it is visibly inexact.
fn decode_word(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(word) => word.to_owned(),
        Err(err) => {
            let lossy = String::from_utf8_lossy(bytes).into_owned();
            warn!(
                valid_up_to = err.valid_up_to(),
                len = bytes.len(),
                word = %lossy,
                "non-UTF-8 word from device, invalid bytes replaced"
            );
            lossy
        }
    }
}

impl Encoder<Sentence> for ApiCodec {
    type Error = Error;

    fn encode(&mut self, item: Sentence, dst: &mut BytesMut) -> Result<(), Error> {
        for word in &item.words {
            encode_length(word.len(), dst);
            dst.put_slice(word.as_bytes());
        }
        dst.put_u8(0);
        Ok(())
    }
}

// ── Replies ─────────────────────────────────────────────────────────

/// A classified reply sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `!re`: one data row.
    Row(BTreeMap<String, String>),
    /// `!done`: end of the reply; may carry `ret`.
    Done(BTreeMap<String, String>),
    /// `!trap`: the command failed; a `!done` still follows.
    Trap {
        category: Option<u32>,
        message: String,
    },
    /// `!fatal`: the device is closing the connection.
    Fatal(String),
}

impl Reply {
    pub fn parse(sentence: Sentence) -> Result<Self, Error> {
        let mut words = sentence.words.into_iter();
        let Some(head) = words.next() else {
            return Err(Error::Protocol("empty reply sentence".into()));
        };

        if head == "!fatal" {
            let message = words.collect::<Vec<_>>().join(" ");
            return Ok(Self::Fatal(message));
        }

        let attrs = parse_attributes(words);
        match head.as_str() {
            "!re" => Ok(Self::Row(attrs)),
            "!done" => Ok(Self::Done(attrs)),
            "!trap" => Ok(Self::Trap {
                category: attrs.get("category").and_then(|c| c.parse().ok()),
                message: attrs.get("message").cloned().unwrap_or_default(),
            }),
            other => Err(Error::Protocol(format!("unexpected reply word: {other}"))),
        }
    }
}

/// Parse `=key=value` words; `.tag` and unknown word shapes are dropped.
fn parse_attributes(words: impl Iterator<Item = String>) -> BTreeMap<String, String> {
    words
        .filter_map(|word| {
            let rest = word.strip_prefix('=')?;
            let (key, value) = rest.split_once('=').unwrap_or((rest, ""));
            Some((key.to_owned(), value.to_owned()))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encoded_len(len: usize) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_length(len, &mut buf);
        buf.to_vec()
    }

    #[test]
    fn length_prefix_boundaries() {
        assert_eq!(encoded_len(0x7F), vec![0x7F]);
        assert_eq!(encoded_len(0x80), vec![0x80, 0x80]);
        assert_eq!(encoded_len(0x3FFF), vec![0xBF, 0xFF]);
        assert_eq!(encoded_len(0x4000), vec![0xC0, 0x40, 0x00]);
        assert_eq!(encoded_len(0x20_0000), vec![0xE0, 0x20, 0x00, 0x00]);
        assert_eq!(encoded_len(0x1000_0000), vec![0xF0, 0x10, 0x00, 0x00, 0x00]);

        for len in [0, 1, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000] {
            let bytes = encoded_len(len);
            let decoded = decode_length(&bytes).unwrap();
            assert_eq!(decoded, Some((len, bytes.len())), "len {len}");
        }
    }

    #[test]
    fn rejects_control_bytes() {
        assert!(decode_length(&[0xF8]).is_err());
    }

    #[test]
    fn decodes_sentence_across_partial_reads() {
        let mut codec = ApiCodec;
        let mut wire = BytesMut::new();
        codec
            .encode(
                Sentence::new(vec!["!re".into(), "=name=pool1".into()]),
                &mut wire,
            )
            .unwrap();
        codec
            .encode(Sentence::new(vec!["!done".into()]), &mut wire)
            .unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&wire[..5]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&wire[5..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.words, vec!["!re", "=name=pool1"]);
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.words, vec!["!done"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn legacy_bytes_are_replaced_without_desyncing() {
        let mut buf = BytesMut::new();
        for word in [&b"!re"[..], &b"=comment=Se\xf1al"[..], &b"=name=wan"[..]] {
            encode_length(word.len(), &mut buf);
            buf.extend_from_slice(word);
        }
        encode_length(0, &mut buf);

        let sentence = ApiCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(sentence.words, vec!["!re", "=comment=Se\u{FFFD}al", "=name=wan"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn classifies_replies() {
        let row = Reply::parse(Sentence::new(vec![
            "!re".into(),
            "=.id=*1".into(),
            "=comment=a=b".into(),
            "=disabled=".into(),
        ]))
        .unwrap();
        let Reply::Row(attrs) = row else {
            panic!("expected row");
        };
        assert_eq!(attrs["comment"], "a=b");
        assert_eq!(attrs["disabled"], "");

        let trap = Reply::parse(Sentence::new(vec![
            "!trap".into(),
            "=category=1".into(),
            "=message=failure: already have such name".into(),
        ]))
        .unwrap();
        assert_eq!(
            trap,
            Reply::Trap {
                category: Some(1),
                message: "failure: already have such name".into()
            }
        );

        let fatal = Reply::parse(Sentence::new(vec!["!fatal".into(), "session terminated".into()]))
            .unwrap();
        assert_eq!(fatal, Reply::Fatal("session terminated".into()));
    }
}
