use std::io::{self, BufRead, BufReader, Read};

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

pub(crate) type BodyReader<'a> = Box<dyn Read + Send + 'a>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
    Identity,
}

impl ContentEncoding {
    /// Exact, case-insensitive match; anything unrecognised is passed through.
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value.map(str::trim) else {
            return Self::Identity;
        };
        if value.eq_ignore_ascii_case("gzip") {
            Self::Gzip
        } else if value.eq_ignore_ascii_case("deflate") {
            Self::Deflate
        } else {
            Self::Identity
        }
    }
}

/// Wraps `body` in the decompressor selected by the `Content-Encoding` value.
///
/// `deflate` bodies are accepted both zlib-wrapped and raw, since servers
/// disagree on which one the token means.
pub fn decode_content_encoding<'a>(
    encoding: Option<&str>,
    body: BodyReader<'a>,
) -> io::Result<BodyReader<'a>> {
    match ContentEncoding::from_header(encoding) {
        ContentEncoding::Identity => Ok(body),
        ContentEncoding::Gzip => Ok(Box::new(GzDecoder::new(body))),
        ContentEncoding::Deflate => {
            let mut buffered = BufReader::new(body);
            let zlib_wrapped = has_zlib_header(buffered.fill_buf()?);
            if zlib_wrapped {
                Ok(Box::new(ZlibDecoder::new(buffered)))
            } else {
                Ok(Box::new(DeflateDecoder::new(buffered)))
            }
        }
    }
}

#[derive(Debug)]
pub(crate) enum LimitedReadError {
    Io(io::Error),
    TooLarge { actual_bytes: usize },
}

pub(crate) fn read_to_end_limited<R: Read>(
    reader: &mut R,
    max_bytes: usize,
) -> Result<Vec<u8>, LimitedReadError> {
    let mut decoded = Vec::new();
    let mut chunk = [0_u8; 8 * 1024];

    loop {
        let read = match reader.read(&mut chunk) {
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(LimitedReadError::Io(error)),
        };
        if read == 0 {
            break;
        }
        let next_size = decoded.len().saturating_add(read);
        if next_size > max_bytes {
            return Err(LimitedReadError::TooLarge {
                actual_bytes: next_size,
            });
        }
        decoded.extend_from_slice(&chunk[..read]);
    }

    Ok(decoded)
}

/// Reads at most `max_bytes`; the flag reports whether more data followed.
pub(crate) fn read_prefix<R: Read>(reader: R, max_bytes: usize) -> io::Result<(Vec<u8>, bool)> {
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let mut prefix = Vec::new();
    reader.take(limit).read_to_end(&mut prefix)?;
    let cut = prefix.len() > max_bytes;
    prefix.truncate(max_bytes);
    Ok((prefix, cut))
}

fn has_zlib_header(prefix: &[u8]) -> bool {
    let [cmf, flg, ..] = prefix else {
        return false;
    };
    cmf & 0x0f == 8 && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Charset {
    #[default]
    Utf8,
    UsAscii,
    Latin1,
    Utf16Be,
    Utf16Le,
    Utf16,
}

impl Charset {
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().trim_matches(|c: char| c == '"' || c == '\'').trim();
        let normalized = label.to_ascii_lowercase();
        let charset = match normalized.as_str() {
            "utf-8" | "utf8" => Self::Utf8,
            "us-ascii" | "ascii" | "iso646-us" => Self::UsAscii,
            "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "latin1" | "l1" => Self::Latin1,
            "utf-16be" => Self::Utf16Be,
            "utf-16le" => Self::Utf16Le,
            "utf-16" => Self::Utf16,
            _ => return None,
        };
        Some(charset)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::UsAscii => "US-ASCII",
            Self::Latin1 => "ISO-8859-1",
            Self::Utf16Be => "UTF-16BE",
            Self::Utf16Le => "UTF-16LE",
            Self::Utf16 => "UTF-16",
        }
    }

    /// Lossy decode; invalid sequences become U+FFFD.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::UsAscii => bytes
                .iter()
                .map(|&byte| if byte.is_ascii() { char::from(byte) } else { '\u{FFFD}' })
                .collect(),
            Self::Latin1 => bytes.iter().map(|&byte| char::from(byte)).collect(),
            Self::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
            Self::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
            Self::Utf16 => match bytes {
                [0xff, 0xfe, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
                [0xfe, 0xff, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
                _ => decode_utf16(bytes, u16::from_be_bytes),
            },
        }
    }
}

impl std::fmt::Display for Charset {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.name())
    }
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> String {
    let units = bytes
        .chunks(2)
        .map(|pair| match pair {
            [high, low] => to_unit([*high, *low]),
            _ => 0xFFFD,
        })
        .collect::<Vec<_>>();
    String::from_utf16_lossy(&units)
}

/// Picks the charset named by the `charset=` parameter of a content type.
///
/// The last `charset` parameter wins; unknown or malformed values fall back.
pub fn resolve_charset(content_type: Option<&str>, fallback: Charset) -> Charset {
    let Some(content_type) = content_type else {
        return fallback;
    };
    content_type
        .split(';')
        .skip(1)
        .filter_map(|parameter| parameter.split_once('='))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .last()
        .and_then(|(_, value)| Charset::from_label(value))
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use flate2::Compression;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};

    use super::{
        Charset, ContentEncoding, LimitedReadError, decode_content_encoding, read_prefix,
        read_to_end_limited, resolve_charset,
    };

    fn decode_all(encoding: Option<&str>, body: Vec<u8>) -> Vec<u8> {
        let mut reader = decode_content_encoding(encoding, Box::new(std::io::Cursor::new(body)))
            .expect("decoder should build");
        let mut decoded = Vec::new();
        reader
            .read_to_end(&mut decoded)
            .expect("body should decode");
        decoded
    }

    #[test]
    fn gzip_body_decodes_to_plain_text() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello").expect("write gzip");
        let compressed = encoder.finish().expect("finish gzip");

        assert_eq!(decode_all(Some("GZIP"), compressed), b"hello");
    }

    #[test]
    fn deflate_accepts_zlib_and_raw_streams() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(b"wrapped").expect("write zlib");
        assert_eq!(
            decode_all(Some("deflate"), zlib.finish().expect("finish zlib")),
            b"wrapped"
        );

        let mut raw = DeflateEncoder::new(Vec::new(), Compression::default());
        raw.write_all(b"raw").expect("write deflate");
        assert_eq!(
            decode_all(Some("Deflate"), raw.finish().expect("finish deflate")),
            b"raw"
        );
    }

    #[test]
    fn unknown_encodings_pass_through() {
        assert_eq!(ContentEncoding::from_header(Some("br")), ContentEncoding::Identity);
        assert_eq!(ContentEncoding::from_header(Some("gzip, br")), ContentEncoding::Identity);
        assert_eq!(decode_all(Some("br"), b"as-is".to_vec()), b"as-is");
        assert_eq!(decode_all(None, b"as-is".to_vec()), b"as-is");
    }

    #[test]
    fn resolve_charset_reads_charset_parameter() {
        assert_eq!(
            resolve_charset(Some("text/plain; charset=ISO-8859-1"), Charset::Utf8),
            Charset::Latin1
        );
        assert_eq!(
            resolve_charset(Some("text/plain;CHARSET=\"utf-16le\""), Charset::Utf8),
            Charset::Utf16Le
        );
    }

    #[test]
    fn resolve_charset_last_parameter_wins() {
        assert_eq!(
            resolve_charset(
                Some("text/plain; charset=us-ascii; charset=latin1"),
                Charset::Utf8
            ),
            Charset::Latin1
        );
    }

    #[test]
    fn resolve_charset_falls_back_on_missing_or_malformed_values() {
        assert_eq!(resolve_charset(Some("application/json"), Charset::Utf8), Charset::Utf8);
        assert_eq!(resolve_charset(Some("text/plain; charset="), Charset::Utf8), Charset::Utf8);
        assert_eq!(
            resolve_charset(Some("text/plain; charset=klingon"), Charset::Utf8),
            Charset::Utf8
        );
        assert_eq!(resolve_charset(Some(";;;=;"), Charset::Latin1), Charset::Latin1);
        assert_eq!(resolve_charset(None, Charset::Utf8), Charset::Utf8);
    }

    #[test]
    fn latin1_and_utf16_decode() {
        assert_eq!(Charset::Latin1.decode(&[0x63, 0x61, 0x66, 0xe9]), "café");
        assert_eq!(Charset::Utf16.decode(&[0xff, 0xfe, 0x68, 0x00, 0x69, 0x00]), "hi");
        assert_eq!(Charset::UsAscii.decode(&[0x61, 0xff]), "a\u{FFFD}");
    }

    #[test]
    fn limited_read_stops_a_gzip_bomb() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&vec![0_u8; 1024 * 1024]).expect("write gzip");
        let compressed = encoder.finish().expect("finish gzip");
        assert!(compressed.len() < 16 * 1024);

        let mut reader =
            decode_content_encoding(Some("gzip"), Box::new(std::io::Cursor::new(compressed)))
                .expect("decoder should build");
        match read_to_end_limited(&mut reader, 64 * 1024) {
            Err(LimitedReadError::TooLarge { actual_bytes }) => {
                assert!(actual_bytes > 64 * 1024);
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn read_prefix_reports_cut() {
        let (prefix, cut) = read_prefix(&b"abcdef"[..], 4).expect("prefix");
        assert_eq!(prefix, b"abcd");
        assert!(cut);

        let (prefix, cut) = read_prefix(&b"abc"[..], 4).expect("prefix");
        assert_eq!(prefix, b"abc");
        assert!(!cut);
    }
}
