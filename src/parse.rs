use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::content_encoding::{Charset, resolve_charset};
use crate::error::ParseError;

#[derive(Clone, Debug)]
pub struct ResponseBody {
    status: u16,
    content_type: Option<String>,
    bytes: Bytes,
    default_charset: Charset,
}

impl ResponseBody {
    pub fn new(
        status: u16,
        content_type: Option<String>,
        bytes: Bytes,
        default_charset: Charset,
    ) -> Self {
        Self {
            status,
            content_type,
            bytes,
            default_charset,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn charset(&self) -> Charset {
        resolve_charset(self.content_type(), self.default_charset)
    }

    pub fn text(&self) -> String {
        self.charset().decode(&self.bytes)
    }
}

pub trait ResponseParser<T>: Send + Sync {
    fn parse(&self, body: &ResponseBody) -> Result<T, ParseError>;
}

impl<T, F> ResponseParser<T> for F
where
    F: Fn(&ResponseBody) -> Result<T, ParseError> + Send + Sync,
{
    fn parse(&self, body: &ResponseBody) -> Result<T, ParseError> {
        self(body)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TextParser;

impl ResponseParser<String> for TextParser {
    fn parse(&self, body: &ResponseBody) -> Result<String, ParseError> {
        Ok(body.text())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BytesParser;

impl ResponseParser<Bytes> for BytesParser {
    fn parse(&self, body: &ResponseBody) -> Result<Bytes, ParseError> {
        Ok(body.bytes().clone())
    }
}

pub struct JsonParser<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonParser<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonParser<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("JsonParser")
    }
}

impl<T> ResponseParser<T> for JsonParser<T>
where
    T: DeserializeOwned,
{
    fn parse(&self, body: &ResponseBody) -> Result<T, ParseError> {
        match body.charset() {
            Charset::Utf8 | Charset::UsAscii => Ok(serde_json::from_slice(body.bytes())?),
            _ => Ok(serde_json::from_str(&body.text())?),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde::Deserialize;

    use super::{JsonParser, ResponseBody, ResponseParser, TextParser};
    use crate::content_encoding::Charset;
    use crate::error::ParseError;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
    }

    fn body(content_type: &str, bytes: &'static [u8]) -> ResponseBody {
        ResponseBody::new(
            200,
            Some(content_type.to_owned()),
            Bytes::from_static(bytes),
            Charset::Utf8,
        )
    }

    #[test]
    fn json_parser_reads_object() {
        let parsed: Sample = JsonParser::new()
            .parse(&body("application/json", br#"{"a":1}"#))
            .expect("json should parse");
        assert_eq!(parsed, Sample { a: 1 });
    }

    #[test]
    fn json_parser_reports_invalid_body() {
        let error = JsonParser::<Sample>::new()
            .parse(&body("application/json", b"{"))
            .expect_err("truncated json should fail");
        assert!(error.message().starts_with("invalid json body"));
    }

    #[test]
    fn text_parser_honours_declared_charset() {
        let text = TextParser
            .parse(&body("text/plain; charset=ISO-8859-1", &[0x6e, 0xe9]))
            .expect("text");
        assert_eq!(text, "né");
    }

    #[test]
    fn closures_are_parsers() {
        let parser = |body: &ResponseBody| -> Result<usize, ParseError> { Ok(body.bytes().len()) };
        assert_eq!(parser.parse(&body("text/plain", b"four")).expect("len"), 4);
    }
}
