//! Envelope documents - the message requests carried by ingested files
//!
//! An envelope is a small XML document:
//!
//! ```text
//! <ENVELOP>
//!   <COUNTRYCODE>91</COUNTRYCODE>
//!   <MOBILE>9876543210</MOBILE>
//!   <TEXT>Hello</TEXT>
//!   <PATH>/invoices/0042.pdf</PATH>   (optional)
//! </ENVELOP>
//! ```
//!
//! Producers write these either as UTF-8 or as UTF-16 little-endian with a
//! byte-order mark, so decoding starts by sniffing the leading bytes.

use std::path::PathBuf;

use quick_xml::{Reader, events::Event};
use serde::Deserialize;

use super::client::ChatId;

/// Required root element name
pub const ROOT_ELEMENT: &str = "ENVELOP";

const BOM: char = '\u{FEFF}';

/// Errors produced while decoding an envelope
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
  #[error("Missing <ENVELOP> root element")]
  MissingRoot,
  #[error("Missing required field <{0}>")]
  MissingField(&'static str),
  #[error("Malformed document: {0}")]
  Malformed(String),
}

/// Text encoding detected from a document's leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
  Utf8,
  Utf16Le,
}

impl TextEncoding {
  /// Sniff the encoding: a little-endian byte-order mark means UTF-16 LE,
  /// anything else is treated as UTF-8.
  pub fn detect(bytes: &[u8]) -> Self {
    if bytes.starts_with(&[0xFF, 0xFE]) {
      Self::Utf16Le
    } else {
      Self::Utf8
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      Self::Utf8 => "UTF-8",
      Self::Utf16Le => "UTF-16 LE",
    }
  }
}

/// A decoded message request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
  pub country_code: String,
  pub mobile_number: String,
  pub message_text: String,
  pub attachment_path: Option<PathBuf>,
}

impl Envelope {
  /// Decode raw document bytes into an envelope.
  pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
    let text = decode_text(raw);
    Self::parse(&text)
  }

  /// Parse already-transcoded document text.
  pub fn parse(text: &str) -> Result<Self, DecodeError> {
    let text = text.trim_start_matches(BOM);

    if !has_envelope_root(text)? {
      return Err(DecodeError::MissingRoot);
    }

    let raw: RawEnvelope = quick_xml::de::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let country_code = required(raw.country_code, "COUNTRYCODE")?;
    let mobile_number = required(raw.mobile, "MOBILE")?;
    let message_text = first(raw.text)
      .filter(|t| !t.trim().is_empty())
      .ok_or(DecodeError::MissingField("TEXT"))?;
    let attachment_path = first(raw.path)
      .map(|p| p.trim().to_string())
      .filter(|p| !p.is_empty())
      .map(PathBuf::from);

    Ok(Self {
      country_code,
      mobile_number,
      message_text,
      attachment_path,
    })
  }

  /// Chat identifier of the recipient
  pub fn chat_id(&self, suffix: &str) -> ChatId {
    ChatId::new(&self.country_code, &self.mobile_number, suffix)
  }

  /// Recipient number without the transport suffix (for log lines)
  pub fn recipient(&self) -> String {
    format!("{}{}", self.country_code, self.mobile_number)
  }
}

/// Transcode raw bytes to text according to the detected encoding.
///
/// Invalid sequences are replaced rather than rejected; a leading
/// byte-order mark is stripped.
pub fn decode_text(raw: &[u8]) -> String {
  let text = match TextEncoding::detect(raw) {
    TextEncoding::Utf16Le => {
      let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
      String::from_utf16_lossy(&units)
    }
    TextEncoding::Utf8 => String::from_utf8_lossy(raw).into_owned(),
  };

  match text.strip_prefix(BOM) {
    Some(stripped) => stripped.to_string(),
    None => text,
  }
}

/// Fields are lists so that a repeated element is not an error; the first
/// occurrence wins.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
  #[serde(rename = "COUNTRYCODE", default)]
  country_code: Vec<String>,
  #[serde(rename = "MOBILE", default)]
  mobile: Vec<String>,
  #[serde(rename = "TEXT", default)]
  text: Vec<String>,
  #[serde(rename = "PATH", default)]
  path: Vec<String>,
}

fn first(values: Vec<String>) -> Option<String> {
  values.into_iter().next()
}

fn required(values: Vec<String>, field: &'static str) -> Result<String, DecodeError> {
  first(values)
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
    .ok_or(DecodeError::MissingField(field))
}

/// Check whether the first element of the document is `<ENVELOP>`.
fn has_envelope_root(text: &str) -> Result<bool, DecodeError> {
  let mut reader = Reader::from_str(text);

  loop {
    match reader.read_event() {
      Ok(Event::Start(e)) | Ok(Event::Empty(e)) => return Ok(e.name().as_ref() == ROOT_ELEMENT.as_bytes()),
      Ok(Event::Eof) => return Ok(false),
      Ok(_) => continue,
      Err(e) => return Err(DecodeError::Malformed(e.to_string())),
    }
  }
}
