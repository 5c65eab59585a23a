//! Closed variants for a payload unit's content type and transfer encoding.

use serde::Serialize;

/// What kind of content a payload unit carries.
///
/// `Undefined` means neither the headers nor the body patterns said anything
/// useful; callers treat it as "assume plain UTF-8 text".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    PlainText,
    HtmlText,
    Undefined,
}

impl ContentType {
    /// MIME type written when a unit has no `Content-Type` header of its own.
    pub fn default_mime(self) -> &'static str {
        match self {
            Self::HtmlText => "text/html",
            Self::PlainText | Self::Undefined => "text/plain",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::PlainText => "plain text",
            Self::HtmlText => "html",
            Self::Undefined => "undefined",
        };
        f.write_str(label)
    }
}

/// Content-Transfer-Encoding of a payload unit.
///
/// `Identity` covers `7bit`, `8bit`, `binary` and the undetected case: the
/// raw bytes are already the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferEncoding {
    Base64,
    QuotedPrintable,
    Identity,
}

impl TransferEncoding {
    /// The `Content-Transfer-Encoding` token for this encoding, if it has one.
    pub fn header_token(self) -> Option<&'static str> {
        match self {
            Self::Base64 => Some("base64"),
            Self::QuotedPrintable => Some("quoted-printable"),
            Self::Identity => None,
        }
    }
}

impl std::fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::Identity => "identity",
        };
        f.write_str(label)
    }
}
