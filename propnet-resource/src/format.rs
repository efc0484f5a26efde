//! Content formats and negotiation

use std::fmt;

/// Response and request body encodings
///
/// Discriminants are the registered CoAP content-format numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ContentFormat {
    /// JSON-shaped text with no media type promise
    TextPlain = 0,
    /// RFC 6690 link listing
    LinkFormat = 40,
    Json = 50,
    Cbor = 60,
}

impl ContentFormat {
    /// Encodings a single property value can be served in, in preference order
    pub const VALUE_FORMATS: [ContentFormat; 3] =
        [ContentFormat::Cbor, ContentFormat::Json, ContentFormat::TextPlain];

    pub fn id(&self) -> u16 {
        *self as u16
    }

    pub fn from_id(id: u16) -> Option<ContentFormat> {
        match id {
            0 => Some(ContentFormat::TextPlain),
            40 => Some(ContentFormat::LinkFormat),
            50 => Some(ContentFormat::Json),
            60 => Some(ContentFormat::Cbor),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ContentFormat::TextPlain => "text/plain; charset=utf-8",
            ContentFormat::LinkFormat => "application/link-format",
            ContentFormat::Json => "application/json",
            ContentFormat::Cbor => "application/cbor",
        }
    }

    /// Match a MIME type, ignoring parameters and case
    pub fn from_mime(mime: &str) -> Option<ContentFormat> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        [
            ContentFormat::TextPlain,
            ContentFormat::LinkFormat,
            ContentFormat::Json,
            ContentFormat::Cbor,
        ]
        .into_iter()
        .find(|format| {
            let own = format.mime().split(';').next().unwrap_or_default();
            own.eq_ignore_ascii_case(essence)
        })
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// A media type as named by a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    Known(ContentFormat),
    /// Anything this crate does not speak, kept for diagnostics
    Unknown(String),
}

impl MediaType {
    pub fn parse(mime: &str) -> MediaType {
        match ContentFormat::from_mime(mime) {
            Some(format) => MediaType::Known(format),
            None => MediaType::Unknown(mime.trim().to_string()),
        }
    }

    pub fn format(&self) -> Option<ContentFormat> {
        match self {
            MediaType::Known(format) => Some(*format),
            MediaType::Unknown(_) => None,
        }
    }
}

impl From<ContentFormat> for MediaType {
    fn from(format: ContentFormat) -> Self {
        MediaType::Known(format)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Known(format) => format.fmt(f),
            MediaType::Unknown(mime) => f.write_str(mime),
        }
    }
}

/// What a read is serving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Section,
    Trait,
    Property,
}

/// Pick the response encoding for a read
///
/// No preference means plain text. Link listings are only offered for whole
/// sections. `None` means the request must be answered "not acceptable".
pub fn negotiate(accept: Option<&MediaType>, target: Target) -> Option<ContentFormat> {
    let format = match accept {
        None => return Some(ContentFormat::TextPlain),
        Some(media) => media.format()?,
    };

    match format {
        ContentFormat::LinkFormat if target != Target::Section => None,
        format => Some(format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("application/json", Some(ContentFormat::Json))]
    #[case("Application/CBOR", Some(ContentFormat::Cbor))]
    #[case("text/plain", Some(ContentFormat::TextPlain))]
    #[case("text/plain; charset=utf-8", Some(ContentFormat::TextPlain))]
    #[case("application/link-format", Some(ContentFormat::LinkFormat))]
    #[case("application/xml", None)]
    fn test_from_mime(#[case] mime: &str, #[case] expected: Option<ContentFormat>) {
        assert_eq!(ContentFormat::from_mime(mime), expected);
    }

    #[test]
    fn test_ids_round_trip() {
        for format in [
            ContentFormat::TextPlain,
            ContentFormat::LinkFormat,
            ContentFormat::Json,
            ContentFormat::Cbor,
        ] {
            assert_eq!(ContentFormat::from_id(format.id()), Some(format));
        }
        assert_eq!(ContentFormat::from_id(41), None);
    }

    #[rstest]
    #[case(None, Target::Section, Some(ContentFormat::TextPlain))]
    #[case(None, Target::Property, Some(ContentFormat::TextPlain))]
    #[case(Some(MediaType::Known(ContentFormat::Cbor)), Target::Property, Some(ContentFormat::Cbor))]
    #[case(Some(MediaType::Known(ContentFormat::LinkFormat)), Target::Section, Some(ContentFormat::LinkFormat))]
    #[case(Some(MediaType::Known(ContentFormat::LinkFormat)), Target::Trait, None)]
    #[case(Some(MediaType::Known(ContentFormat::LinkFormat)), Target::Property, None)]
    #[case(Some(MediaType::Unknown("image/png".into())), Target::Section, None)]
    fn test_negotiate(
        #[case] accept: Option<MediaType>,
        #[case] target: Target,
        #[case] expected: Option<ContentFormat>,
    ) {
        assert_eq!(negotiate(accept.as_ref(), target), expected);
    }
}
