use std::fmt;
use std::net::Ipv4Addr;

use reqwest::Url;

const NAMED_ENTITIES: &[(&str, char)] = &[
    ("amp", '&'),
    ("lt", '<'),
    ("gt", '>'),
    ("quot", '"'),
    ("apos", '\''),
    ("nbsp", '\u{a0}'),
    ("ndash", '\u{2013}'),
    ("mdash", '\u{2014}'),
];

/// Cache key for one checkable URL. The fragment is always stripped; two
/// URLs differing only in fragment are the same check target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalUrl(Url);

impl CanonicalUrl {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlReject {
    Unparsable,
    UnsupportedScheme,
    MissingHost,
    Localhost,
    BareHostname,
    LoopbackAddress,
}

impl UrlReject {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unparsable => "unable to parse URL",
            Self::UnsupportedScheme => "scheme is not http or https",
            Self::MissingHost => "URL has no host",
            Self::Localhost => "localhost is not checkable",
            Self::BareHostname => "hostname contains no dot",
            Self::LoopbackAddress => "loopback address is not checkable",
        }
    }
}

// A free link pasted directly against a template parses as one URL node; the
// template text rides along inside the URL. The caller re-inserts the split
// remainder next to the link regardless of whether the URL itself survives
// the checks below.
pub fn split_overrun(raw: &str) -> (&str, Option<String>) {
    match raw.split_once("{{") {
        Some((url, rest)) => (url, Some(format!("{{{{{rest}"))),
        None => (raw, None),
    }
}

pub fn normalize(raw: &str) -> Result<CanonicalUrl, UrlReject> {
    let decoded = decode_html_entities(raw);
    let mut parsed = Url::parse(&decoded).map_err(|_| UrlReject::Unparsable)?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(UrlReject::UnsupportedScheme);
    }
    let host = match parsed.host_str() {
        Some(host) => host.to_ascii_lowercase(),
        None => return Err(UrlReject::MissingHost),
    };
    if host == "localhost" || host.ends_with(".localhost") {
        return Err(UrlReject::Localhost);
    }
    if !host.contains('.') {
        return Err(UrlReject::BareHostname);
    }
    if let Ok(address) = host.parse::<Ipv4Addr>()
        && address.is_loopback()
    {
        return Err(UrlReject::LoopbackAddress);
    }

    parsed.set_fragment(None);
    Ok(CanonicalUrl(parsed))
}

fn decode_html_entities(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        output.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match decode_entity(candidate) {
            Some((ch, consumed)) => {
                output.push(ch);
                rest = &candidate[consumed..];
            }
            None => {
                output.push('&');
                rest = &candidate[1..];
            }
        }
    }
    output.push_str(rest);
    output
}

fn decode_entity(text: &str) -> Option<(char, usize)> {
    let semicolon = text.find(';')?;
    let body = &text[1..semicolon];
    if let Some(numeric) = body.strip_prefix('#') {
        let code = if let Some(hex) = numeric.strip_prefix('x').or_else(|| numeric.strip_prefix('X'))
        {
            u32::from_str_radix(hex, 16).ok()?
        } else {
            numeric.parse::<u32>().ok()?
        };
        return char::from_u32(code).map(|ch| (ch, semicolon + 1));
    }
    NAMED_ENTITIES
        .iter()
        .find(|(name, _)| *name == body)
        .map(|(_, ch)| (*ch, semicolon + 1))
}
