//! Hit keys and canonicalization.
//!
//! A hit key is the page a tracking pixel was rendered on: either the
//! explicit `url` parameter or the request's `Referer`, with the query string
//! and fragment stripped so that `?utm_source=..` variants collapse into one
//! counter. Anything that cannot be read as a URL reference collapses into the
//! sentinel key instead of failing the request.
//!
//! Absolute URLs are re-serialized through [`url::Url`], so the scheme and
//! host are lowercased and characters such as spaces in the path are
//! percent-encoded. Relative references (`/a/b`, `ref`) are kept, with the
//! same path escaping applied. Only inputs a URL parser would reject outright
//! are mapped to the sentinel:
//! - ASCII control characters anywhere in the input,
//! - malformed percent escapes in the kept part,
//! - a missing scheme before `:` (`:foo`), or a colon in the first segment of
//!   a scheme-less reference (`1a:b`),
//! - an authority with an unclosed IPv6 bracket, a non-numeric port or a host
//!   with forbidden characters,
//! - a reference that is empty once query and fragment are gone.

use std::borrow::{Borrow, Cow};
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};
use url::Url;

/// Key used when no identifiable URL is present in a hit.
pub const SENTINEL_KEY: &str = "NA";

/// Canonical counter key. Opaque beyond canonicalization: equality is exact
/// string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HitKey(String);

impl HitKey {
    /// Wrap an already-canonical key (checkpoint restore, tests).
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The `"NA"` key.
    pub fn sentinel() -> Self {
        Self(SENTINEL_KEY.to_string())
    }

    pub fn is_sentinel(&self) -> bool {
        self.0 == SENTINEL_KEY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for HitKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HitKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Derive the canonical key for one hit.
///
/// `url_param` wins when non-empty, otherwise `referer` is used. Never fails:
/// an empty or unparseable source yields [`SENTINEL_KEY`].
pub fn normalize(url_param: &str, referer: &str) -> HitKey {
    let source = if url_param.is_empty() { referer } else { url_param };
    match canonicalize(source) {
        Some(kept) => HitKey::new(kept),
        None => {
            if !source.is_empty() {
                tracing::trace!(source, "unparseable hit reference, counting as sentinel");
            }
            HitKey::sentinel()
        }
    }
}

/// Strip query and fragment and re-serialize what is left, or `None` if `raw`
/// is not a usable reference.
fn canonicalize(raw: &str) -> Option<String> {
    if raw.is_empty() || raw.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return None;
    }

    let (without_fragment, fragment) = match raw.split_once('#') {
        Some((head, frag)) => (head, Some(frag)),
        None => (raw, None),
    };
    if let Some(frag) = fragment {
        if !valid_escapes(frag) {
            return None;
        }
    }

    let kept = without_fragment
        .split_once('?')
        .map_or(without_fragment, |(head, _query)| head);

    if kept.is_empty() || !valid_escapes(kept) || !valid_reference(kept) {
        return None;
    }

    if split_scheme(kept).is_some() {
        let mut url = Url::parse(kept).ok()?;
        url.set_query(None);
        url.set_fragment(None);
        Some(url.into())
    } else {
        Some(escape_path(kept).into_owned())
    }
}

/// Percent-encode bytes that may not appear literally in a URL path.
/// Existing escapes are left alone.
fn escape_path(s: &str) -> Cow<'_, str> {
    fn allowed(b: u8) -> bool {
        b.is_ascii_alphanumeric()
            || matches!(
                b,
                b'-' | b'.' | b'_' | b'~' | b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*'
                    | b'+' | b',' | b';' | b'=' | b':' | b'@' | b'/' | b'%'
            )
    }

    if s.bytes().all(allowed) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for &b in s.as_bytes() {
        if allowed(b) {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    Cow::Owned(out)
}

/// Every `%` must be followed by two hex digits.
fn valid_escapes(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3);
            match hex {
                Some(pair) if pair.iter().all(u8::is_ascii_hexdigit) => i += 3,
                _ => return false,
            }
        } else {
            i += 1;
        }
    }
    true
}

fn valid_reference(s: &str) -> bool {
    if s.starts_with(':') {
        return false;
    }

    let Some((_scheme, rest)) = split_scheme(s) else {
        // Scheme-less: a colon in the first segment would be read as a scheme.
        let first_segment = s.split('/').next().unwrap_or_default();
        return !first_segment.contains(':');
    };

    match rest.strip_prefix("//") {
        Some(after_slashes) => {
            let authority = after_slashes.split('/').next().unwrap_or_default();
            valid_authority(authority)
        }
        None => true,
    }
}

/// `scheme:rest` when the prefix before the first `:` is a syntactically valid
/// scheme (ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )).
fn split_scheme(s: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = s.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some((scheme, rest))
    } else {
        None
    }
}

fn valid_authority(authority: &str) -> bool {
    let host_port = authority
        .rsplit_once('@')
        .map_or(authority, |(_userinfo, hp)| hp);

    let port = if let Some(bracketed) = host_port.strip_prefix('[') {
        let Some((_ipv6, after)) = bracketed.split_once(']') else {
            return false;
        };
        match after {
            "" => None,
            p => match p.strip_prefix(':') {
                Some(port) => Some(port),
                None => return false,
            },
        }
    } else {
        host_port.rsplit_once(':').map(|(_host, port)| port)
    };

    port.map_or(true, |p| p.bytes().all(|b| b.is_ascii_digit()))
}
