//! Header accumulation with the merge-vs-drop policy.
//!
//! Field and value bytes arrive from the tokenizer in arbitrary-sized
//! chunks. A field chunk arriving after at least one value chunk commits the
//! previous header into the [`HeaderMap`]. For a fixed allow-list of
//! single-value header names only the first occurrence is stored; every
//! other name has all occurrences appended in arrival order.

use bytes::BytesMut;
use http::header;
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::trace;

/// Header names for which duplicates are dropped rather than appended.
///
/// Mirrors the classic simple-value list used by mozilla's header handling:
/// <https://mxr.mozilla.org/mozilla/source/netwerk/protocol/http/src/nsHttpHeaderArray.cpp>
const SINGLE_VALUE_HEADERS: [HeaderName; 18] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::USER_AGENT,
    header::REFERER,
    header::HOST,
    header::AUTHORIZATION,
    header::PROXY_AUTHORIZATION,
    header::IF_MODIFIED_SINCE,
    header::IF_UNMODIFIED_SINCE,
    header::FROM,
    header::LOCATION,
    header::MAX_FORWARDS,
    header::RETRY_AFTER,
    header::ETAG,
    header::LAST_MODIFIED,
    header::SERVER,
    header::AGE,
    header::EXPIRES,
];

pub(crate) fn is_single_value(name: &HeaderName) -> bool {
    SINGLE_VALUE_HEADERS.contains(name)
}

/// Accumulates chunked field/value events into a [`HeaderMap`].
#[derive(Debug, Default)]
pub struct HeaderAccumulator {
    field: BytesMut,
    value: BytesMut,
    value_in_progress: bool,
    headers: HeaderMap,
}

impl HeaderAccumulator {
    /// Appends a chunk of a header field name.
    ///
    /// A field chunk directly after value chunks commits the previous
    /// header.
    pub fn push_field(&mut self, chunk: &[u8]) {
        if self.value_in_progress {
            self.commit();
            self.value_in_progress = false;
        }
        self.field.extend_from_slice(chunk);
    }

    /// Appends a chunk of a header value.
    pub fn push_value(&mut self, chunk: &[u8]) {
        self.value.extend_from_slice(chunk);
        self.value_in_progress = true;
    }

    /// Commits any header still pending. Called when headers-complete fires.
    pub fn finish(&mut self) {
        if self.value_in_progress {
            self.commit();
            self.value_in_progress = false;
        }
    }

    /// Returns the headers accumulated so far.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Clears all accumulated state, pending and committed.
    pub fn clear(&mut self) {
        self.field.clear();
        self.value.clear();
        self.value_in_progress = false;
        self.headers.clear();
    }

    /// Resets the in-progress header without touching committed headers.
    pub(crate) fn reset_pending(&mut self) {
        self.field.clear();
        self.value.clear();
        self.value_in_progress = false;
    }

    fn commit(&mut self) {
        match (HeaderName::from_bytes(&self.field), HeaderValue::from_bytes(&self.value)) {
            (Ok(name), Ok(value)) => {
                if is_single_value(&name) && self.headers.contains_key(&name) {
                    trace!(header = %name, "dropping duplicate single-value header");
                } else {
                    self.headers.append(name, value);
                }
            }
            // the tokenizer hands us validated tokens, anything else is skipped
            _ => trace!("skipping malformed header"),
        }

        self.field.clear();
        self.value.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulate(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut accumulator = HeaderAccumulator::default();
        for (name, value) in pairs {
            accumulator.push_field(name.as_bytes());
            accumulator.push_value(value.as_bytes());
        }
        accumulator.finish();
        accumulator.headers().clone()
    }

    #[test]
    fn repeated_headers_append_in_arrival_order() {
        let headers = accumulate(&[("Set-Cookie", "a=1"), ("Accept", "*/*"), ("Set-Cookie", "b=2")]);

        let cookies: Vec<_> = headers.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn single_value_headers_drop_duplicates() {
        let headers = accumulate(&[("Host", "first.example"), ("host", "second.example")]);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("host").unwrap(), "first.example");
    }

    #[test]
    fn chunked_field_and_value_bytes_are_joined() {
        let mut accumulator = HeaderAccumulator::default();
        accumulator.push_field(b"Acc");
        accumulator.push_field(b"ept");
        accumulator.push_value(b"text/");
        accumulator.push_value(b"html");
        // a new field commits the previous header
        accumulator.push_field(b"Host");
        accumulator.push_value(b"example.com");
        accumulator.finish();

        let headers = accumulator.headers();
        assert_eq!(headers.get("accept").unwrap(), "text/html");
        assert_eq!(headers.get("host").unwrap(), "example.com");
    }

    #[test]
    fn finish_commits_pending_header() {
        let mut accumulator = HeaderAccumulator::default();
        accumulator.push_field(b"X-Trace");
        accumulator.push_value(b"abc");
        assert!(accumulator.headers().is_empty());

        accumulator.finish();
        assert_eq!(accumulator.headers().get("x-trace").unwrap(), "abc");
    }
}
