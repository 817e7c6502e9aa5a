//! Conditional-GET freshness check.
//!
//! A cached representation is fresh when every validator the client sent
//! still matches the response: `If-None-Match` against `ETag` (weak
//! comparison) and `If-Modified-Since` against `Last-Modified`. A request
//! with `Cache-Control: no-cache` is never fresh.

use http::HeaderMap;
use http::header::{CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};

fn header<'a>(headers: &'a HeaderMap, name: &http::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty())
}

/// Compares request validators against response validators.
pub(crate) fn is_fresh(req: &HeaderMap, res: &HeaderMap) -> bool {
    let modified_since = header(req, &IF_MODIFIED_SINCE);
    let none_match = header(req, &IF_NONE_MATCH);
    if modified_since.is_none() && none_match.is_none() {
        return false;
    }

    if header(req, &CACHE_CONTROL)
        .is_some_and(|cc| cc.split(',').any(|d| d.trim().eq_ignore_ascii_case("no-cache")))
    {
        return false;
    }

    if let Some(none_match) = none_match.filter(|v| v.trim() != "*") {
        let Some(etag) = header(res, &ETAG) else {
            return false;
        };
        let matched = none_match.split(',').map(str::trim).any(|tag| {
            tag == etag || format!("W/{etag}") == tag || format!("W/{tag}") == etag
        });
        if !matched {
            return false;
        }
    }

    if let Some(since) = modified_since {
        let last = header(res, &LAST_MODIFIED).and_then(|v| httpdate::parse_http_date(v).ok());
        let since = httpdate::parse_http_date(since).ok();
        match (last, since) {
            (Some(last), Some(since)) if last <= since => {}
            _ => return false,
        }
    }

    true
}
