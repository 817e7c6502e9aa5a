//! Outgoing HTTP response view.
//!
//! The setters here keep status, headers, and body consistent with each
//! other, so that finalization can trust whatever state it is handed:
//!
//! - clearing the body forces `204` (unless the status is already an empty
//!   one) and strips `Content-Type`, `Content-Length`, `Transfer-Encoding`;
//! - assigning a body promotes the default `404` to `200` unless a status was
//!   set explicitly, and fills `Content-Type` only when the handler has not;
//! - once headers are on the wire, header and status mutations do nothing.

use std::time::SystemTime;

use http::header::{
    CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED, LOCATION,
    TRANSFER_ENCODING, VARY,
};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Value, json};

use crate::body::{Body, ResponseBody};
use crate::error::{Error, Result};
use crate::media_type;
use crate::request::headers_json;
use crate::status;

/// Characters left unescaped in an RFC 5987 `filename*` value.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// An outgoing HTTP response under construction.
#[derive(Debug)]
pub struct Response {
    status: u16,
    explicit_status: bool,
    message: Option<String>,
    headers: HeaderMap,
    body: Body,
    pub(crate) headers_sent: bool,
}

impl Response {
    /// A fresh response: `404`, no headers, no body.
    pub(crate) fn new() -> Self {
        Self {
            status: 404,
            explicit_status: false,
            message: None,
            headers: HeaderMap::new(),
            body: Body::Empty,
            headers_sent: false,
        }
    }

    // ── Status ───────────────────────────────────────────────────────────────

    pub fn status(&self) -> u16 { self.status }

    /// Sets the status code.
    ///
    /// Fails with [`Error::InvalidStatus`] for unregistered codes, leaving the
    /// previous status in place. Moving to an empty status drops the body.
    pub fn set_status(&mut self, code: u16) -> Result<()> {
        if self.headers_sent {
            return Ok(());
        }
        if !status::is_valid(code) {
            return Err(Error::InvalidStatus(code));
        }
        self.apply_status(code);
        Ok(())
    }

    pub(crate) fn apply_status(&mut self, code: u16) {
        if self.headers_sent {
            return;
        }
        self.explicit_status = true;
        self.status = code;
        self.message = None;
        if !self.body.is_empty() && status::is_empty(code) {
            self.set_body(Body::Empty);
        }
    }

    /// Whether a handler ever assigned a status (even `404`).
    pub fn explicit_status(&self) -> bool { self.explicit_status }

    /// Reason phrase: the custom message if one was set, else the standard one.
    pub fn message(&self) -> &str {
        self.message
            .as_deref()
            .or_else(|| status::reason(self.status))
            .unwrap_or_default()
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    // ── Body ─────────────────────────────────────────────────────────────────

    pub fn body(&self) -> &Body { &self.body }

    /// Assigns the body, keeping status and entity headers consistent.
    ///
    /// Any previous body is dropped; a replaced stream is closed.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        let body = body.into();
        let had_body = !self.body.is_empty();

        if body.is_empty() {
            self.body = Body::Empty;
            if !status::is_empty(self.status) {
                self.apply_status(204);
            }
            self.remove(CONTENT_TYPE.as_str());
            self.remove(CONTENT_LENGTH.as_str());
            self.remove(TRANSFER_ENCODING.as_str());
            return;
        }

        if !self.explicit_status {
            self.apply_status(200);
        }

        let set_type = !self.headers.contains_key(CONTENT_TYPE);
        match &body {
            Body::Text(text) => {
                if set_type {
                    self.set_type(if text.trim_start().starts_with('<') { "html" } else { "text" });
                }
                self.set_length(text.len() as u64);
            }
            Body::Bytes(bytes) => {
                if set_type {
                    self.set_type("bin");
                }
                self.set_length(bytes.len() as u64);
            }
            Body::Stream(_) => {
                if had_body {
                    self.remove(CONTENT_LENGTH.as_str());
                }
                if set_type {
                    self.set_type("bin");
                }
            }
            Body::Json(_) => {
                self.remove(CONTENT_LENGTH.as_str());
                self.set_type("json");
            }
            Body::Empty => {}
        }
        self.body = body;
    }

    /// Moves the body out without touching status or headers.
    pub(crate) fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    /// `Content-Length` when set, else the length the body will have.
    pub fn length(&self) -> Option<u64> {
        match self.get(CONTENT_LENGTH.as_str()) {
            Some(len) => Some(len.trim().parse().unwrap_or(0)),
            None => self.body.len(),
        }
    }

    pub fn set_length(&mut self, len: u64) {
        if !self.headers_sent {
            self.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
    }

    /// Whether the head of the response has been handed to the transport.
    pub fn header_sent(&self) -> bool { self.headers_sent }

    // ── Headers ──────────────────────────────────────────────────────────────

    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// First value of `field`.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.headers.get(field).and_then(|v| v.to_str().ok())
    }

    pub fn has(&self, field: &str) -> bool {
        self.headers.contains_key(field)
    }

    /// Replaces `field` with `value`.
    pub fn set(&mut self, field: &str, value: &str) -> Result<()> {
        if self.headers_sent {
            return Ok(());
        }
        let (name, value) = header_pair(field, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Adds another value for `field`, keeping existing ones.
    pub fn append(&mut self, field: &str, value: &str) -> Result<()> {
        if self.headers_sent {
            return Ok(());
        }
        let (name, value) = header_pair(field, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    pub fn remove(&mut self, field: &str) {
        if !self.headers_sent {
            self.headers.remove(field);
        }
    }

    /// Adds `field` to the `Vary` header.
    pub fn vary(&mut self, field: &str) {
        if self.headers_sent {
            return;
        }
        let merged = merge_vary(self.get(VARY.as_str()).unwrap_or_default(), field);
        if let Ok(value) = HeaderValue::from_str(&merged) {
            self.headers.insert(VARY, value);
        }
    }

    /// Mime type without parameters, or `""`.
    pub fn content_type(&self) -> &str {
        self.get(CONTENT_TYPE.as_str()).map(media_type::essence).unwrap_or_default()
    }

    /// Sets `Content-Type` from an extension, shorthand, or full type.
    /// Unknown types remove the header.
    pub fn set_type(&mut self, ty: &str) {
        match media_type::content_type(ty).and_then(|ct| HeaderValue::from_str(&ct).ok()) {
            Some(value) if !self.headers_sent => {
                self.headers.insert(CONTENT_TYPE, value);
            }
            Some(_) => {}
            None => self.remove(CONTENT_TYPE.as_str()),
        }
    }

    /// Matches the response content type against `types`.
    pub fn is(&self, types: &[&str]) -> Option<String> {
        let ct = self.content_type();
        if ct.is_empty() {
            return None;
        }
        if types.is_empty() {
            return Some(ct.to_owned());
        }
        media_type::type_is(ct, types)
    }

    /// Marks the response as a download, typed after `filename`'s extension.
    pub fn attachment(&mut self, filename: Option<&str>) -> Result<()> {
        if let Some(name) = filename {
            let ext = std::path::Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default();
            self.set_type(ext);
        }
        self.set(CONTENT_DISPOSITION.as_str(), &content_disposition(filename))
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        httpdate::parse_http_date(self.get(LAST_MODIFIED.as_str())?).ok()
    }

    pub fn set_last_modified(&mut self, time: SystemTime) -> Result<()> {
        self.set(LAST_MODIFIED.as_str(), &httpdate::fmt_http_date(time))
    }

    pub fn etag(&self) -> Option<&str> {
        self.get(ETAG.as_str())
    }

    /// Sets the `ETag`, adding quotes when missing. Weak tags are kept as is.
    pub fn set_etag(&mut self, etag: &str) -> Result<()> {
        if etag.starts_with('"') || etag.starts_with("W/\"") {
            self.set(ETAG.as_str(), etag)
        } else {
            self.set(ETAG.as_str(), &format!("\"{etag}\""))
        }
    }

    /// Points the client at `location`, with a short HTML or text body.
    pub(crate) fn redirect_to(&mut self, location: &str, html: bool) -> Result<()> {
        self.set(LOCATION.as_str(), location)?;
        if !status::is_redirect(self.status) {
            self.apply_status(302);
        }
        if html {
            let escaped = html_escape::encode_double_quoted_attribute(location);
            self.set_type("text/html; charset=utf-8");
            self.set_body(format!("Redirecting to <a href=\"{escaped}\">{escaped}</a>."));
        } else {
            self.set_type("text/plain; charset=utf-8");
            self.set_body(format!("Redirecting to {location}."));
        }
        Ok(())
    }

    /// Drops every header, for the error path.
    pub(crate) fn clear_headers(&mut self) {
        if !self.headers_sent {
            self.headers.clear();
        }
    }

    /// `{status, message, header}` summary.
    pub fn inspect(&self) -> Value {
        json!({
            "status": self.status,
            "message": self.message(),
            "header": headers_json(&self.headers),
        })
    }

    /// Builds the transport response carrying `body`.
    pub(crate) fn to_http(&self, body: ResponseBody) -> http::Response<ResponseBody> {
        let mut res = http::Response::new(body);
        *res.status_mut() = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        *res.headers_mut() = self.headers.clone();
        if let Some(message) = &self.message {
            if let Ok(phrase) = hyper::ext::ReasonPhrase::try_from(message.as_bytes()) {
                res.extensions_mut().insert(phrase);
            }
        }
        res
    }
}

fn header_pair(field: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let invalid = || Error::InvalidHeader { name: field.to_owned() };
    let name = HeaderName::from_bytes(field.as_bytes()).map_err(|_| invalid())?;
    let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
    Ok((name, value))
}

/// Merges `field` (possibly a comma list) into an existing `Vary` value.
fn merge_vary(existing: &str, field: &str) -> String {
    let mut fields: Vec<String> = existing
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_owned)
        .collect();
    if fields.iter().any(|f| f == "*") {
        return "*".to_owned();
    }
    for new in field.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        if new == "*" {
            return "*".to_owned();
        }
        if !fields.iter().any(|f| f.eq_ignore_ascii_case(new)) {
            fields.push(new.to_owned());
        }
    }
    fields.join(", ")
}

fn content_disposition(filename: Option<&str>) -> String {
    let Some(name) = filename else {
        return "attachment".to_owned();
    };
    let base = std::path::Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);
    let quote = |s: &str| s.replace('\\', "\\\\").replace('"', "\\\"");
    if base.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return format!("attachment; filename=\"{}\"", quote(base));
    }
    let fallback: String = base
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        quote(&fallback),
        utf8_percent_encode(base, ATTR_CHAR)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::stream;

    #[test]
    fn defaults_to_404() {
        let res = Response::new();
        assert_eq!(res.status(), 404);
        assert!(!res.explicit_status());
        assert_eq!(res.message(), "Not Found");
    }

    #[test]
    fn invalid_status_keeps_previous() {
        let mut res = Response::new();
        res.set_status(201).unwrap();
        assert!(matches!(res.set_status(999), Err(Error::InvalidStatus(999))));
        assert_eq!(res.status(), 201);
    }

    #[test]
    fn text_body_promotes_status_and_types() {
        let mut res = Response::new();
        res.set_body("<p>hi</p>");
        assert_eq!(res.status(), 200);
        assert_eq!(res.get("content-type"), Some("text/html; charset=utf-8"));
        assert_eq!(res.length(), Some(9));

        let mut res = Response::new();
        res.set_body("plain");
        assert_eq!(res.content_type(), "text/plain");
    }

    #[test]
    fn explicit_status_survives_body() {
        let mut res = Response::new();
        res.set_status(404).unwrap();
        res.set_body("missing");
        assert_eq!(res.status(), 404);
    }

    #[test]
    fn handler_content_type_wins() {
        let mut res = Response::new();
        res.set_type("application/xml");
        res.set_body("<ok/>");
        assert_eq!(res.content_type(), "application/xml");
    }

    #[test]
    fn empty_body_forces_204_and_strips_headers() {
        let mut res = Response::new();
        res.set_body("x");
        res.set("transfer-encoding", "chunked").unwrap();
        res.set_body(Body::Empty);
        assert_eq!(res.status(), 204);
        assert!(!res.has("content-type"));
        assert!(!res.has("content-length"));
        assert!(!res.has("transfer-encoding"));

        let mut res = Response::new();
        res.set_status(304).unwrap();
        res.set_body(None::<String>);
        assert_eq!(res.status(), 304);
    }

    #[test]
    fn empty_status_drops_body() {
        let mut res = Response::new();
        res.set_body("x");
        res.set_status(205).unwrap();
        assert!(res.body().is_empty());
        assert!(!res.has("content-length"));
    }

    #[test]
    fn json_body_is_typed_and_unsized() {
        let mut res = Response::new();
        res.set_length(99);
        res.set_body(serde_json::json!({"a": 1}));
        assert_eq!(res.content_type(), "application/json");
        assert!(!res.has("content-length"));
        assert_eq!(res.length(), Some(7));
    }

    #[test]
    fn stream_overwrite_drops_length() {
        let mut res = Response::new();
        res.set_body(Bytes::from_static(b"abc"));
        assert_eq!(res.content_type(), "application/octet-stream");
        res.set_body(Body::stream(stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"x"))])));
        assert!(!res.has("content-length"));
        assert_eq!(res.length(), None);
    }

    #[test]
    fn headers_frozen_after_send() {
        let mut res = Response::new();
        res.headers_sent = true;
        res.set("x-a", "1").unwrap();
        res.set_status(200).unwrap();
        assert!(!res.has("x-a"));
        assert_eq!(res.status(), 404);
    }

    #[test]
    fn invalid_header_value_is_rejected() {
        let mut res = Response::new();
        assert!(matches!(res.set("x-a", "bad\nvalue"), Err(Error::InvalidHeader { .. })));
        assert!(res.set("bad name", "v").is_err());
    }

    #[test]
    fn append_keeps_values() {
        let mut res = Response::new();
        res.append("set-cookie", "a=1").unwrap();
        res.append("set-cookie", "b=2").unwrap();
        assert_eq!(res.headers().get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn vary_merges() {
        let mut res = Response::new();
        res.vary("Accept");
        res.vary("accept, Origin");
        assert_eq!(res.get("vary"), Some("Accept, Origin"));
        res.vary("*");
        assert_eq!(res.get("vary"), Some("*"));
    }

    #[test]
    fn etag_quotes() {
        let mut res = Response::new();
        res.set_etag("abc").unwrap();
        assert_eq!(res.etag(), Some("\"abc\""));
        res.set_etag("W/\"123\"").unwrap();
        assert_eq!(res.etag(), Some("W/\"123\""));
    }

    #[test]
    fn last_modified_round_trips_to_the_second() {
        let mut res = Response::new();
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_445_412_480);
        res.set_last_modified(t).unwrap();
        assert_eq!(res.get("last-modified"), Some("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(res.last_modified(), Some(t));
    }

    #[test]
    fn attachment_headers() {
        let mut res = Response::new();
        res.attachment(Some("path/to/report.pdf")).unwrap();
        assert_eq!(res.content_type(), "application/pdf");
        assert_eq!(res.get("content-disposition"), Some("attachment; filename=\"report.pdf\""));

        res.attachment(Some("résumé.txt")).unwrap();
        assert_eq!(
            res.get("content-disposition"),
            Some("attachment; filename=\"r?sum?.txt\"; filename*=UTF-8''r%C3%A9sum%C3%A9.txt")
        );
        res.attachment(None).unwrap();
        assert_eq!(res.get("content-disposition"), Some("attachment"));
    }

    #[test]
    fn custom_message() {
        let mut res = Response::new();
        res.set_status(200).unwrap();
        res.set_message("Fine");
        assert_eq!(res.message(), "Fine");
        res.set_status(201).unwrap();
        assert_eq!(res.message(), "Created");
    }
}
