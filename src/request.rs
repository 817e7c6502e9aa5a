//! Incoming HTTP request view.
//!
//! Everything here is derived from the raw request line, the headers, and
//! the connection it arrived on. Nothing is computed eagerly: the parsed
//! query, the negotiation tables, and the client IP are each built on first
//! access and kept until whatever they depend on is reassigned.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Version};
use serde_json::{Map, Value, json};

use crate::body::RequestBody;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::media_type;
use crate::negotiation::Accepts;

/// The transport-level facts about a connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct Peer {
    /// Address of the immediate peer, if known.
    pub remote_addr: Option<SocketAddr>,
    /// Whether the connection itself is TLS-encrypted.
    pub encrypted: bool,
}

impl Peer {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self { remote_addr: Some(remote_addr), encrypted: false }
    }
}

/// Parsed query-string pairs in their original order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query(Vec<(String, String)>);

impl Query {
    fn parse(raw: &str) -> Self {
        Self(serde_urlencoded::from_str(raw).unwrap_or_default())
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An incoming HTTP request.
pub struct Request {
    method: Method,
    version: Version,
    url: String,
    original_url: String,
    authority: Option<String>,
    headers: HeaderMap,
    peer: Peer,
    settings: Arc<Settings>,
    stream: Mutex<Option<RequestBody>>,
    body: Option<Value>,
    raw_body: Option<String>,
    pub(crate) params: HashMap<String, String>,
    query: OnceLock<Query>,
    accepts: OnceLock<Accepts>,
    ip: OnceLock<String>,
}

impl Request {
    pub(crate) fn new(req: http::Request<RequestBody>, peer: Peer, settings: Arc<Settings>) -> Self {
        let (parts, body) = req.into_parts();
        // HTTP/2 targets arrive in absolute form; keep the origin form HTTP/1 sees.
        let url = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.to_string(), |pq| pq.as_str().to_owned());
        Self {
            method: parts.method,
            version: parts.version,
            original_url: url.clone(),
            url,
            authority: parts.uri.authority().map(|a| a.as_str().to_owned()),
            headers: parts.headers,
            peer,
            settings,
            stream: Mutex::new(Some(body)),
            body: None,
            raw_body: None,
            params: HashMap::new(),
            query: OnceLock::new(),
            accepts: OnceLock::new(),
            ip: OnceLock::new(),
        }
    }

    // ── Request line ─────────────────────────────────────────────────────────

    pub fn method(&self) -> &Method { &self.method }

    pub fn set_method(&mut self, method: Method) { self.method = method; }

    pub fn version(&self) -> Version { self.version }

    pub fn peer(&self) -> Peer { self.peer }

    /// The current request target. Middleware may rewrite it.
    pub fn url(&self) -> &str { &self.url }

    /// Rewrites the request target, dropping the cached query.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
        self.query.take();
    }

    /// The request target as received, unaffected by rewrites.
    pub fn original_url(&self) -> &str { &self.original_url }

    /// Path component of the URL, still percent-encoded.
    pub fn path(&self) -> &str {
        split_url(&self.url).0
    }

    /// Replaces the path, keeping the query string.
    pub fn set_path(&mut self, path: &str) {
        let (current, query) = split_url(&self.url);
        if current == path {
            return;
        }
        let url = match query {
            Some(q) => format!("{path}?{q}"),
            None => path.to_owned(),
        };
        self.set_url(url);
    }

    /// Raw query string without the leading `?`.
    pub fn querystring(&self) -> &str {
        split_url(&self.url).1.unwrap_or_default()
    }

    pub fn set_querystring(&mut self, query: &str) {
        let query = query.trim_start_matches('?');
        if split_url(&self.url).1 == Some(query) {
            return;
        }
        let path = self.path().to_owned();
        if query.is_empty() {
            self.set_url(path);
        } else {
            self.set_url(format!("{path}?{query}"));
        }
    }

    /// The query string with its leading `?`, or empty.
    pub fn search(&self) -> String {
        match self.querystring() {
            "" => String::new(),
            q => format!("?{q}"),
        }
    }

    /// Parsed query, memoized until the URL changes.
    pub fn query(&self) -> &Query {
        self.query.get_or_init(|| Query::parse(self.querystring()))
    }

    /// Serializes `pairs` into the query string.
    pub fn set_query<K, V>(&mut self, pairs: &[(K, V)]) -> Result<()>
    where
        K: serde::Serialize,
        V: serde::Serialize,
    {
        let encoded = serde_urlencoded::to_string(pairs).map_err(Error::other)?;
        self.set_querystring(&encoded);
        Ok(())
    }

    // ── Headers ──────────────────────────────────────────────────────────────

    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Mutable header access. Drops the cached negotiation tables.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.accepts.take();
        &mut self.headers
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Like [`header`](Self::header), treating `Referer` and `Referrer` as
    /// the same field.
    pub fn get(&self, field: &str) -> Option<&str> {
        if field.eq_ignore_ascii_case("referer") || field.eq_ignore_ascii_case("referrer") {
            return self.header("referrer").or_else(|| self.header("referer"));
        }
        self.header(field)
    }

    // ── Derived from headers ─────────────────────────────────────────────────

    /// `host[:port]`, from `X-Forwarded-Host` when proxies are trusted.
    pub fn host(&self) -> &str {
        let forwarded = self.settings.proxy.then(|| self.header("x-forwarded-host")).flatten();
        let host = forwarded
            .filter(|h| !h.is_empty())
            .or_else(|| self.header(HOST.as_str()))
            .or(self.authority.as_deref())
            .unwrap_or_default();
        first_token(host)
    }

    /// [`host`](Self::host) without the port. Bracketed IPv6 literals are
    /// kept whole.
    pub fn hostname(&self) -> &str {
        let host = self.host();
        if host.starts_with('[') {
            return host.find(']').map_or(host, |end| &host[..=end]);
        }
        host.split(':').next().unwrap_or_default()
    }

    /// `http` or `https`. `X-Forwarded-Proto` is only consulted when
    /// proxies are trusted.
    pub fn protocol(&self) -> &str {
        if self.peer.encrypted {
            return "https";
        }
        if !self.settings.proxy {
            return "http";
        }
        self.header("x-forwarded-proto")
            .map(first_token)
            .filter(|p| !p.is_empty())
            .unwrap_or("http")
    }

    pub fn secure(&self) -> bool {
        self.protocol() == "https"
    }

    /// `protocol://host`.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.protocol(), self.host())
    }

    /// Absolute form of the original URL.
    pub fn href(&self) -> String {
        format!("{}{}", self.origin(), self.original_url)
    }

    /// The `X-Forwarded-For` chain when proxies are trusted, client first.
    pub fn ips(&self) -> Vec<String> {
        match self.header("x-forwarded-for") {
            Some(v) if self.settings.proxy && !v.is_empty() => {
                v.split(',').map(|ip| ip.trim().to_owned()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// The client address: first of [`ips`](Self::ips), else the peer.
    pub fn ip(&self) -> &str {
        self.ip.get_or_init(|| {
            self.ips()
                .into_iter()
                .next()
                .or_else(|| self.peer.remote_addr.map(|a| a.ip().to_string()))
                .unwrap_or_default()
        })
    }

    pub fn set_ip(&mut self, ip: impl Into<String>) {
        self.ip = OnceLock::from(ip.into());
    }

    /// Hostname labels left of the application domain, nearest first.
    ///
    /// With the default offset of 2, `tobi.ferrets.example.com` yields
    /// `["ferrets", "tobi"]`. IP literals have no subdomains.
    pub fn subdomains(&self) -> Vec<String> {
        let hostname = self.hostname();
        let bare = hostname.trim_start_matches('[').trim_end_matches(']');
        if bare.parse::<IpAddr>().is_ok() {
            return Vec::new();
        }
        hostname
            .split('.')
            .rev()
            .skip(self.settings.subdomain_offset)
            .map(str::to_owned)
            .collect()
    }

    /// Whether the method is idempotent.
    pub fn idempotent(&self) -> bool {
        [Method::GET, Method::HEAD, Method::PUT, Method::DELETE, Method::OPTIONS, Method::TRACE]
            .contains(&self.method)
    }

    /// Mime type of the request body without parameters, or `""`.
    pub fn content_type(&self) -> &str {
        self.header(CONTENT_TYPE.as_str()).map(media_type::essence).unwrap_or_default()
    }

    /// `charset` parameter of `Content-Type`.
    pub fn charset(&self) -> Option<String> {
        let parsed: mime::Mime = self.header(CONTENT_TYPE.as_str())?.parse().ok()?;
        parsed.get_param(mime::CHARSET).map(|c| c.as_str().to_owned())
    }

    /// Parsed `Content-Length`.
    pub fn length(&self) -> Option<u64> {
        self.header(CONTENT_LENGTH.as_str())?.trim().parse().ok()
    }

    /// Whether the request announces a body.
    pub fn has_body(&self) -> bool {
        self.headers.contains_key(TRANSFER_ENCODING) || self.length().is_some()
    }

    /// Matches the body's content type against `types`.
    ///
    /// `None` when there is no body, no `Content-Type`, or no match. With an
    /// empty list the bare content type is returned.
    pub fn is(&self, types: &[&str]) -> Option<String> {
        if !self.has_body() {
            return None;
        }
        let ct = self.header(CONTENT_TYPE.as_str())?;
        if types.is_empty() {
            return Some(media_type::essence(ct).to_owned());
        }
        media_type::type_is(ct, types)
    }

    // ── Content negotiation ──────────────────────────────────────────────────

    fn negotiation(&self) -> &Accepts {
        self.accepts.get_or_init(|| {
            Accepts::new(
                self.header("accept"),
                self.header("accept-encoding"),
                self.header("accept-charset"),
                self.header("accept-language"),
            )
        })
    }

    /// Best of the offered types (`"json"`, `"text/html"`, …), if any is
    /// acceptable.
    pub fn accepts(&self, types: &[&str]) -> Option<String> {
        self.negotiation().types(types)
    }

    /// Accepted media types, most preferred first.
    pub fn accepted_types(&self) -> Vec<String> {
        self.negotiation().preferred_types()
    }

    pub fn accepts_encodings(&self, encodings: &[&str]) -> Option<String> {
        self.negotiation().encodings(encodings)
    }

    pub fn accepted_encodings(&self) -> Vec<String> {
        self.negotiation().preferred_encodings()
    }

    pub fn accepts_charsets(&self, charsets: &[&str]) -> Option<String> {
        self.negotiation().charsets(charsets)
    }

    pub fn accepted_charsets(&self) -> Vec<String> {
        self.negotiation().preferred_charsets()
    }

    pub fn accepts_languages(&self, languages: &[&str]) -> Option<String> {
        self.negotiation().languages(languages)
    }

    pub fn accepted_languages(&self) -> Vec<String> {
        self.negotiation().preferred_languages()
    }

    // ── Body and routing slots ───────────────────────────────────────────────

    /// Takes the unread body stream. Returns `None` once consumed.
    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.stream.get_mut().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Parsed body, as stored by a body-reading middleware.
    pub fn body(&self) -> Option<&Value> { self.body.as_ref() }

    pub fn set_body(&mut self, body: Value) { self.body = Some(body); }

    /// Body text exactly as read.
    pub fn raw_body(&self) -> Option<&str> { self.raw_body.as_deref() }

    pub fn set_raw_body(&mut self, raw: impl Into<String>) { self.raw_body = Some(raw.into()); }

    /// Named path parameter populated by the router.
    ///
    /// For a route `/users/:id`, `param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> { &self.params }

    /// `{method, url, header}` summary.
    pub fn inspect(&self) -> Value {
        json!({
            "method": self.method.as_str(),
            "url": self.url,
            "header": headers_json(&self.headers),
        })
    }
}

/// Lower-cased header names mapped to their (joined) values.
pub(crate) fn headers_json(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        map.insert(name.as_str().to_owned(), Value::String(joined));
    }
    Value::Object(map)
}

fn first_token(value: &str) -> &str {
    value.split(',').next().unwrap_or_default().trim()
}

/// Splits a request target into path and query, accepting absolute-form
/// targets and ignoring any fragment.
fn split_url(url: &str) -> (&str, Option<&str>) {
    let url = url.split('#').next().unwrap_or_default();
    let rest = match url.find("://") {
        Some(i) if !url[..i].contains('/') => {
            let after = &url[i + 3..];
            after.find(['/', '?']).map_or("", |j| &after[j..])
        }
        _ => url,
    };
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    (if path.is_empty() { "/" } else { path }, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::request_body;

    fn request(uri: &str, headers: &[(&str, &str)], settings: Settings) -> Request {
        let mut builder = http::Request::builder().uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let req = builder.body(request_body("")).unwrap();
        let peer = Peer::new("10.0.0.9:5555".parse().unwrap());
        Request::new(req, peer, Arc::new(settings))
    }

    fn trusting() -> Settings {
        Settings { proxy: true, ..Settings::default() }
    }

    #[test]
    fn path_and_query() {
        let mut req = request("/search/a%20b?q=rust&q=http&page=2", &[], Settings::default());
        assert_eq!(req.path(), "/search/a%20b");
        assert_eq!(req.querystring(), "q=rust&q=http&page=2");
        assert_eq!(req.search(), "?q=rust&q=http&page=2");
        assert_eq!(req.query().get("page"), Some("2"));
        assert_eq!(req.query().get_all("q").collect::<Vec<_>>(), ["rust", "http"]);

        req.set_path("/other");
        assert_eq!(req.url(), "/other?q=rust&q=http&page=2");
        req.set_querystring("x=1");
        assert_eq!(req.url(), "/other?x=1");
        assert_eq!(req.query().get("x"), Some("1"));
        assert_eq!(req.query().get("page"), None);
        assert_eq!(req.original_url(), "/search/a%20b?q=rust&q=http&page=2");
    }

    #[test]
    fn set_query_serializes_pairs() {
        let mut req = request("/p", &[], Settings::default());
        req.set_query(&[("a", "1"), ("b", "two words")]).unwrap();
        assert_eq!(req.querystring(), "a=1&b=two+words");
        assert_eq!(req.query().get("b"), Some("two words"));
    }

    #[test]
    fn absolute_form_targets() {
        let req = request("http://example.com/a/b?c=d", &[("host", "example.com")], Settings::default());
        assert_eq!(req.path(), "/a/b");
        assert_eq!(req.querystring(), "c=d");
        assert_eq!(req.href(), "http://example.com/a/b?c=d");
        assert_eq!(req.url(), "/a/b?c=d");
        assert_eq!(req.original_url(), "/a/b?c=d");
    }

    #[test]
    fn http2_targets_look_like_http1() {
        let req = http::Request::builder()
            .version(Version::HTTP_2)
            .uri("https://api.example.com/v1/items?page=2")
            .body(request_body(""))
            .unwrap();
        let req = Request::new(req, Peer::default(), Arc::new(Settings::default()));
        assert_eq!(req.url(), "/v1/items?page=2");
        assert_eq!(req.path(), "/v1/items");
        assert_eq!(req.host(), "api.example.com");
        assert_eq!(req.inspect()["url"], "/v1/items?page=2");
    }

    #[test]
    fn host_ignores_forwarded_without_trust() {
        let headers = [("host", "internal:8080"), ("x-forwarded-host", "public.example.com, other")];
        let req = request("/", &headers, Settings::default());
        assert_eq!(req.host(), "internal:8080");
        assert_eq!(req.hostname(), "internal");

        let req = request("/", &headers, trusting());
        assert_eq!(req.host(), "public.example.com");
    }

    #[test]
    fn ipv6_hostname_keeps_brackets() {
        let req = request("/", &[("host", "[::1]:3000")], Settings::default());
        assert_eq!(req.hostname(), "[::1]");
        assert!(req.subdomains().is_empty());
    }

    #[test]
    fn protocol_from_forwarded_proto_only_when_trusted() {
        let headers = [("x-forwarded-proto", "https, http")];
        assert_eq!(request("/", &headers, Settings::default()).protocol(), "http");
        let req = request("/", &headers, trusting());
        assert_eq!(req.protocol(), "https");
        assert!(req.secure());
        assert_eq!(request("/", &[], trusting()).protocol(), "http");
    }

    #[test]
    fn ips_and_ip() {
        let headers = [("x-forwarded-for", "client, proxy1, proxy2")];
        let req = request("/", &headers, Settings::default());
        assert!(req.ips().is_empty());
        assert_eq!(req.ip(), "10.0.0.9");

        let mut req = request("/", &headers, trusting());
        assert_eq!(req.ips(), ["client", "proxy1", "proxy2"]);
        assert_eq!(req.ip(), "client");
        req.set_ip("1.2.3.4");
        assert_eq!(req.ip(), "1.2.3.4");
    }

    #[test]
    fn subdomains_respect_offset() {
        let headers = [("host", "tobi.ferrets.example.com")];
        assert_eq!(request("/", &headers, Settings::default()).subdomains(), ["ferrets", "tobi"]);
        let settings = Settings { subdomain_offset: 3, ..Settings::default() };
        assert_eq!(request("/", &headers, settings).subdomains(), ["tobi"]);
        assert!(request("/", &[("host", "127.0.0.1")], Settings::default()).subdomains().is_empty());
    }

    #[test]
    fn referrer_aliases() {
        let req = request("/", &[("referer", "/prev")], Settings::default());
        assert_eq!(req.get("Referrer"), Some("/prev"));
        assert_eq!(req.get("referer"), Some("/prev"));
    }

    #[test]
    fn content_type_charset_length() {
        let headers = [("content-type", "text/html; charset=utf-8"), ("content-length", "12")];
        let req = request("/", &headers, Settings::default());
        assert_eq!(req.content_type(), "text/html");
        assert_eq!(req.charset().as_deref(), Some("utf-8"));
        assert_eq!(req.length(), Some(12));
        assert_eq!(req.is(&["html"]).as_deref(), Some("html"));
        assert_eq!(req.is(&["json"]), None);
        assert_eq!(req.is(&[]).as_deref(), Some("text/html"));
    }

    #[test]
    fn is_requires_a_body() {
        let req = request("/", &[("content-type", "application/json")], Settings::default());
        assert!(!req.has_body());
        assert_eq!(req.is(&["json"]), None);
    }

    #[test]
    fn negotiation_cache_resets_on_header_change() {
        let mut req = request("/", &[("accept", "application/json")], Settings::default());
        assert_eq!(req.accepts(&["html", "json"]).as_deref(), Some("json"));
        req.headers_mut().insert("accept", http::HeaderValue::from_static("text/html"));
        assert_eq!(req.accepts(&["html", "json"]).as_deref(), Some("html"));
    }

    #[test]
    fn idempotent_methods() {
        let mut req = request("/", &[], Settings::default());
        assert!(req.idempotent());
        req.set_method(Method::POST);
        assert!(!req.idempotent());
    }

    #[test]
    fn inspect_summary() {
        let req = request("/x?y=1", &[("x-a", "1")], Settings::default());
        assert_eq!(req.inspect(), json!({"method": "GET", "url": "/x?y=1", "header": {"x-a": "1"}}));
    }
}
