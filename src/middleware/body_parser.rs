use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::{Map, Value};
use tracing::debug;

use crate::body::RequestBody;
use crate::compose::Next;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{BoxFuture, Middleware};

/// Reads the request body and stores it on the request before continuing.
///
/// | Content-Type | `raw_body()` | `body()` |
/// |---|---|---|
/// | `application/json`, `*/*+json` | body text | parsed JSON; `{}` when empty |
/// | `application/x-www-form-urlencoded` | body text | object of fields; repeated keys become arrays |
/// | `text/*` | body text | the same text as a JSON string |
/// | `multipart/form-data` | empty | object of text fields; repeated fields joined with `,` |
///
/// File parts of a multipart body are skipped.
///
/// Other content types and requests without a body pass through untouched,
/// with the stream still available through `take_body()`. A failure while
/// reading the stream fails the request with `500`; malformed JSON or form
/// data with `400`.
///
/// Size limits are left to the reverse proxy in front of the service.
#[derive(Clone, Copy, Debug, Default)]
pub struct BodyParser;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Buffered(Format),
    Multipart,
}

/// Bodies read whole, then parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Json,
    Form,
    Text,
}

impl BodyParser {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for BodyParser {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        Box::pin(async move {
            let kind = kind_of(ctx);
            if let Some(kind) = kind {
                let content_type = ctx.request().header("content-type").unwrap_or_default().to_owned();
                let stream = ctx.request_mut().take_body();
                if let Some(stream) = stream {
                    let (raw, body) = match kind {
                        Kind::Multipart => (String::new(), read_multipart(&content_type, stream).await?),
                        Kind::Buffered(format) => read_buffered(format, stream).await?,
                    };
                    let request = ctx.request_mut();
                    request.set_raw_body(raw);
                    request.set_body(body);
                }
            }
            next.run(ctx).await
        })
    }
}

fn kind_of(ctx: &Context) -> Option<Kind> {
    let request = ctx.request();
    if request.is(&["json", "+json"]).is_some() {
        Some(Kind::Buffered(Format::Json))
    } else if request.is(&["urlencoded"]).is_some() {
        Some(Kind::Buffered(Format::Form))
    } else if request.is(&["multipart/form-data"]).is_some() {
        Some(Kind::Multipart)
    } else if request.is(&["text/*"]).is_some() {
        Some(Kind::Buffered(Format::Text))
    } else {
        None
    }
}

async fn read_buffered(format: Format, stream: RequestBody) -> Result<(String, Value)> {
    let bytes = stream
        .collect()
        .await
        .map_err(|e| Error::http(500, format!("failed to read request body: {e}")))?
        .to_bytes();
    debug!(?format, len = bytes.len(), "request body read");

    let raw = String::from_utf8_lossy(&bytes).into_owned();
    let body = parse(format, &bytes, &raw)?;
    Ok((raw, body))
}

fn parse(format: Format, bytes: &Bytes, raw: &str) -> Result<Value> {
    match format {
        Format::Json if raw.trim().is_empty() => Ok(Value::Object(Map::new())),
        Format::Json => {
            serde_json::from_slice(bytes).map_err(|e| Error::http(400, format!("invalid JSON body: {e}")))
        }
        Format::Form => {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(bytes)
                .map_err(|e| Error::http(400, format!("invalid form body: {e}")))?;
            Ok(Value::Object(form_object(pairs)))
        }
        Format::Text => Ok(Value::String(raw.to_owned())),
    }
}

async fn read_multipart(content_type: &str, stream: RequestBody) -> Result<Value> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| Error::http(400, format!("invalid multipart body: {e}")))?;
    let mut multipart = multer::Multipart::new(stream.into_data_stream(), boundary);

    let mut fields = Map::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.file_name().is_some() {
            debug!(name = ?field.name(), "skipping file part");
            continue;
        }
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        let text = field.text().await.map_err(multipart_error)?;
        match fields.get_mut(&name) {
            Some(Value::String(joined)) => {
                joined.push(',');
                joined.push_str(&text);
            }
            _ => {
                fields.insert(name, Value::String(text));
            }
        }
    }
    debug!(fields = fields.len(), "multipart body read");
    Ok(Value::Object(fields))
}

fn multipart_error(err: multer::Error) -> Error {
    match err {
        multer::Error::StreamReadFailed(e) => Error::http(500, format!("failed to read request body: {e}")),
        other => Error::http(400, format!("invalid multipart body: {other}")),
    }
}

fn form_object(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut fields = Map::new();
    for (key, value) in pairs {
        match fields.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                fields.insert(key, Value::String(value));
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::request_body;
    use crate::compose::compose;
    use crate::handler::BoxedMiddleware;
    use crate::request::Peer;
    use crate::{Application, Settings};
    use serde_json::json;
    use std::sync::Arc;

    async fn parse_request(content_type: &str, body: &'static str) -> (Result<()>, Context) {
        let req = http::Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", content_type)
            .header("content-length", body.len())
            .body(request_body(body))
            .unwrap();
        let mut ctx = Application::new().settings(Settings::default()).create_context(req, Peer::default());
        let chain = compose([Arc::new(BodyParser::new()) as BoxedMiddleware]);
        let res = chain.run(&mut ctx).await;
        (res, ctx)
    }

    #[tokio::test]
    async fn parses_json() {
        let (res, ctx) = parse_request("application/json", r#"{"name":"tobi"}"#).await;
        res.unwrap();
        assert_eq!(ctx.request().body(), Some(&json!({"name": "tobi"})));
        assert_eq!(ctx.request().raw_body(), Some(r#"{"name":"tobi"}"#));
    }

    #[tokio::test]
    async fn parses_vendor_json() {
        let (res, ctx) = parse_request("application/vnd.api+json", "[1,2]").await;
        res.unwrap();
        assert_eq!(ctx.request().body(), Some(&json!([1, 2])));
    }

    #[tokio::test]
    async fn parses_forms_with_repeated_keys() {
        let (res, ctx) = parse_request("application/x-www-form-urlencoded", "a=1&b=two+words&a=3").await;
        res.unwrap();
        assert_eq!(ctx.request().body(), Some(&json!({"a": ["1", "3"], "b": "two words"})));
    }

    #[tokio::test]
    async fn reads_text() {
        let (res, ctx) = parse_request("text/plain; charset=utf-8", "hello").await;
        res.unwrap();
        assert_eq!(ctx.request().body(), Some(&json!("hello")));
    }

    #[tokio::test]
    async fn malformed_json_is_a_client_error() {
        let (res, _) = parse_request("application/json", "{nope").await;
        let err = res.unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(err.expose());
    }

    const MULTIPART: &str = concat!(
        "--XYZ\r\n",
        "Content-Disposition: form-data; name=\"tag\"\r\n\r\n",
        "rust\r\n",
        "--XYZ\r\n",
        "Content-Disposition: form-data; name=\"title\"\r\n\r\n",
        "hello\r\n",
        "--XYZ\r\n",
        "Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n",
        "Content-Type: text/plain\r\n\r\n",
        "file data\r\n",
        "--XYZ\r\n",
        "Content-Disposition: form-data; name=\"tag\"\r\n\r\n",
        "http\r\n",
        "--XYZ--\r\n",
    );

    #[tokio::test]
    async fn parses_multipart_fields() {
        let (res, ctx) = parse_request("multipart/form-data; boundary=XYZ", MULTIPART).await;
        res.unwrap();
        assert_eq!(ctx.request().body(), Some(&json!({"tag": "rust,http", "title": "hello"})));
        assert_eq!(ctx.request().raw_body(), Some(""));
    }

    #[tokio::test]
    async fn multipart_without_boundary_is_a_client_error() {
        let (res, _) = parse_request("multipart/form-data", MULTIPART).await;
        assert_eq!(res.unwrap_err().status(), 400);
    }

    #[tokio::test]
    async fn truncated_multipart_is_a_client_error() {
        let (res, _) = parse_request("multipart/form-data; boundary=XYZ", "--XYZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nhalf").await;
        assert_eq!(res.unwrap_err().status(), 400);
    }

    #[tokio::test]
    async fn other_types_pass_through() {
        let (res, mut ctx) = parse_request("image/png", "\u{1}PNG").await;
        res.unwrap();
        assert!(ctx.request().body().is_none());
        assert!(ctx.request_mut().take_body().is_some());
    }
}
