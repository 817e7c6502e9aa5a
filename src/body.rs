//! Response body variants and the transport body types.
//!
//! A handler assigns a [`Body`] through [`Context::set_body`](crate::Context::set_body);
//! what ends up on the wire is decided later, once, by
//! [`Context::finalize`](crate::Context::finalize).

use std::fmt;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use serde::Serialize;
use serde_json::Value;

use crate::error::{BoxError, Result};

type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, BoxError>> + Send>>;

/// A streaming response body. Dropping it closes the source.
///
/// Held behind a lock so a context carrying one stays `Sync`; the stream is
/// only ever unwrapped, never polled through the lock.
pub struct BodyStream(Mutex<ByteStream>);

impl BodyStream {
    /// Wraps any fallible byte stream.
    pub fn new<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self(Mutex::new(Box::pin(stream.map_err(|e| -> BoxError { e.into() }))))
    }

    pub(crate) fn into_inner(self) -> ByteStream {
        self.0.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The inbound request body as handed over by the transport.
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// The outbound body written to the transport.
pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;

/// What a handler wants to send back.
#[derive(Default)]
pub enum Body {
    /// No body. Finalization substitutes the status message.
    #[default]
    Empty,
    /// UTF-8 text; `text/html` when it starts with `<`, else `text/plain`.
    Text(String),
    /// Raw bytes, sent as `application/octet-stream` unless typed otherwise.
    Bytes(Bytes),
    /// Piped to the client as it is produced. Never buffered.
    Stream(BodyStream),
    /// Serialized to compact JSON at finalization time.
    Json(Value),
}

impl Body {
    /// Serializes `value` into a [`Body::Json`].
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Wraps any fallible byte stream.
    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::Stream(BodyStream::new(stream))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Byte length when it can be known without consuming the body.
    pub(crate) fn len(&self) -> Option<u64> {
        match self {
            Self::Empty | Self::Stream(_) => None,
            Self::Text(s) => Some(s.len() as u64),
            Self::Bytes(b) => Some(b.len() as u64),
            Self::Json(v) => Some(v.to_string().len() as u64),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
        }
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Body {
    fn from(s: String) -> Self { Self::Text(s) }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self { Self::Bytes(b) }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self { Self::Bytes(b.into()) }
}

impl From<&'static [u8]> for Body {
    fn from(b: &'static [u8]) -> Self { Self::Bytes(Bytes::from_static(b)) }
}

impl From<Value> for Body {
    fn from(v: Value) -> Self { Self::Json(v) }
}

impl<T: Into<Body>> From<Option<T>> for Body {
    fn from(v: Option<T>) -> Self { v.map_or(Self::Empty, Into::into) }
}

pub(crate) fn empty() -> ResponseBody {
    Empty::new().map_err(|never| match never {}).boxed_unsync()
}

pub(crate) fn full(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed_unsync()
}

/// Wraps in-memory bytes as a request body, for tests and in-process callers.
pub fn request_body(bytes: impl Into<Bytes>) -> RequestBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversions_pick_the_variant() {
        assert!(matches!(Body::from("hi"), Body::Text(_)));
        assert!(matches!(Body::from(vec![1u8, 2]), Body::Bytes(_)));
        assert!(matches!(Body::from(json!({"a": 1})), Body::Json(_)));
        assert!(Body::from(None::<String>).is_empty());
    }

    #[test]
    fn known_lengths() {
        assert_eq!(Body::from("héllo").len(), Some(6));
        assert_eq!(Body::from(json!({"a": 1})).len(), Some(7));
        assert_eq!(Body::stream(futures_util::stream::empty::<std::io::Result<Bytes>>()).len(), None);
        assert_eq!(Body::Empty.len(), None);
    }

    #[test]
    fn json_from_serializable() {
        #[derive(Serialize)]
        struct User { id: u32 }
        let body = Body::json(&User { id: 7 }).unwrap();
        assert!(matches!(body, Body::Json(ref v) if v == &json!({"id": 7})));
    }
}
