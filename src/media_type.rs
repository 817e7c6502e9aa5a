//! MIME type resolution and matching.
//!
//! Handlers name content types loosely: an extension (`"png"`, `".html"`),
//! a shorthand (`"json"`, `"text"`, `"bin"`), or a full type
//! (`"application/json"`). This module turns those into header values and
//! answers "is this content type one of these?" questions for
//! [`Request::is`](crate::Request::is) and [`Response::is`](crate::Response::is).

use mime::Mime;

/// Shorthands that are not file extensions, or whose extension lookup would
/// pick a less useful type.
const ALIASES: &[(&str, &str)] = &[
    ("bin", "application/octet-stream"),
    ("form", "application/x-www-form-urlencoded"),
    ("html", "text/html"),
    ("json", "application/json"),
    ("text", "text/plain"),
    ("urlencoded", "application/x-www-form-urlencoded"),
];

/// Resolves an extension or shorthand (leading dot optional) to a MIME type.
pub fn lookup(ext: &str) -> Option<String> {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() {
        return None;
    }
    if let Some((_, ty)) = ALIASES.iter().find(|(alias, _)| *alias == ext) {
        return Some((*ty).to_owned());
    }
    mime_guess::from_ext(&ext).first_raw().map(str::to_owned)
}

/// Builds a `Content-Type` header value from an extension, shorthand, or
/// full type, appending `charset=utf-8` to textual types that lack one.
///
/// Returns `None` for names the registry does not know.
pub fn content_type(ty: &str) -> Option<String> {
    let ty = ty.trim();
    let full = if ty.contains('/') { ty.to_owned() } else { lookup(ty)? };
    let parsed: Mime = full.parse().ok()?;
    if parsed.get_param(mime::CHARSET).is_some() || !is_textual(&parsed) {
        return Some(full);
    }
    Some(format!("{full}; charset=utf-8"))
}

fn is_textual(ty: &Mime) -> bool {
    ty.type_() == mime::TEXT
        || matches!(
            (ty.type_().as_str(), ty.subtype().as_str()),
            ("application", "json" | "javascript" | "ecmascript")
        )
}

/// Strips parameters from a content-type value: `"text/html; charset=utf-8"`
/// becomes `"text/html"`.
pub fn essence(value: &str) -> &str {
    value.split(';').next().unwrap_or_default().trim()
}

/// Expands a candidate in `is(...)` form into a matchable type pattern.
fn normalize(candidate: &str) -> Option<String> {
    match candidate {
        "urlencoded" => Some("application/x-www-form-urlencoded".to_owned()),
        "multipart" => Some("multipart/*".to_owned()),
        _ if candidate.starts_with('+') => Some(format!("*/*{candidate}")),
        _ if candidate.contains('/') => Some(candidate.to_ascii_lowercase()),
        _ => lookup(candidate),
    }
}

/// Matches `pattern` (which may contain `*` and `+suffix` wildcards) against
/// a concrete `type/subtype`.
fn matches(pattern: &str, actual: &str) -> bool {
    let (Some((p_type, p_sub)), Some((a_type, a_sub))) =
        (pattern.split_once('/'), actual.split_once('/'))
    else {
        return false;
    };
    if p_type != "*" && p_type != a_type {
        return false;
    }
    if let Some(suffix) = p_sub.strip_prefix("*+") {
        return a_sub.rsplit_once('+').is_some_and(|(_, s)| s == suffix);
    }
    p_sub == "*" || p_sub == a_sub
}

/// Returns the first candidate matching the content type `actual`.
///
/// Candidates given as wildcards or `+suffix` report the concrete type;
/// everything else is echoed back as written, so `is(&["json"])` yields
/// `"json"`.
pub fn type_is(actual: &str, candidates: &[&str]) -> Option<String> {
    let actual = essence(actual).to_ascii_lowercase();
    if actual.parse::<Mime>().is_err() {
        return None;
    }
    candidates.iter().find_map(|&candidate| {
        let pattern = normalize(candidate)?;
        matches(&pattern, &actual).then(|| {
            if candidate.starts_with('+') || candidate.contains('*') {
                actual.clone()
            } else {
                candidate.to_owned()
            }
        })
    })
}
