//! Content negotiation over the `Accept*` request headers.
//!
//! Each header is parsed once into a list of weighted preferences. Offers are
//! ranked by the quality of their best-matching preference, then by how
//! specific that match was, then by the preference's position in the header,
//! and finally by the order they were offered in.

use crate::media_type;

/// One entry of an `Accept*` header.
#[derive(Clone, Debug)]
struct Preference {
    value: String,
    q: f32,
    index: usize,
}

/// How well an offer satisfied the client.
#[derive(Clone, Copy, Debug)]
struct Priority {
    q: f32,
    specificity: u8,
    index: usize,
}

/// Parsed `Accept`, `Accept-Encoding`, `Accept-Charset` and
/// `Accept-Language` headers of one request.
#[derive(Clone, Debug)]
pub(crate) struct Accepts {
    types: Vec<Preference>,
    encodings: Vec<Preference>,
    charsets: Vec<Preference>,
    languages: Vec<Preference>,
}

impl Accepts {
    pub(crate) fn new(
        accept: Option<&str>,
        encoding: Option<&str>,
        charset: Option<&str>,
        language: Option<&str>,
    ) -> Self {
        let mut encodings = parse(encoding.unwrap_or(""));
        // identity is acceptable unless the client ruled it out explicitly
        if !encodings.iter().any(|p| p.value == "identity" || p.value == "*") {
            let q = encodings.iter().map(|p| p.q).fold(1.0_f32, f32::min);
            encodings.push(Preference { value: "identity".to_owned(), q, index: encodings.len() });
        }
        Self {
            types: parse(accept.unwrap_or("*/*")),
            encodings,
            charsets: parse(charset.unwrap_or("*")),
            languages: parse(language.unwrap_or("*")),
        }
    }

    /// Best media type among `offers`. Offers may be extensions (`"html"`)
    /// or full types; the winning offer is returned as written.
    pub(crate) fn types(&self, offers: &[&str]) -> Option<String> {
        let resolved: Vec<Option<String>> = offers
            .iter()
            .map(|o| if o.contains('/') { Some(o.to_ascii_lowercase()) } else { media_type::lookup(o) })
            .collect();
        best(offers, &self.types, |pref, i| {
            resolved[i].as_deref().and_then(|ty| type_specificity(&pref.value, ty))
        })
    }

    pub(crate) fn encodings(&self, offers: &[&str]) -> Option<String> {
        best(offers, &self.encodings, |pref, i| token_specificity(&pref.value, offers[i]))
    }

    pub(crate) fn charsets(&self, offers: &[&str]) -> Option<String> {
        best(offers, &self.charsets, |pref, i| token_specificity(&pref.value, offers[i]))
    }

    pub(crate) fn languages(&self, offers: &[&str]) -> Option<String> {
        best(offers, &self.languages, |pref, i| language_specificity(&pref.value, offers[i]))
    }

    /// The client's media types, most preferred first.
    pub(crate) fn preferred_types(&self) -> Vec<String> {
        preferred(&self.types)
    }

    pub(crate) fn preferred_encodings(&self) -> Vec<String> {
        preferred(&self.encodings)
    }

    pub(crate) fn preferred_charsets(&self) -> Vec<String> {
        preferred(&self.charsets)
    }

    pub(crate) fn preferred_languages(&self) -> Vec<String> {
        preferred(&self.languages)
    }
}

fn parse(header: &str) -> Vec<Preference> {
    header
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(index, entry)| {
            let mut parts = entry.split(';').map(str::trim);
            let value = parts.next().unwrap_or_default().to_ascii_lowercase();
            let q = parts
                .filter_map(|p| p.strip_prefix("q=").or_else(|| p.strip_prefix("Q=")))
                .find_map(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            Preference { value, q, index }
        })
        .collect()
}

fn preferred(prefs: &[Preference]) -> Vec<String> {
    let mut accepted: Vec<&Preference> = prefs.iter().filter(|p| p.q > 0.0).collect();
    accepted.sort_by(|a, b| b.q.total_cmp(&a.q).then(a.index.cmp(&b.index)));
    accepted.into_iter().map(|p| p.value.clone()).collect()
}

/// Ranks every offer against the preferences and returns the winner.
fn best<F>(offers: &[&str], prefs: &[Preference], specificity: F) -> Option<String>
where
    F: Fn(&Preference, usize) -> Option<u8>,
{
    let mut ranked: Vec<(usize, Priority)> = offers
        .iter()
        .enumerate()
        .filter_map(|(i, _)| {
            let priority = prefs
                .iter()
                .filter_map(|pref| {
                    specificity(pref, i).map(|s| Priority { q: pref.q, specificity: s, index: pref.index })
                })
                .max_by(|a, b| {
                    a.specificity
                        .cmp(&b.specificity)
                        .then(a.q.total_cmp(&b.q))
                        .then(b.index.cmp(&a.index))
                })?;
            (priority.q > 0.0).then_some((i, priority))
        })
        .collect();

    ranked.sort_by(|(ia, a), (ib, b)| {
        b.q.total_cmp(&a.q)
            .then(b.specificity.cmp(&a.specificity))
            .then(a.index.cmp(&b.index))
            .then(ia.cmp(ib))
    });
    ranked.first().map(|(i, _)| offers[*i].to_owned())
}

fn type_specificity(pattern: &str, offer: &str) -> Option<u8> {
    let (p_type, p_sub) = media_type::essence(pattern).split_once('/')?;
    let (o_type, o_sub) = media_type::essence(offer).split_once('/')?;
    let mut s = 0;
    if p_type == o_type {
        s |= 4;
    } else if p_type != "*" {
        return None;
    }
    if p_sub == o_sub {
        s |= 2;
    } else if p_sub != "*" {
        return None;
    }
    Some(s)
}

fn token_specificity(pattern: &str, offer: &str) -> Option<u8> {
    if pattern.eq_ignore_ascii_case(offer) {
        Some(1)
    } else if pattern == "*" {
        Some(0)
    } else {
        None
    }
}

fn language_specificity(pattern: &str, offer: &str) -> Option<u8> {
    let prefix = |tag: &str| tag.split('-').next().unwrap_or_default().to_ascii_lowercase();
    if pattern.eq_ignore_ascii_case(offer) {
        Some(4)
    } else if pattern == "*" {
        Some(0)
    } else if prefix(offer) == pattern {
        Some(2)
    } else if prefix(pattern) == offer.to_ascii_lowercase() {
        Some(1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept(header: &str) -> Accepts {
        Accepts::new(Some(header), None, None, None)
    }

    #[test]
    fn missing_accept_takes_first_offer() {
        let a = Accepts::new(None, None, None, None);
        assert_eq!(a.types(&["json", "html"]).as_deref(), Some("json"));
    }

    #[test]
    fn extension_offers_resolve() {
        let a = accept("text/html");
        assert_eq!(a.types(&["html"]).as_deref(), Some("html"));
        assert_eq!(a.types(&["text/html"]).as_deref(), Some("text/html"));
        assert_eq!(a.types(&["json"]), None);
    }

    #[test]
    fn wildcards_and_quality() {
        let a = accept("text/*;q=.5, application/json");
        assert_eq!(a.types(&["html", "json"]).as_deref(), Some("json"));
        assert_eq!(a.types(&["png"]), None);
        assert_eq!(a.types(&["text"]).as_deref(), Some("text"));
    }

    #[test]
    fn zero_quality_is_refused() {
        let a = accept("text/html;q=0, */*");
        assert_eq!(a.types(&["html"]), None);
        assert_eq!(a.types(&["html", "json"]).as_deref(), Some("json"));
    }

    #[test]
    fn preferred_lists_are_sorted() {
        let a = Accepts::new(None, Some("gzip, deflate;q=0.5"), None, Some("en;q=0.8, es, pt"));
        assert_eq!(a.preferred_encodings(), ["gzip", "deflate", "identity"]);
        assert_eq!(a.preferred_languages(), ["es", "pt", "en"]);
    }

    #[test]
    fn identity_only_without_header() {
        let a = Accepts::new(None, None, None, None);
        assert_eq!(a.encodings(&["gzip", "identity"]).as_deref(), Some("identity"));
        assert_eq!(a.encodings(&["gzip"]), None);
    }

    #[test]
    fn charsets_and_languages() {
        let a = Accepts::new(None, None, Some("utf-8, iso-8859-1;q=0.2"), Some("en-US, fr;q=0.5"));
        assert_eq!(a.charsets(&["iso-8859-1", "utf-8"]).as_deref(), Some("utf-8"));
        assert_eq!(a.languages(&["fr", "en"]).as_deref(), Some("en"));
    }
}
