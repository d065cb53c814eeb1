//! Media type parsing, matching and `Accept` negotiation.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid media type '{0}'")]
pub struct InvalidMediaType(pub String);

/// A parsed `type/subtype[+suffix]; key=value` media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub kind: String,
    pub subtype: String,
    pub suffix: Option<String>,
    pub params: Vec<(String, String)>,
}

impl MediaType {
    pub fn parse(s: &str) -> Result<Self, InvalidMediaType> {
        let mut parts = s.split(';');
        let essence = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let (kind, full_subtype) = essence
            .split_once('/')
            .ok_or_else(|| InvalidMediaType(s.to_string()))?;
        if kind.is_empty() || full_subtype.is_empty() {
            return Err(InvalidMediaType(s.to_string()));
        }
        let (subtype, suffix) = match full_subtype.rsplit_once('+') {
            Some((sub, suffix)) if !sub.is_empty() => (sub.to_string(), Some(suffix.to_string())),
            _ => (full_subtype.to_string(), None),
        };
        let params = parts
            .filter_map(|p| {
                let (k, v) = p.split_once('=')?;
                Some((k.trim().to_ascii_lowercase(), v.trim().trim_matches('"').to_string()))
            })
            .collect();
        Ok(MediaType {
            kind: kind.to_string(),
            subtype,
            suffix,
            params,
        })
    }

    /// `type/subtype` including any structured suffix, without parameters.
    pub fn essence(&self) -> String {
        match &self.suffix {
            Some(suffix) => format!("{}/{}+{}", self.kind, self.subtype, suffix),
            None => format!("{}/{}", self.kind, self.subtype),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary")
    }

    pub fn is_json(&self) -> bool {
        (self.kind == "application" && self.subtype == "json") || self.suffix.as_deref() == Some("json")
    }

    pub fn is_xml(&self) -> bool {
        ((self.kind == "application" || self.kind == "text") && self.subtype == "xml")
            || self.suffix.as_deref() == Some("xml")
    }

    pub fn is_form_urlencoded(&self) -> bool {
        self.kind == "application" && self.subtype == "x-www-form-urlencoded"
    }

    pub fn is_multipart(&self) -> bool {
        self.kind == "multipart"
    }

    pub fn is_text(&self) -> bool {
        self.kind == "text" && self.subtype == "plain"
    }

    pub fn is_wildcard(&self) -> bool {
        self.kind == "*" || self.subtype == "*"
    }

    /// True if either side's wildcards cover the other (`*/*`, `type/*`).
    pub fn matches(&self, other: &MediaType) -> bool {
        let kind = self.kind == "*" || other.kind == "*" || self.kind == other.kind;
        let subtype = self.subtype == "*"
            || other.subtype == "*"
            || (self.subtype == other.subtype && self.suffix == other.suffix);
        kind && subtype
    }

    /// Quality weight of an `Accept` entry.
    fn quality(&self) -> f32 {
        self.param("q").and_then(|q| q.parse().ok()).unwrap_or(1.0)
    }

    fn specificity(&self) -> u8 {
        match (self.kind.as_str(), self.subtype.as_str()) {
            ("*", _) => 0,
            (_, "*") => 1,
            _ => 2,
        }
    }
}

impl FromStr for MediaType {
    type Err = InvalidMediaType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MediaType::parse(s)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.essence())?;
        for (k, v) in &self.params {
            write!(f, "; {k}={v}")?;
        }
        Ok(())
    }
}

/// Pick the best of `available` for an `Accept` header.
///
/// Entries are ranked by `q` then specificity; `q=0` excludes. An empty or
/// missing header accepts the first available type.
pub fn negotiate<'a>(accept: Option<&str>, available: &[&'a str]) -> Option<&'a str> {
    let accept = accept.map(str::trim).unwrap_or("");
    if accept.is_empty() {
        return available.first().copied();
    }
    let mut ranges: Vec<MediaType> = accept
        .split(',')
        .filter_map(|entry| MediaType::parse(entry.trim()).ok())
        .collect();
    ranges.sort_by(|a, b| {
        b.quality()
            .partial_cmp(&a.quality())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.specificity().cmp(&a.specificity()))
    });

    let candidates: Vec<(&'a str, MediaType)> = available
        .iter()
        .filter_map(|s| MediaType::parse(s).ok().map(|m| (*s, m)))
        .collect();
    for range in ranges.iter().filter(|r| r.quality() > 0.0) {
        // a q=0 range at least as specific as this one excludes the candidate
        let found = candidates.iter().find(|(_, m)| {
            range.matches(m)
                && !ranges.iter().any(|r| {
                    r.quality() == 0.0 && r.specificity() >= range.specificity() && r.matches(m)
                })
        });
        if let Some((name, _)) = found {
            return Some(*name);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_suffix_and_params() {
        let m = MediaType::parse("Application/Problem+JSON; charset=utf-8").unwrap();
        assert_eq!(m.kind, "application");
        assert_eq!(m.subtype, "problem");
        assert_eq!(m.suffix.as_deref(), Some("json"));
        assert_eq!(m.param("charset"), Some("utf-8"));
        assert!(m.is_json());
        assert_eq!(m.essence(), "application/problem+json");
    }

    #[test]
    fn test_parse_rejects_missing_subtype() {
        assert!(MediaType::parse("json").is_err());
        assert!(MediaType::parse("application/").is_err());
    }

    #[test]
    fn test_multipart_boundary() {
        let m: MediaType = "multipart/form-data; boundary=\"abc\"".parse().unwrap();
        assert!(m.is_multipart());
        assert_eq!(m.boundary(), Some("abc"));
    }

    #[test]
    fn test_wildcard_matching() {
        let any = MediaType::parse("*/*").unwrap();
        let app = MediaType::parse("application/*").unwrap();
        let json = MediaType::parse("application/json").unwrap();
        let xml = MediaType::parse("text/xml").unwrap();
        assert!(any.matches(&xml));
        assert!(app.matches(&json));
        assert!(!app.matches(&xml));
    }

    #[test]
    fn test_negotiate_by_quality() {
        let available = ["application/json", "application/xml"];
        assert_eq!(
            negotiate(Some("application/xml;q=0.9, application/json;q=0.5"), &available),
            Some("application/xml")
        );
        assert_eq!(negotiate(Some("text/*, */*;q=0.1"), &available), Some("application/json"));
        assert_eq!(negotiate(None, &available), Some("application/json"));
        assert_eq!(negotiate(Some("text/html"), &available), None);
    }

    #[test]
    fn test_negotiate_explicit_exclusion() {
        let available = ["application/json", "application/xml"];
        assert_eq!(
            negotiate(Some("*/*, application/json;q=0"), &available),
            Some("application/xml")
        );
    }
}
