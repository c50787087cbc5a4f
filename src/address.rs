//! Address Loader: turns a list literal, a file, or a URL into a
//! normalized list of [`ProxyAddress`]es.

use std::fmt;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;

use crate::error::{ProxyError, Result};

/// An opaque `[scheme://]host:port` token. Equality is string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ProxyAddress(String);

impl ProxyAddress {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ProxyAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProxyAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Slice bounds, python-`list[start:stop]` semantics: either bound may
/// be absent (open end) or negative (counted from the end).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slice {
    pub start: Option<i64>,
    pub stop: Option<i64>,
}

fn resolve_bound(bound: Option<i64>, len: usize, default: usize) -> usize {
    match bound {
        None => default,
        Some(i) if i >= 0 => (i as usize).min(len),
        Some(i) => {
            let neg = (-i) as usize;
            len.saturating_sub(neg)
        }
    }
}

/// Split on `sep`, strip whitespace, discard empty tokens, preserve order.
pub fn read_string(s: &str, sep: &str) -> Vec<String> {
    s.split(sep)
        .map(|tok| tok.trim())
        .filter(|tok| !tok.is_empty())
        .map(|tok| tok.to_string())
        .collect()
}

/// UTF-8 read of `path`, then [`read_string`] on newlines.
pub fn read_file(path: &std::path::Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| ProxyError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(read_string(&content, "\n"))
}

/// Fetch a newline-separated proxy list from `url`.
///
/// Retries on HTTP error or timeout up to `retries` times, sleeping a
/// uniform-random whole number of seconds drawn from `sleep_range`
/// between attempts. Decompresses `Content-Encoding: gzip` bodies and
/// decodes using the response charset (default UTF-8) before handing
/// off to [`read_string`].
pub fn read_url(
    url: &str,
    retries: u32,
    sleep_range: (u64, u64),
    timeout: Duration,
) -> Result<Vec<String>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .expect("reqwest client builder should not fail with only a timeout set");

    let mut attempts_left = retries;
    let mut last_err = None;

    loop {
        match client.get(url).send().and_then(|r| r.error_for_status()) {
            Ok(resp) => {
                let body = decode_body(resp)?;
                return Ok(read_string(&body, "\n"));
            }
            Err(e) => {
                last_err = Some(e);
                if attempts_left == 0 {
                    break;
                }
                attempts_left -= 1;
                let secs = rand::thread_rng().gen_range(sleep_range.0..=sleep_range.1);
                tracing::warn!(
                    "[AddressLoader] proxy list refresh from {} failed, retrying in {}s ({} attempts left)",
                    url,
                    secs,
                    attempts_left
                );
                std::thread::sleep(Duration::from_secs(secs));
            }
        }
    }

    Err(ProxyError::UrlRefresh {
        url: url.to_string(),
        attempts: retries,
        source: last_err.expect("loop only exits via a recorded error"),
    })
}

fn decode_body(resp: reqwest::blocking::Response) -> Result<String> {
    // `reqwest` already transparently decompresses gzip when the
    // feature is enabled and the response carries the header, so the
    // body here is already the decoded text; `text()` handles charset
    // detection from the response's declared encoding, defaulting to
    // UTF-8.
    let url = resp.url().to_string();
    resp.text().map_err(|e| ProxyError::UrlRefresh {
        url,
        attempts: 0,
        source: e,
    })
}

/// Apply slice, force-scheme rewrite, and optional shuffle, in that order.
pub fn normalize(
    mut list: Vec<String>,
    slice: Option<Slice>,
    force_scheme: Option<&str>,
    shuffle: bool,
) -> Vec<ProxyAddress> {
    if let Some(s) = slice {
        let len = list.len();
        let start = resolve_bound(s.start, len, 0);
        let stop = resolve_bound(s.stop, len, len);
        list = if start < stop {
            list[start..stop].to_vec()
        } else {
            Vec::new()
        };
    }

    if let Some(scheme) = force_scheme {
        let re = scheme_prefix_re();
        list = list
            .into_iter()
            .map(|addr| re.replace(&addr, format!("{}://", scheme)).into_owned())
            .collect();
    }

    if shuffle {
        list.shuffle(&mut rand::thread_rng());
    }

    list.into_iter().map(ProxyAddress::new).collect()
}

fn scheme_prefix_re() -> Regex {
    // Matches an existing `scheme://` prefix, or the empty start of
    // string if absent, so the replacement either rewrites the scheme
    // or inserts one.
    Regex::new(r"^(?:[^/]*://)?").expect("static regex is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_string_strips_and_drops_empty() {
        let out = read_string(" a \n\nb\n  \nc ", "\n");
        assert_eq!(out, vec!["a", "b", "c"]);
    }

    #[test]
    fn normalize_applies_slice_then_scheme_then_shuffle_flag() {
        let list = vec!["1.1.1.1:80".into(), "2.2.2.2:80".into(), "3.3.3.3:80".into()];
        let out = normalize(list, Some(Slice { start: Some(1), stop: None }), Some("socks5"), false);
        assert_eq!(
            out,
            vec![
                ProxyAddress::new("socks5://2.2.2.2:80"),
                ProxyAddress::new("socks5://3.3.3.3:80"),
            ]
        );
    }

    #[test]
    fn normalize_rewrites_existing_scheme() {
        let list = vec!["http://1.1.1.1:80".into()];
        let out = normalize(list, None, Some("socks5"), false);
        assert_eq!(out, vec![ProxyAddress::new("socks5://1.1.1.1:80")]);
    }

    #[test]
    fn normalize_negative_slice_bounds() {
        let list = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        let out = normalize(list, Some(Slice { start: Some(-2), stop: None }), None, false);
        assert_eq!(out, vec![ProxyAddress::new("c"), ProxyAddress::new("d")]);
    }

    #[test]
    fn read_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        std::fs::write(&path, "a:1\n\nb:2\n  \nc:3\n").unwrap();
        let out = read_file(&path).unwrap();
        assert_eq!(out, vec!["a:1", "b:2", "c:3"]);
    }
}
