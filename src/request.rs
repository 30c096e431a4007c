use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde_json::Value;

use crate::{Headers, HttpsError, Result};

pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const ACCEPT: &str = "Accept";
pub const APPLICATION_JSON: &str = "application/json";

/// Supported request methods.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Whether a serialized body is written to the transport.
    pub fn sends_body(self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = HttpsError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            _ => Err(HttpsError::Configuration(format!(
                "unsupported method '{value}', expected GET, POST, PUT or DELETE"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Scheme {
    #[default]
    Https,
    Http,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
        }
    }
}

/// Transport-ready request. Built once per call and reused verbatim by every
/// attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub scheme: Scheme,
    pub host: String,
    /// Path including any query string.
    pub path: String,
    pub headers: Headers,
    /// Serialized body, present only for methods that send one.
    pub body: Option<Bytes>,
}

impl RequestDescriptor {
    /// Builds a descriptor from caller input.
    ///
    /// GET bodies become a query string: each `key=value` pair of the top-level
    /// object is appended in insertion order. Values are **not** URL-encoded, so
    /// values containing `&`, `=` or non-ASCII text produce a malformed query.
    /// Encode such values before passing them in.
    pub fn build(
        method: Method,
        host: &str,
        path: &str,
        body: &Value,
        mut headers: Headers,
    ) -> Result<Self> {
        let (scheme, host) = split_scheme(host);
        set_default_header(&mut headers, CONTENT_TYPE, APPLICATION_JSON);
        set_default_header(&mut headers, ACCEPT, APPLICATION_JSON);

        let (path, body) = if method.sends_body() {
            let serialized = serialize_body(body, &headers)?;
            set_default_header(&mut headers, CONTENT_LENGTH, &serialized.len().to_string());
            (path.to_owned(), Some(serialized))
        } else {
            (append_query(path, body)?, None)
        };

        Ok(Self {
            method,
            scheme,
            host: host.to_owned(),
            path,
            headers,
            body,
        })
    }

    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme.as_str(), self.host, self.path)
    }

    /// Whether the caller asked for a JSON response.
    pub fn accepts_json(&self) -> bool {
        header_value(&self.headers, ACCEPT).is_some_and(is_json_media_type)
    }
}

/// Case-insensitive header lookup.
pub fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn set_default_header(headers: &mut Headers, name: &str, value: &str) {
    if header_value(headers, name).is_none() {
        headers.insert(name.to_owned(), value.to_owned());
    }
}

fn is_json_media_type(value: &str) -> bool {
    value.to_ascii_lowercase().contains("json")
}

fn split_scheme(host: &str) -> (Scheme, &str) {
    let host = host.trim();
    if let Some(rest) = host.strip_prefix("https://") {
        (Scheme::Https, rest.trim_end_matches('/'))
    } else if let Some(rest) = host.strip_prefix("http://") {
        (Scheme::Http, rest.trim_end_matches('/'))
    } else {
        (Scheme::Https, host.trim_end_matches('/'))
    }
}

fn serialize_body(body: &Value, headers: &Headers) -> Result<Bytes> {
    let json_content = header_value(headers, CONTENT_TYPE).is_some_and(is_json_media_type);
    let text = match body {
        Value::String(raw) if !json_content => raw.clone(),
        other => serde_json::to_string(other).map_err(|err| {
            HttpsError::Configuration(format!("request body is not serializable: {err}"))
        })?,
    };
    Ok(Bytes::from(text))
}

fn append_query(path: &str, body: &Value) -> Result<String> {
    let pairs = match body {
        Value::Null => return Ok(path.to_owned()),
        Value::Object(map) => map,
        other => {
            return Err(HttpsError::Configuration(format!(
                "GET body must be a key/value mapping, got {other}"
            )))
        }
    };
    if pairs.is_empty() {
        return Ok(path.to_owned());
    }

    let query = pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", query_value(value)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if path.contains('?') { '&' } else { '?' };
    Ok(format!("{path}{separator}{query}"))
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
