use std::collections::HashMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One outgoing request as reported by the host's interception hook. Bodies
/// are carried as text; JSON parsing is deferred and best-effort.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RequestWrapper {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResponseWrapper {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// A completed request/response pair, the unit the Network Observer consumes.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NetworkExchange {
    pub request: RequestWrapper,
    #[serde(default)]
    pub response: Option<ResponseWrapper>,
}

impl RequestWrapper {
    /// Path component of the url: scheme/host, query string and fragment
    /// stripped. Relative urls are taken as already being paths.
    pub fn path(&self) -> &str {
        let after_host = match self.url.find("://") {
            Some(scheme_end) => {
                let rest = &self.url[scheme_end + 3..];
                match rest.find('/') {
                    Some(slash) => &rest[slash..],
                    None => "/",
                }
            }
            None => self.url.as_str(),
        };

        let end = after_host
            .find(|c| c == '?' || c == '#')
            .unwrap_or(after_host.len());

        &after_host[..end]
    }

    pub fn method_is(&self, method: &str) -> bool {
        self.method.eq_ignore_ascii_case(method)
    }

    pub(crate) fn json_body(&self) -> Option<JsonValue> {
        let body = self.body.as_ref()?;
        serde_json::from_str(body).ok()
    }
}

impl ResponseWrapper {
    pub(crate) fn json_body(&self) -> Option<JsonValue> {
        let body = self.body.as_ref()?;
        serde_json::from_str(body).ok()
    }
}

impl Display for RequestWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method.as_str(), self.url.as_str())
    }
}

impl Display for NetworkExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.response.as_ref() {
            Some(response) => write!(f, "{} -> {}", &self.request, response.status),
            None => write!(f, "{} -> (no response)", &self.request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> RequestWrapper {
        RequestWrapper {
            url: url.to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
        }
    }

    #[test]
    fn path_strips_host_query_and_fragment() {
        assert_eq!(request("https://shop.example/api/rate?x=1#top").path(), "/api/rate");
        assert_eq!(request("/api/rate?x=1").path(), "/api/rate");
        assert_eq!(request("https://shop.example").path(), "/");
    }

    #[test]
    fn json_body_is_best_effort() {
        let mut req = request("/api/rate");
        req.body = Some("{\"stars\": 4}".to_string());
        assert_eq!(req.json_body().unwrap()["stars"], 4);

        req.body = Some("plain text".to_string());
        assert!(req.json_body().is_none());
    }

    #[test]
    fn method_comparison_ignores_case() {
        let req = request("/api/rate");
        assert!(req.method_is("get"));
        assert!(!req.method_is("post"));
    }
}
