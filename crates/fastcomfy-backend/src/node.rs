//! Backend node addressing.
//!
//! A node is configured as `host:port`, `http://host:port` or
//! `https://host:port`. Every URL the gateway uses for that node is derived
//! here so the HTTP and event-stream sides always agree.

use std::fmt;

use fastcomfy_core::{OutputDescriptor, TenantToken};
use url::Url;

use crate::errors::BackendError;

/// A normalized backend node address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BackendNode {
    /// `scheme://host[:port][/path]`, never with a trailing slash.
    base: String,
}

impl BackendNode {
    /// Parse a configured address.
    pub fn parse(address: &str) -> Result<Self, BackendError> {
        let trimmed = address.trim().trim_end_matches('/');
        let base = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_owned()
        } else {
            format!("http://{trimmed}")
        };

        let url = Url::parse(&base).map_err(|e| BackendError::InvalidAddress {
            address: address.to_owned(),
            reason: e.to_string(),
        })?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(BackendError::InvalidAddress {
                address: address.to_owned(),
                reason: "missing host".into(),
            });
        }
        Ok(Self { base })
    }

    /// Base address, as used in logs and view URLs.
    pub fn as_str(&self) -> &str {
        &self.base
    }

    /// `POST`/`GET` endpoint for submission and queue state.
    pub fn prompt_url(&self) -> String {
        format!("{}/prompt", self.base)
    }

    /// Event stream URL for a tenant: `ws(s)://.../ws?clientId=<token>`.
    pub fn event_url(&self, token: &TenantToken) -> Result<Url, BackendError> {
        let ws_base = if let Some(rest) = self.base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base.clone()
        };
        Url::parse_with_params(&format!("{ws_base}/ws"), &[("clientId", token.as_str())]).map_err(
            |e| BackendError::InvalidAddress {
                address: self.base.clone(),
                reason: e.to_string(),
            },
        )
    }

    /// View URL of a finished artifact.
    pub fn view_url(&self, output: &OutputDescriptor) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("filename", &output.filename)
            .append_pair("subfolder", &output.subfolder)
            .append_pair("type", "output")
            .finish();
        format!("{}/view?{query}", self.base)
    }
}

impl fmt::Display for BackendNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn bare_address_defaults_to_http() {
        let node = BackendNode::parse("10.0.0.2:8188/").unwrap();
        assert_eq!(node.as_str(), "http://10.0.0.2:8188");
        assert_eq!(node.prompt_url(), "http://10.0.0.2:8188/prompt");
    }

    #[test]
    fn event_url_follows_scheme() {
        let token = TenantToken::new("tok 1");
        let plain = BackendNode::parse("http://a:8188").unwrap();
        assert_eq!(
            plain.event_url(&token).unwrap().as_str(),
            "ws://a:8188/ws?clientId=tok+1"
        );
        let tls = BackendNode::parse("https://gpu.example.com").unwrap();
        assert_eq!(
            tls.event_url(&token).unwrap().as_str(),
            "wss://gpu.example.com/ws?clientId=tok+1"
        );
    }

    #[test]
    fn view_url_shape() {
        let node = BackendNode::parse("http://a:8188").unwrap();
        let url = node.view_url(&OutputDescriptor::new("out.png", ""));
        assert_eq!(url, "http://a:8188/view?filename=out.png&subfolder=&type=output");

        let nested = node.view_url(&OutputDescriptor::new("a b.png", "run/1"));
        assert_eq!(
            nested,
            "http://a:8188/view?filename=a+b.png&subfolder=run%2F1&type=output"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_matches!(
            BackendNode::parse("http://[::1"),
            Err(BackendError::InvalidAddress { .. })
        );
        assert_matches!(
            BackendNode::parse("  "),
            Err(BackendError::InvalidAddress { .. })
        );
    }
}
