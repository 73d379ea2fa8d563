//! Framework-neutral view of the inbound HTTP request
//!
//! The web framework fills a [`RequestContext`] from its own request type.
//! Only what the client needs is carried.

use std::net::IpAddr;

use crate::uri::split_query;

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Absolute URL including the query string
    pub full_url: String,
    /// Request target as received, path plus query (`REQUEST_URI`)
    pub request_uri: String,
    /// Decoded query pairs, in order
    pub query: Vec<(String, String)>,
    /// Decoded form body pairs, in order
    pub form: Vec<(String, String)>,
    /// URL of the previous page, as tracked by the framework
    pub previous_url: Option<String>,
    pub route_name: Option<String>,
    pub client_ip: Option<IpAddr>,
    /// Address the server socket is bound to
    pub server_addr: Option<IpAddr>,
    /// Local address of the connection, when the bound address is unknown
    pub local_addr: Option<IpAddr>,
}

impl RequestContext {
    /// Builds a context from an absolute URL; query pairs and the request URI
    /// are derived from it
    pub fn new(full_url: impl Into<String>) -> Self {
        let full_url = full_url.into();
        let (_, query) = split_query(&full_url);
        let request_uri = request_target(&full_url).to_string();
        Self {
            full_url,
            request_uri,
            query,
            ..Default::default()
        }
    }

    pub fn with_form(mut self, form: Vec<(String, String)>) -> Self {
        self.form = form;
        self
    }

    /// Parses an `application/x-www-form-urlencoded` body
    pub fn with_form_body(self, body: &str) -> Self {
        let form = url::form_urlencoded::parse(body.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        self.with_form(form)
    }

    pub fn with_previous_url(mut self, url: impl Into<String>) -> Self {
        self.previous_url = Some(url.into());
        self
    }

    pub fn with_route_name(mut self, name: impl Into<String>) -> Self {
        self.route_name = Some(name.into());
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_server_addr(mut self, ip: IpAddr) -> Self {
        self.server_addr = Some(ip);
        self
    }

    pub fn with_local_addr(mut self, ip: IpAddr) -> Self {
        self.local_addr = Some(ip);
        self
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        find(&self.query, name)
    }

    pub fn form_param(&self, name: &str) -> Option<&str> {
        find(&self.form, name)
    }

    /// Form field first, then query parameter
    pub fn input(&self, name: &str) -> Option<&str> {
        self.form_param(name).or_else(|| self.query_param(name))
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.input(name).is_some()
    }

    /// Path without the query string, leading `/` removed
    pub fn path(&self) -> &str {
        let target = crate::uri::without_query(&self.request_uri);
        target.trim_start_matches('/')
    }

    /// Own address for peer self-detection
    pub fn own_ip(&self) -> Option<IpAddr> {
        self.server_addr.or(self.local_addr)
    }
}

fn find<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// `/path?query` part of an absolute URL
fn request_target(url: &str) -> &str {
    let after_scheme = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[after_scheme..].find('/') {
        Some(i) => &url[after_scheme + i..],
        None => "/",
    }
}
