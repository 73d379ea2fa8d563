//! Query-string helpers for CAS URLs

use url::form_urlencoded;

/// Appends `params` to `url`, using `&` when the URL already carries a query
/// string and `?` otherwise. Values are form-urlencoded.
pub fn build_uri<K, V>(url: &str, params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if params.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    let mut query = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        query.append_pair(key.as_ref(), value.as_ref());
    }
    format!("{}{}{}", url, separator, query.finish())
}

/// Splits a URL into its base and decoded query pairs, in order.
pub fn split_query(url: &str) -> (&str, Vec<(String, String)>) {
    match url.split_once('?') {
        Some((base, query)) => {
            let pairs = form_urlencoded::parse(query.as_bytes())
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
            (base, pairs)
        }
        None => (url, Vec::new()),
    }
}

/// Rebuilds `url` without the listed query parameters. A trailing `/` on the
/// base is dropped, as CAS servers compare service URLs textually.
pub fn strip_query_params(url: &str, remove: &[&str]) -> String {
    let (base, pairs) = split_query(url);
    let kept: Vec<(String, String)> = pairs
        .into_iter()
        .filter(|(key, _)| !remove.contains(&key.as_str()))
        .collect();
    build_uri(base.trim_end_matches('/'), &kept)
}

/// The URL without any query string or fragment.
pub fn without_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// URL-encodes a single value the way HTML forms do.
pub fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
