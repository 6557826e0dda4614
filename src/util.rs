use std::sync::Mutex;

use http::Method;
use url::Url;
use url::form_urlencoded::byte_serialize;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Appends `query_pairs` to `url` in order, percent-encoding names and values.
///
/// The base is left untouched: pairs go after `?`, or after `&` when the URL
/// already carries a query. A fragment stays at the end.
pub fn append_query_pairs(url: &str, query_pairs: &[(String, String)]) -> String {
    if query_pairs.is_empty() {
        return url.to_owned();
    }

    let (without_fragment, fragment) = match url.split_once('#') {
        Some((left, right)) => (left, Some(right)),
        None => (url, None),
    };

    let mut merged = String::with_capacity(without_fragment.len() + 16 * query_pairs.len());
    merged.push_str(without_fragment);
    if without_fragment.contains('?') {
        if !without_fragment.ends_with('?') && !without_fragment.ends_with('&') {
            merged.push('&');
        }
    } else {
        merged.push('?');
    }

    for (index, (name, value)) in query_pairs.iter().enumerate() {
        if index > 0 {
            merged.push('&');
        }
        merged.extend(byte_serialize(name.as_bytes()));
        merged.push('=');
        merged.extend(byte_serialize(value.as_bytes()));
    }

    if let Some(fragment) = fragment {
        merged.push('#');
        merged.push_str(fragment);
    }
    merged
}

pub(crate) fn is_http_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

pub(crate) fn resolve_redirect_url(current: &Url, location: &str) -> Option<Url> {
    current.join(location.trim()).ok()
}

pub(crate) fn redirect_method(method: &Method, status: u16) -> Method {
    match status {
        303 if *method != Method::HEAD => Method::GET,
        301 | 302 if *method == Method::POST => Method::GET,
        _ => method.clone(),
    }
}

pub(crate) fn same_origin(left: &Url, right: &Url) -> bool {
    left.origin() == right.origin()
}

pub(crate) const TRUNCATION_MARKER: &str = "...(truncated)";

pub(crate) fn truncate_body(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }

    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}{TRUNCATION_MARKER}")
}
