// Splitting oversized session values across numbered cookies
use std::collections::{BTreeMap, HashMap};

use actix_web::cookie::Cookie;

use crate::error::SessionError;
use crate::session::cookie::{CookieFactory, CookieOptions};

/// Largest value stored in one cookie: 4096 bytes less an estimate for the
/// name and attributes
pub const CHUNK_SIZE: usize = 4096 - 160;

/// Cookies that store `value` under `name`, split as `name.0`, `name.1`, ...
/// when it does not fit in one cookie
///
/// `existing` is the request's cookie jar; chunks it carries that the new
/// value does not overwrite are expired.
#[must_use]
pub fn write_chunked(
    factory: &CookieFactory,
    name: &str,
    value: &str,
    options: &CookieOptions,
    existing: &HashMap<String, String>,
) -> Vec<Cookie<'static>> {
    let pieces = split(value, CHUNK_SIZE);
    let mut cookies = Vec::with_capacity(pieces.len() + 1);
    let mut written = Vec::with_capacity(pieces.len());

    if pieces.len() == 1 {
        cookies.push(factory.create_cookie(name, value.to_string(), options.clone()));
        written.push(name.to_string());
    } else {
        for (index, piece) in pieces.iter().enumerate() {
            let chunk_name = format!("{name}.{index}");
            cookies.push(factory.create_cookie(&chunk_name, (*piece).to_string(), options.clone()));
            written.push(chunk_name);
        }
        log::debug!("Session value of {} bytes split into {} cookies", value.len(), pieces.len());
    }

    for stale in related_names(name, existing) {
        if !written.contains(&stale) {
            cookies.push(factory.create_expired_cookie(&stale));
        }
    }
    cookies
}

/// Reassemble the value stored under `name`
///
/// Chunks are ordered by their parsed index, never by jar order. A gap in
/// the indices fails with [`SessionError::MissingChunk`].
///
/// # Errors
///
/// Returns [`SessionError::MissingChunk`] when an index is absent
pub fn read_chunked(name: &str, cookies: &HashMap<String, String>) -> Result<Option<String>, SessionError> {
    let prefix = format!("{name}.");
    let chunks: BTreeMap<usize, &str> = cookies
        .iter()
        .filter_map(|(key, value)| {
            let index = key.strip_prefix(&prefix)?.parse::<usize>().ok()?;
            Some((index, value.as_str()))
        })
        .collect();

    if chunks.is_empty() {
        return Ok(cookies.get(name).filter(|v| !v.is_empty()).cloned());
    }

    let mut value = String::new();
    for (expected, (index, chunk)) in chunks.iter().enumerate() {
        if *index != expected {
            return Err(SessionError::MissingChunk(expected));
        }
        value.push_str(chunk);
    }
    Ok(Some(value))
}

/// Expire the plain cookie and every chunk of `name` the request carries
#[must_use]
pub fn clear_chunked(
    factory: &CookieFactory,
    name: &str,
    existing: &HashMap<String, String>,
) -> Vec<Cookie<'static>> {
    let mut names = related_names(name, existing);
    if !names.iter().any(|n| n == name) {
        names.push(name.to_string());
    }
    names.iter().map(|n| factory.create_expired_cookie(n)).collect()
}

/// `name` and `name.<index>` entries present in the jar
fn related_names(name: &str, existing: &HashMap<String, String>) -> Vec<String> {
    let prefix = format!("{name}.");
    let mut names: Vec<String> = existing
        .keys()
        .filter(|key| {
            *key == name
                || key
                    .strip_prefix(&prefix)
                    .is_some_and(|index| index.parse::<usize>().is_ok())
        })
        .cloned()
        .collect();
    names.sort();
    names
}

/// Split on character boundaries into pieces of at most `size` bytes
fn split(value: &str, size: usize) -> Vec<&str> {
    if value.len() <= size {
        return vec![value];
    }
    let mut pieces = Vec::with_capacity(value.len() / size + 1);
    let mut rest = value;
    while !rest.is_empty() {
        let mut end = size.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        pieces.push(head);
        rest = tail;
    }
    pieces
}
