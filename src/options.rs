//! Key/value option bags as submitted by configuration clients.

use rustc_hash::FxHashMap;

use crate::urlcode;

pub type Options = FxHashMap<String, String>;

/// Splits a `key=value&key=value` payload. Parts without `=` are skipped
/// and each key and value is percent-decoded on its own, so an encoded
/// `&` inside a value survives.
pub fn parse_form(payload: &str) -> Options {
    payload
        .split('&')
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (urlcode::decode(k), urlcode::decode(v)))
        .collect()
}

/// Leading-integer parse: optional sign followed by digits, anything after
/// is ignored. Text without digits yields 0.
pub fn to_int(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }
    if negative { -value } else { value }
}

/// Leading-decimal parse with the same leniency as [`to_int`].
pub fn to_float(text: &str) -> f32 {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end = 1;
    }
    let mut seen_dot = false;
    while let Some(&b) = bytes.get(end) {
        match b {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    text[..end].parse::<f32>().unwrap_or(0.0)
}

pub fn get<'a>(options: &'a Options, key: &str) -> Option<&'a str> {
    options.get(key).map(String::as_str)
}
