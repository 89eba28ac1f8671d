use crate::device::Callback;
use crate::error::HubError;
use crate::options::{self, Options, to_int};
use crate::urlcode;

const DEFAULT_PORT: u16 = 80;

/// Reads the `callback` and `auth_header` options.
///
/// A missing or empty `callback` is not an error and yields `None`.
pub fn validate_callback(opts: &Options) -> Result<Option<Callback>, HubError> {
    let url = options::get(opts, "callback").unwrap_or("");
    if url.is_empty() {
        return Ok(None);
    }
    let auth = options::get(opts, "auth_header")
        .map(|a| a.replace('+', " "))
        .unwrap_or_default();
    parse_callback_url(url, &auth).map(Some)
}

/// Splits `[scheme://]host[:port]/path` into a [`Callback`]. Only plain
/// http is supported.
pub fn parse_callback_url(url: &str, auth: &str) -> Result<Callback, HubError> {
    if url.starts_with("https") {
        return Err(HubError::InvalidCallback("https not supported".into()));
    }

    let rest = match url.find("://") {
        Some(pos) => &url[pos + 3..],
        None => url,
    };

    let slash = match rest.find('/') {
        Some(pos) if pos >= 1 => pos,
        _ => return Err(HubError::InvalidCallback(rest.to_string())),
    };

    let authority = &rest[..slash];
    let path = &rest[slash..];
    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, to_int(port).clamp(0, i64::from(u16::MAX)) as u16),
        None => (authority, DEFAULT_PORT),
    };

    Ok(Callback::new(host, port, path, auth))
}

/// Reads a callback back from its `host:port/path` display form. No scheme
/// is expected, so the authority is everything before the first `/`.
pub fn parse_stored_callback(text: &str, auth: &str) -> Result<Callback, HubError> {
    let (authority, path) = match text.find('/') {
        Some(pos) if pos >= 1 => text.split_at(pos),
        _ => return Err(HubError::InvalidCallback(text.to_string())),
    };
    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| HubError::InvalidCallback(format!("bad port in {text}")))?;
            (host, port)
        }
        None => (authority, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(HubError::InvalidCallback(text.to_string()));
    }
    Ok(Callback::new(host, port, path, auth))
}

/// Substitutes every `<name>` placeholder of `template` with the
/// percent-encoded value.
pub fn render_path(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |path, (name, value)| {
            path.replace(&format!("<{name}>"), &urlcode::encode(value))
        })
}
