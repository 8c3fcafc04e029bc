use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::error::BloomeoError;

pub mod bloomeo;

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const EXCERPT_CHARS: usize = 200;

pub(crate) fn env_base(default: &'static str, env_var: &str) -> Cow<'static, str> {
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Cow::Owned(value.trim().to_string()),
        _ => Cow::Borrowed(default),
    }
}

pub(crate) fn shared_client(
    timeout: Duration,
) -> Result<reqwest_middleware::ClientWithMiddleware, BloomeoError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("bloomeo-mcp/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(BloomeoError::HttpClientInit)?;
    Ok(reqwest_middleware::ClientBuilder::new(client).build())
}

/// Reads a response body, refusing anything past `MAX_BODY_BYTES`.
pub(crate) async fn read_limited_body(
    mut resp: reqwest::Response,
) -> Result<Vec<u8>, BloomeoError> {
    if let Some(len) = resp.content_length().filter(|len| *len as usize > MAX_BODY_BYTES) {
        return Err(BloomeoError::Api {
            message: format!("response body of {len} bytes exceeds the {MAX_BODY_BYTES} byte limit"),
        });
    }

    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        if body.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(BloomeoError::Api {
                message: format!("response body exceeds the {MAX_BODY_BYTES} byte limit"),
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

pub(crate) fn body_excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let compact = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= EXCERPT_CHARS {
        return compact;
    }
    let mut out: String = compact.chars().take(EXCERPT_CHARS).collect();
    out.push('…');
    out
}

fn path_segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._~-]{1,128}$").expect("path segment regex is valid")
    })
}

/// Validates an identifier before it is substituted into an endpoint path.
pub fn path_segment<'a>(label: &str, value: &'a str) -> Result<&'a str, BloomeoError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(BloomeoError::InvalidArgument(format!("{label} is required")));
    }
    if value == "." || value == ".." || !path_segment_re().is_match(value) {
        return Err(BloomeoError::InvalidArgument(format!(
            "{label} '{value}' contains unsupported characters"
        )));
    }
    Ok(value)
}
