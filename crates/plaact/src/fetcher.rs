use std::fmt::Display;
use std::future::Future;

use encoding_rs::{BIG5, Encoding, UTF_8};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;

use crate::config::{CrawlerConfig, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP client could not be built: {0}")]
    Client(#[from] reqwest::Error),
    #[error("Gave up on {url} after {attempts} attempt(s): {reason}")]
    Exhausted {
        url: String,
        attempts: u32,
        reason: String,
    },
}

/// Page retrieval as the pipeline sees it. A failure means the page state is
/// unknown, never that it is empty.
pub trait Fetch {
    fn fetch(
        &self,
        url: &str,
        policy: &RetryPolicy,
    ) -> impl Future<Output = Result<String, FetchError>>;
}

const FALLBACK_ENCODINGS: [&Encoding; 2] = [UTF_8, BIG5];

/// How many leading bytes are sniffed for a `<meta>` charset declaration.
const SNIFF_LIMIT: usize = 2048;

fn charset_label(text: &str) -> Option<&str> {
    let lower = text.to_ascii_lowercase();
    let start = lower.find("charset=")? + "charset=".len();
    let value = text[start..].trim_start_matches(['"', '\'', ' ']);
    let end = value
        .find(|c: char| matches!(c, '"' | '\'' | ';' | '>' | ' ' | '/'))
        .unwrap_or(value.len());
    let label = value[..end].trim();
    (!label.is_empty()).then_some(label)
}

/// Encoding named by a `Content-Type` header value.
pub fn declared_encoding(content_type: &str) -> Option<&'static Encoding> {
    charset_label(content_type).and_then(|label| Encoding::for_label(label.as_bytes()))
}

/// Encoding guessed from the payload itself: a byte-order mark, then a
/// `<meta>` charset near the top of the document.
pub fn sniff_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return Some(encoding);
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(SNIFF_LIMIT)]);
    let lower = head.to_ascii_lowercase();
    let meta = lower.find("<meta")?;
    charset_label(&head[meta..]).and_then(|label| Encoding::for_label(label.as_bytes()))
}

/// Decodes a payload, trying the declared encoding, the sniffed one and the
/// fallback list in turn. Each candidate must decode without errors; if none
/// does, the bytes are decoded as UTF-8 with replacement characters.
pub fn decode_body(bytes: &[u8], declared: Option<&'static Encoding>) -> String {
    let candidates = declared
        .into_iter()
        .chain(sniff_encoding(bytes))
        .chain(FALLBACK_ENCODINGS);

    for encoding in candidates {
        let text = match Encoding::for_bom(bytes) {
            Some((bom_encoding, len)) if bom_encoding == encoding => &bytes[len..],
            _ => bytes,
        };
        if let Some(decoded) = encoding.decode_without_bom_handling_and_without_replacement(text) {
            log::debug!("Decoded {} bytes as {}", bytes.len(), encoding.name());
            return decoded.into_owned();
        }
    }

    log::warn!("No encoding decoded the page cleanly, substituting replacement characters");
    let (decoded, _, _) = UTF_8.decode(bytes);
    decoded.into_owned()
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &CrawlerConfig) -> Result<Self, FetchError> {
        let client = Client::builder().user_agent(config.user_agent.as_str()).build()?;
        Ok(Self { client })
    }

    async fn get_once(&self, url: &str, policy: &RetryPolicy) -> Result<String, reqwest::Error> {
        let response = self
            .client
            .get(url)
            .timeout(policy.timeout())
            .send()
            .await?
            .error_for_status()?;

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(declared_encoding);

        let bytes = response.bytes().await?;
        Ok(decode_body(&bytes, declared))
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str, policy: &RetryPolicy) -> Result<String, FetchError> {
        with_retries(url, policy, |_| self.get_once(url, policy)).await
    }
}

/// Runs `attempt` up to `policy.max_retries` times, sleeping
/// `policy.backoff(n)` after the n-th failure. There is no sleep after the
/// last attempt.
pub async fn with_retries<T, E, Fut, Op>(
    url: &str,
    policy: &RetryPolicy,
    mut attempt_once: Op,
) -> Result<T, FetchError>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match attempt_once(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_retries => {
                log::error!("Giving up on {} after {} attempt(s): {}", url, attempt, e);
                return Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                let wait = policy.backoff(attempt);
                log::warn!(
                    "Attempt {}/{} failed for {}: {} (retrying in {:?})",
                    attempt,
                    policy.max_retries,
                    url,
                    e,
                    wait
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn no_wait(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, 1, 0)
    }

    #[test]
    fn test_declared_encoding_from_header() {
        assert_eq!(declared_encoding("text/html; charset=Big5"), Some(BIG5));
        assert_eq!(declared_encoding("text/html; charset=\"utf-8\""), Some(UTF_8));
        assert_eq!(declared_encoding("text/html"), None);
        assert_eq!(declared_encoding("text/html; charset=klingon"), None);
    }

    #[test]
    fn test_sniff_meta_charset() {
        let html =
            br#"<html><head><meta http-equiv="Content-Type" content="text/html; charset=big5"></head>"#;
        assert_eq!(sniff_encoding(html), Some(BIG5));
        let html5 = br#"<!DOCTYPE html><html><head><meta charset="UTF-8"/></head>"#;
        assert_eq!(sniff_encoding(html5), Some(UTF_8));
        assert_eq!(sniff_encoding(b"<html><body>plain</body></html>"), None);
    }

    #[test]
    fn test_decode_utf8_with_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("國防部".as_bytes());
        assert_eq!(decode_body(&bytes, None), "國防部");
    }

    #[test]
    fn test_decode_falls_back_to_big5() {
        let (bytes, _, had_errors) = BIG5.encode("臺海周邊空域空情動態");
        assert!(!had_errors);
        assert_eq!(decode_body(&bytes, None), "臺海周邊空域空情動態");
    }

    #[test]
    fn test_decode_skips_wrong_declared_encoding() {
        let (bytes, _, _) = BIG5.encode("國防部");
        assert_eq!(decode_body(&bytes, Some(UTF_8)), "國防部");
    }

    #[test]
    fn test_decode_never_fails() {
        let bytes = [0x66, 0x6f, 0x6f, 0xff, 0xff];
        let decoded = decode_body(&bytes, None);
        assert!(decoded.starts_with("foo"));
        assert!(decoded.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Cell::new(0);
        let result = with_retries("https://x.test/a", &no_wait(3), |attempt| {
            calls.set(calls.get() + 1);
            async move {
                if attempt < 3 {
                    Err(format!("timeout on attempt {}", attempt))
                } else {
                    Ok("<html></html>".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "<html></html>");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_first_success_makes_one_attempt() {
        let calls = Cell::new(0);
        let result = with_retries("https://x.test/b", &no_wait(5), |_| {
            calls.set(calls.get() + 1);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_retries() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retries("https://x.test/c", &no_wait(4), |attempt| {
            calls.set(calls.get() + 1);
            async move { Err(format!("HTTP 503 on attempt {}", attempt)) }
        })
        .await;

        assert_eq!(calls.get(), 4);
        match result {
            Err(FetchError::Exhausted {
                url,
                attempts,
                reason,
            }) => {
                assert_eq!(url, "https://x.test/c");
                assert_eq!(attempts, 4);
                assert_eq!(reason, "HTTP 503 on attempt 4");
            }
            other => panic!("Expected exhaustion, got {:?}", other),
        }
    }
}
