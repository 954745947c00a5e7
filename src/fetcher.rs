use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use rand::seq::SliceRandom;
use regex::bytes::Regex;
use reqwest::header::{CONTENT_TYPE, COOKIE, USER_AGENT};
use reqwest::{Client, Method, StatusCode};

use crate::error::FetchError;
use crate::proxy::ProxySelector;
use crate::request::Request;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/119.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Mobile Safari/537.36",
];

/// Retrieves the body of a request.
///
/// Implementations return the body as UTF-8, whatever the page was encoded
/// with.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, req: &Request) -> Result<Vec<u8>, FetchError>;
}

// How much of the body is scanned for a `<meta charset>` declaration.
const SNIFF_LEN: usize = 1024;

/// Plain request with the request's method, no headers.
#[derive(Clone, Default)]
pub struct BaseFetcher {
    client: Client,
}

impl BaseFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Fetcher for BaseFetcher {
    async fn get(&self, req: &Request) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .request(method(req)?, &req.url)
            .send()
            .await?;
        decode(&req.url, response).await
    }
}

/// Fetches like a browser would: random user agent, the task's cookie, and
/// optionally a proxy picked per request.
#[derive(Clone)]
pub struct BrowserFetcher {
    client: Client,
}

impl BrowserFetcher {
    pub fn new(
        timeout: Duration,
        proxy: Option<Arc<dyn ProxySelector>>,
    ) -> Result<Self, FetchError> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(selector) = proxy {
            builder = builder.proxy(reqwest::Proxy::custom(move |url| {
                match selector.select_proxy(url) {
                    Ok(proxy_url) => Some(proxy_url),
                    Err(e) => {
                        log::error!("no proxy for {}: {}", url, e);
                        None
                    }
                }
            }));
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    async fn get(&self, req: &Request) -> Result<Vec<u8>, FetchError> {
        let method = method(req)?;
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let mut builder = self
            .client
            .request(method, &req.url)
            .header(USER_AGENT, user_agent);
        if !req.task.property.cookie.is_empty() {
            builder = builder.header(COOKIE, &req.task.property.cookie);
        }

        let response = builder.send().await.map_err(|e| {
            log::error!("fetch {} failed: {}", req.url, e);
            e
        })?;
        decode(&req.url, response).await
    }
}

fn method(req: &Request) -> Result<Method, FetchError> {
    Method::from_bytes(req.method.as_bytes())
        .map_err(|e| FetchError::Transport(format!("bad method `{}`: {}", req.method, e)))
}

async fn decode(url: &str, response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
    if response.status() != StatusCode::OK {
        log::warn!("{} returned status {}", url, response.status());
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response.bytes().await?;
    Ok(to_utf8(content_type.as_deref(), &body).into_bytes())
}

/// Re-encodes `body` as UTF-8.
///
/// The source encoding is taken from, in order: a byte order mark, the
/// charset of the Content-Type header, a `<meta>` charset declared in the
/// first kilobyte. UTF-8 otherwise.
pub fn to_utf8(content_type: Option<&str>, body: &[u8]) -> String {
    let encoding = determine_encoding(content_type, body);
    let (text, _, had_errors) = encoding.decode(body);
    if had_errors {
        log::debug!("malformed {} sequences replaced", encoding.name());
    }
    text.into_owned()
}

fn determine_encoding(content_type: Option<&str>, body: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(body) {
        return encoding;
    }
    if let Some(encoding) = content_type.and_then(charset_param) {
        return encoding;
    }
    let head = &body[..body.len().min(SNIFF_LEN)];
    meta_charset(head).unwrap_or(UTF_8)
}

fn charset_param(content_type: &str) -> Option<&'static Encoding> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .and_then(|(_, value)| {
            Encoding::for_label(value.trim().trim_matches('"').as_bytes())
        })
}

fn meta_charset(head: &[u8]) -> Option<&'static Encoding> {
    static META: OnceLock<Option<Regex>> = OnceLock::new();
    let re = META
        .get_or_init(|| {
            Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#).ok()
        })
        .as_ref()?;
    let label = re.captures(head)?.get(1)?;
    Encoding::for_label(label.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleTree;
    use crate::task::{Property, Task};

    fn gbk_page(head: &str) -> Vec<u8> {
        let (title, _, _) = encoding_rs::GBK.encode("中文标题");
        let mut page = format!("<html><head>{}</head><body><h1>", head).into_bytes();
        page.extend_from_slice(&title);
        page.extend_from_slice(b"</h1></body></html>");
        page
    }

    #[test]
    fn test_meta_charset_decoded() {
        let page = gbk_page(r#"<meta charset="gbk">"#);
        assert!(to_utf8(None, &page).contains("中文标题"));

        let page = gbk_page(
            r#"<meta http-equiv="Content-Type" content="text/html; charset=GB2312">"#,
        );
        assert!(to_utf8(Some("text/html"), &page).contains("中文标题"));
    }

    #[test]
    fn test_header_charset_wins_over_meta() {
        let page = gbk_page(r#"<meta charset="utf-8">"#);
        assert!(to_utf8(Some("text/html; charset=GBK"), &page).contains("中文标题"));
    }

    #[test]
    fn test_meta_beyond_first_kilobyte_ignored() {
        let padding = " ".repeat(SNIFF_LEN);
        let page = gbk_page(&format!(r#"{}<meta charset="gbk">"#, padding));
        assert!(!to_utf8(None, &page).contains("中文标题"));
    }

    #[test]
    fn test_bom_and_default() {
        let mut page = vec![0xEF, 0xBB, 0xBF];
        page.extend_from_slice("héllo".as_bytes());
        assert_eq!(to_utf8(Some("text/html; charset=iso-8859-1"), &page), "héllo");
        assert_eq!(to_utf8(None, "plain ü".as_bytes()), "plain ü");
    }

    #[test]
    fn test_method_from_request() {
        let property = Property {
            name: "m".to_owned(),
            ..Default::default()
        };
        let task = Arc::new(Task::new(property, RuleTree::default()));
        let req = Request::new(task, "https://example.com", "r");
        assert_eq!(method(&req).unwrap(), Method::GET);
        assert_eq!(method(&req.clone().with_method("POST")).unwrap(), Method::POST);
        assert!(matches!(
            method(&req.with_method("BAD METHOD")),
            Err(FetchError::Transport(_))
        ));
    }
}
