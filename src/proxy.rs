use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use url::Url;

use crate::error::ProxyError;

/// Picks the proxy an outbound request goes through.
pub trait ProxySelector: Send + Sync + fmt::Debug {
    fn select_proxy(&self, target: &Url) -> Result<Url, ProxyError>;
}

/// Rotates through a fixed list of proxies, one step per request.
///
/// The proxy type follows the url scheme (`http`, `https`, `socks5`).
#[derive(Debug)]
pub struct RoundRobinProxy {
    proxy_urls: Vec<Url>,
    index: AtomicUsize,
}

impl RoundRobinProxy {
    pub fn new<S: AsRef<str>>(proxy_urls: &[S]) -> Result<Self, ProxyError> {
        if proxy_urls.is_empty() {
            return Err(ProxyError::Empty);
        }
        let proxy_urls = proxy_urls
            .iter()
            .map(|u| {
                Url::parse(u.as_ref()).map_err(|source| ProxyError::InvalidUrl {
                    url: u.as_ref().to_owned(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            proxy_urls,
            index: AtomicUsize::new(0),
        })
    }
}

impl ProxySelector for RoundRobinProxy {
    fn select_proxy(&self, _target: &Url) -> Result<Url, ProxyError> {
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        let url = &self.proxy_urls[index % self.proxy_urls.len()];
        Ok(url.clone())
    }
}
