use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::error::{CrawlError, FetchError};
use crate::task::Task;
use crate::util;

pub const DEFAULT_METHOD: &str = "GET";

/// Scratch values handed from the fetcher to the parse function.
///
/// Clones share the same underlying map, so a retried request sees what the
/// first attempt stored.
#[derive(Clone, Debug, Default)]
pub struct Temp {
    data: Arc<Mutex<HashMap<String, serde_json::Value>>>,
}

impl Temp {
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let data = util::lock(&self.data);
        data.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut data = util::lock(&self.data);
        data.insert(key.into(), value);
    }
}

/// One unit of crawl work.
#[derive(Clone)]
pub struct Request {
    pub task: Arc<Task>,
    pub url: String,
    pub method: String,
    /// Hops from the seed request, which sits at depth 0.
    pub depth: u32,
    /// 0 is normal, anything above is scheduled ahead of normal requests.
    pub priority: u32,
    pub rule_name: String,
    pub temp: Temp,
}

impl Request {
    pub fn new(task: Arc<Task>, url: impl Into<String>, rule_name: impl Into<String>) -> Self {
        Self {
            task,
            url: url.into(),
            method: DEFAULT_METHOD.to_owned(),
            depth: 0,
            priority: 0,
            rule_name: rule_name.into(),
            temp: Temp::default(),
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Fails when the request is deeper than its task allows.
    pub fn check(&self) -> Result<(), CrawlError> {
        if self.depth > self.task.max_depth() {
            return Err(CrawlError::DepthExceeded {
                url: self.url.clone(),
                depth: self.depth,
                max_depth: self.task.max_depth(),
            });
        }
        Ok(())
    }

    /// Fingerprint used for dedup and failure bookkeeping: hex md5 of the
    /// url followed by the method.
    pub fn unique(&self) -> String {
        let mut input = String::with_capacity(self.url.len() + self.method.len());
        input.push_str(&self.url);
        input.push_str(&self.method);
        format!("{:x}", md5::compute(input.as_bytes()))
    }

    /// Rate limit, random pacing delay, then the task's fetcher.
    pub async fn fetch(&self, deadline: Option<Instant>) -> Result<Vec<u8>, FetchError> {
        if let Some(limiter) = &self.task.limiter {
            limiter.wait(deadline).await?;
        }

        let wait_time = self.task.property.wait_time;
        if wait_time > 0 {
            let millis = rand::thread_rng().gen_range(0..wait_time * 1000);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        match &self.task.fetcher {
            Some(fetcher) => fetcher.get(self).await,
            None => Err(FetchError::NoFetcher(self.task.name().to_owned())),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("task", &self.task.name())
            .field("url", &self.url)
            .field("method", &self.method)
            .field("depth", &self.depth)
            .field("priority", &self.priority)
            .field("rule_name", &self.rule_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleTree;
    use crate::task::Property;

    fn task(max_depth: u32) -> Arc<Task> {
        let property = Property {
            name: "books".to_owned(),
            max_depth,
            ..Default::default()
        };
        Arc::new(Task::new(property, RuleTree::default()))
    }

    #[test]
    fn test_unique_is_deterministic() {
        let task = task(3);
        let a = Request::new(task.clone(), "https://example.com/a", "list");
        let b = Request::new(task.clone(), "https://example.com/a", "detail")
            .with_depth(2)
            .with_priority(5);
        assert_eq!(a.unique(), b.unique());
        assert_eq!(a.unique().len(), 32);
        // md5("https://example.com/aGET")
        assert_eq!(a.unique(), format!("{:x}", md5::compute("https://example.com/aGET")));
    }

    #[test]
    fn test_unique_changes_with_url_or_method() {
        let task = task(3);
        let a = Request::new(task.clone(), "https://example.com/a", "list");
        let b = Request::new(task.clone(), "https://example.com/b", "list");
        let c = a.clone().with_method("POST");
        assert_ne!(a.unique(), b.unique());
        assert_ne!(a.unique(), c.unique());
    }

    #[test]
    fn test_check_depth() {
        let task = task(1);
        assert!(Request::new(task.clone(), "u", "r").check().is_ok());
        assert!(Request::new(task.clone(), "u", "r").with_depth(1).check().is_ok());
        let err = Request::new(task, "u", "r").with_depth(2).check().unwrap_err();
        assert!(matches!(err, CrawlError::DepthExceeded { depth: 2, max_depth: 1, .. }));
    }

    #[tokio::test]
    async fn test_fetch_without_fetcher() {
        let req = Request::new(task(1), "https://example.com", "r");
        let err = req.fetch(None).await.unwrap_err();
        assert!(matches!(err, FetchError::NoFetcher(name) if name == "books"));
    }

    #[test]
    fn test_temp_shared_between_clones() {
        let req = Request::new(task(1), "https://example.com", "r");
        let retry = req.clone();
        req.temp.set("page", serde_json::json!(3));
        assert_eq!(retry.temp.get("page"), Some(serde_json::json!(3)));
        assert_eq!(retry.temp.get("missing"), None);
    }
}
