//! Rule trees: how a task produces its first requests and how each fetched
//! page is turned into new requests and extracted items.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use regex::bytes::Regex;

use crate::error::RuleError;
use crate::request::Request;
use crate::script::{RequestBinder, ScriptEngine};
use crate::storage::DataCell;
use crate::task::Task;
use crate::util;

pub type StaticParseFn = dyn Fn(&Context) -> Result<ParseResult, RuleError> + Send + Sync;
pub type StaticRootFn = dyn Fn(&Arc<Task>) -> Result<Vec<Request>, RuleError> + Send + Sync;

/// Parse logic of a rule, compiled in or backed by a script.
#[derive(Clone)]
pub enum ParseFunc {
    Static(Arc<StaticParseFn>),
    Script {
        engine: Arc<dyn ScriptEngine>,
        script: String,
    },
}

impl ParseFunc {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Context) -> Result<ParseResult, RuleError> + Send + Sync + 'static,
    {
        Self::Static(Arc::new(f))
    }

    pub fn evaluate(&self, ctx: &Context) -> Result<ParseResult, RuleError> {
        match self {
            Self::Static(f) => f(ctx),
            Self::Script { engine, script } => Ok(engine.evaluate_rule(script, ctx)?),
        }
    }
}

impl fmt::Debug for ParseFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("ParseFunc::Static"),
            Self::Script { script, .. } => write!(f, "ParseFunc::Script({} bytes)", script.len()),
        }
    }
}

/// Produces the initial batch of requests of a task.
#[derive(Clone)]
pub enum RootFunc {
    Static(Arc<StaticRootFn>),
    Script {
        engine: Arc<dyn ScriptEngine>,
        script: String,
    },
}

impl RootFunc {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Arc<Task>) -> Result<Vec<Request>, RuleError> + Send + Sync + 'static,
    {
        Self::Static(Arc::new(f))
    }

    pub fn evaluate(&self, task: &Arc<Task>) -> Result<Vec<Request>, RuleError> {
        match self {
            Self::Static(f) => f(task),
            Self::Script { engine, script } => {
                let binder = RequestBinder::new(task.clone(), 0);
                Ok(engine.evaluate_root(script, &binder)?)
            }
        }
    }
}

impl Default for RootFunc {
    fn default() -> Self {
        Self::new(|_| Ok(vec![]))
    }
}

#[derive(Clone, Debug)]
pub struct Rule {
    /// Names of the fields this rule extracts.
    pub item_fields: Vec<String>,
    pub parse: ParseFunc,
}

impl Rule {
    pub fn new(parse: ParseFunc) -> Self {
        Self {
            item_fields: vec![],
            parse,
        }
    }

    pub fn with_item_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.item_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Clone, Default)]
pub struct RuleTree {
    pub root: RootFunc,
    /// Rule name to rule.
    pub trunk: HashMap<String, Rule>,
}

impl RuleTree {
    pub fn new(root: RootFunc) -> Self {
        Self {
            root,
            trunk: HashMap::new(),
        }
    }

    pub fn rule(mut self, name: impl Into<String>, rule: Rule) -> Self {
        self.trunk.insert(name.into(), rule);
        self
    }
}

#[derive(Clone, Debug)]
pub enum Item {
    /// Routed to the owning task's storage.
    Record(DataCell),
    /// Only logged.
    Data(serde_json::Value),
}

#[derive(Clone, Debug, Default)]
pub struct ParseResult {
    pub requests: Vec<Request>,
    pub items: Vec<Item>,
}

impl ParseResult {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.items.is_empty()
    }
}

/// Input of a single parse invocation.
#[derive(Debug)]
pub struct Context {
    pub body: Vec<u8>,
    pub req: Request,
}

impl Context {
    pub fn new(body: Vec<u8>, req: Request) -> Self {
        Self { body, req }
    }

    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.req.task.rule.trunk.get(name)
    }

    /// Wraps extracted data into a record of this task and rule.
    pub fn output(&self, data: serde_json::Value) -> DataCell {
        DataCell {
            task_name: self.req.task.name().to_owned(),
            rule_name: self.req.rule_name.clone(),
            url: self.req.url.clone(),
            time: Utc::now(),
            data,
        }
    }

    /// A `GET` request one hop below the current one.
    pub fn child(&self, url: impl Into<String>, rule_name: impl Into<String>) -> Request {
        Request::new(self.req.task.clone(), url, rule_name).with_depth(self.req.depth + 1)
    }

    /// Follows the first capture group of every match of `pattern`, resolved
    /// against the current url, with rule `rule_name`.
    pub fn follow_matches(&self, rule_name: &str, pattern: &str) -> Result<ParseResult, RuleError> {
        let re = Regex::new(pattern)?;
        let mut result = ParseResult::default();
        for caps in re.captures_iter(&self.body) {
            let Some(m) = caps.get(1) else {
                continue;
            };
            let link = String::from_utf8_lossy(m.as_bytes());
            let url = util::join_url(&self.req.url, &link)?;
            result.requests.push(self.child(url, rule_name));
        }
        Ok(result)
    }

    /// Emits the current url as an item if the body matches `pattern`.
    pub fn output_if_match(&self, pattern: &str) -> Result<ParseResult, RuleError> {
        let re = Regex::new(pattern)?;
        let mut result = ParseResult::default();
        if re.is_match(&self.body) {
            result
                .items
                .push(Item::Data(serde_json::Value::String(self.req.url.clone())));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Property;

    fn context(body: &str) -> Context {
        let property = Property {
            name: "forum".to_owned(),
            max_depth: 5,
            ..Default::default()
        };
        let tree = RuleTree::default().rule(
            "topic",
            Rule::new(ParseFunc::new(|_| Ok(ParseResult::default()))).with_item_fields(["title"]),
        );
        let task = Arc::new(Task::new(property, tree));
        let req = Request::new(task, "https://example.com/group/", "list").with_depth(1);
        Context::new(body.as_bytes().to_vec(), req)
    }

    #[test]
    fn test_follow_matches() {
        let ctx = context(
            r#"<a href="https://example.com/topic/1/">one</a>
               <a href="/topic/2/">two</a>"#,
        );
        let result = ctx
            .follow_matches("topic", r#"<a href="([^"]*/topic/[^"]+)""#)
            .unwrap();
        let urls: Vec<&str> = result.requests.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://example.com/topic/1/", "https://example.com/topic/2/"]
        );
        assert!(result.requests.iter().all(|r| r.depth == 2));
        assert!(result.requests.iter().all(|r| r.rule_name == "topic"));
        assert!(result.requests.iter().all(|r| r.method == "GET"));
    }

    #[test]
    fn test_follow_matches_bad_pattern() {
        let ctx = context("");
        assert!(matches!(
            ctx.follow_matches("topic", "(unclosed"),
            Err(RuleError::Pattern(_))
        ));
    }

    #[test]
    fn test_output_if_match() {
        let ctx = context("<div>sunny balcony</div>");
        let hit = ctx.output_if_match("balcony").unwrap();
        assert_eq!(hit.items.len(), 1);
        let miss = ctx.output_if_match("garden").unwrap();
        assert!(miss.is_empty());
    }

    #[test]
    fn test_output_record() {
        let ctx = context("");
        let cell = ctx.output(serde_json::json!({"title": "x"}));
        assert_eq!(cell.task_name, "forum");
        assert_eq!(cell.rule_name, "list");
        assert_eq!(cell.url, "https://example.com/group/");
        assert_eq!(cell.data["title"], "x");
    }

    #[test]
    fn test_rule_lookup() {
        let ctx = context("");
        assert_eq!(ctx.rule("topic").unwrap().item_fields, vec!["title"]);
        assert!(ctx.rule("missing").is_none());
    }
}
