//! Dynamically defined rules.
//!
//! A [`TaskModel`] describes a task whose root and rules are scripts. The
//! scripts are run by a [`ScriptEngine`] supplied by the embedder; this crate
//! only fixes what the engine is handed and what it must give back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ScriptError;
use crate::request::{Request, DEFAULT_METHOD};
use crate::rule::{Context, ParseFunc, ParseResult, RootFunc, Rule, RuleTree};
use crate::task::{Property, Task};

/// Evaluates root and rule scripts.
///
/// Evaluations must be stateless: everything a script produces is returned,
/// nothing is kept between calls.
pub trait ScriptEngine: Send + Sync {
    /// Runs a root script. Scripts register their seed requests through
    /// `binder`.
    fn evaluate_root(
        &self,
        script: &str,
        binder: &RequestBinder,
    ) -> Result<Vec<Request>, ScriptError>;

    /// Runs a rule script with `ctx` bound as an input. Requests discovered
    /// by the script are built with [`RequestBinder::from_context`].
    fn evaluate_rule(&self, script: &str, ctx: &Context) -> Result<ParseResult, ScriptError>;
}

/// Turns plain key/value records coming out of a script into requests.
///
/// Keys: `Url` (string, required), `RuleName` (string), `Method` (string,
/// defaults to `GET`), `Priority` (non-negative integer).
pub struct RequestBinder {
    task: Arc<Task>,
    depth: u32,
}

impl RequestBinder {
    pub fn new(task: Arc<Task>, depth: u32) -> Self {
        Self { task, depth }
    }

    /// Binder for requests discovered while parsing `ctx`: same task, one
    /// hop deeper.
    pub fn from_context(ctx: &Context) -> Self {
        Self::new(ctx.req.task.clone(), ctx.req.depth + 1)
    }

    /// Converts every record; one malformed record fails the batch.
    pub fn requests(&self, records: &[Map<String, Value>]) -> Result<Vec<Request>, ScriptError> {
        records
            .iter()
            .enumerate()
            .map(|(index, record)| self.request(index, record))
            .collect()
    }

    fn request(&self, index: usize, record: &Map<String, Value>) -> Result<Request, ScriptError> {
        let url = record
            .get("Url")
            .and_then(Value::as_str)
            .ok_or(ScriptError::MissingUrl(index))?;

        let rule_name = match record.get("RuleName") {
            None | Some(Value::Null) => "",
            Some(v) => v
                .as_str()
                .ok_or(ScriptError::InvalidField { index, field: "RuleName" })?,
        };
        let method = match record.get("Method") {
            None | Some(Value::Null) => DEFAULT_METHOD,
            Some(v) => v
                .as_str()
                .ok_or(ScriptError::InvalidField { index, field: "Method" })?,
        };
        let priority = match record.get("Priority") {
            None | Some(Value::Null) => 0,
            Some(v) => v
                .as_u64()
                .and_then(|p| u32::try_from(p).ok())
                .ok_or(ScriptError::InvalidField { index, field: "Priority" })?,
        };

        Ok(Request::new(self.task.clone(), url, rule_name)
            .with_method(method)
            .with_depth(self.depth)
            .with_priority(priority))
    }
}

/// A task whose root and rules are scripts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskModel {
    #[serde(flatten)]
    pub property: Property,
    #[serde(rename = "root_script")]
    pub root: String,
    #[serde(rename = "rule", default)]
    pub rules: Vec<RuleModel>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleModel {
    pub name: String,
    #[serde(rename = "parse_script")]
    pub parse: String,
}

impl TaskModel {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Builds the task once; the parse functions it holds are reused for
    /// every invocation.
    pub fn into_task(self, engine: Arc<dyn ScriptEngine>) -> Task {
        let root = RootFunc::Script {
            engine: engine.clone(),
            script: self.root,
        };
        let mut tree = RuleTree::new(root);
        for rule in self.rules {
            let parse = ParseFunc::Script {
                engine: engine.clone(),
                script: rule.parse,
            };
            tree.trunk.insert(rule.name, Rule::new(parse));
        }
        Task::new(self.property, tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleError;
    use serde_json::json;

    fn records(value: Value) -> Vec<Map<String, Value>> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    fn task() -> Arc<Task> {
        let property = Property {
            name: "js".to_owned(),
            max_depth: 2,
            ..Default::default()
        };
        Arc::new(Task::new(property, RuleTree::default()))
    }

    /// Treats the script text as a JSON list of request records.
    struct JsonEngine;

    impl ScriptEngine for JsonEngine {
        fn evaluate_root(
            &self,
            script: &str,
            binder: &RequestBinder,
        ) -> Result<Vec<Request>, ScriptError> {
            let value: Value =
                serde_json::from_str(script).map_err(|e| ScriptError::Evaluation(e.to_string()))?;
            binder.requests(&records(value))
        }

        fn evaluate_rule(&self, script: &str, ctx: &Context) -> Result<ParseResult, ScriptError> {
            if script == "fail" {
                return Err(ScriptError::Evaluation("ReferenceError: ctx2".to_owned()));
            }
            let binder = RequestBinder::from_context(ctx);
            let value: Value =
                serde_json::from_str(script).map_err(|e| ScriptError::Evaluation(e.to_string()))?;
            Ok(ParseResult {
                requests: binder.requests(&records(value))?,
                items: vec![],
            })
        }
    }

    #[test]
    fn test_binder_defaults_and_fields() {
        let binder = RequestBinder::new(task(), 0);
        let reqs = binder
            .requests(&records(json!([
                {"Url": "https://example.com/a"},
                {"Url": "https://example.com/b", "RuleName": "detail", "Method": "POST", "Priority": 2},
            ])))
            .unwrap();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].method, "GET");
        assert_eq!(reqs[0].rule_name, "");
        assert_eq!(reqs[0].priority, 0);
        assert_eq!(reqs[1].rule_name, "detail");
        assert_eq!(reqs[1].method, "POST");
        assert_eq!(reqs[1].priority, 2);
        assert!(reqs.iter().all(|r| r.task.name() == "js" && r.depth == 0));
    }

    #[test]
    fn test_binder_rejects_missing_url() {
        let binder = RequestBinder::new(task(), 0);
        let err = binder
            .requests(&records(json!([{"Url": "https://example.com"}, {"RuleName": "x"}])))
            .unwrap_err();
        assert!(matches!(err, ScriptError::MissingUrl(1)));
    }

    #[test]
    fn test_binder_rejects_negative_priority() {
        let binder = RequestBinder::new(task(), 0);
        let err = binder
            .requests(&records(json!([{"Url": "u", "Priority": -1}])))
            .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidField { field: "Priority", .. }));
    }

    #[test]
    fn test_task_model_from_json() {
        let model = TaskModel::from_json(
            r#"{
                "name": "js_find",
                "url": "https://example.com",
                "wait_time": 2,
                "max_depth": 5,
                "root_script": "[{\"Url\": \"https://example.com/1\", \"RuleName\": \"topic\"}]",
                "rule": [{"name": "topic", "parse_script": "[]"}]
            }"#,
        )
        .unwrap();
        assert_eq!(model.property.name, "js_find");
        assert_eq!(model.property.wait_time, 2);
        assert!(!model.property.reload);
        assert_eq!(model.rules.len(), 1);
    }

    #[test]
    fn test_script_task_root_and_rules() {
        let model = TaskModel {
            property: Property {
                name: "js".to_owned(),
                max_depth: 3,
                ..Default::default()
            },
            root: r#"[{"Url": "https://example.com/list", "RuleName": "list"}]"#.to_owned(),
            rules: vec![
                RuleModel {
                    name: "list".to_owned(),
                    parse: r#"[{"Url": "https://example.com/item/1", "RuleName": "item"}]"#
                        .to_owned(),
                },
                RuleModel {
                    name: "broken".to_owned(),
                    parse: "fail".to_owned(),
                },
            ],
        };
        let task = Arc::new(model.into_task(Arc::new(JsonEngine)));

        let roots = task.rule.root.evaluate(&task).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].depth, 0);

        let ctx = Context::new(vec![], roots[0].clone());
        let result = task.rule.trunk["list"].parse.evaluate(&ctx).unwrap();
        assert_eq!(result.requests[0].url, "https://example.com/item/1");
        assert_eq!(result.requests[0].depth, 1);
        assert_eq!(result.requests[0].task.name(), "js");

        let err = task.rule.trunk["broken"].parse.evaluate(&ctx).unwrap_err();
        assert!(matches!(err, RuleError::Script(ScriptError::Evaluation(_))));
    }
}
