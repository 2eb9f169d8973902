// src/engine/registry.rs

//! Command registry: name -> argument schema + run routine.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::engine::runtime::Scope;
use crate::errors::Result;

/// Argument map handed to a command's run routine.
pub type Args = BTreeMap<String, Value>;

/// Declared type of a single argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Bool,
    Number,
    List,
}

/// One declared argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgSpec {
    pub name: String,
    pub kind: ArgKind,
    pub required: bool,
    pub default: Option<Value>,
}

impl ArgSpec {
    pub fn new(name: impl Into<String>, kind: ArgKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Declared arguments of a command.
///
/// The positional bucket `_` is always accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgSchema {
    args: Vec<ArgSpec>,
}

/// Result of validating an argument map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validated {
    pub args: Args,
    /// Keys dropped because they were forwarded and not declared here.
    pub ignored: Vec<String>,
}

impl ArgSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.args.push(spec);
        self
    }

    pub fn specs(&self) -> &[ArgSpec] {
        &self.args
    }

    fn spec(&self, name: &str) -> Option<&ArgSpec> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Check, coerce and default `args`.
    ///
    /// Unknown keys fail a direct invocation; for a forwarded one they are
    /// collected in [`Validated::ignored`] and dropped. Errors are plain
    /// messages; the caller attaches the context prefix.
    pub fn validate(&self, args: Args, forwarded: bool) -> std::result::Result<Validated, String> {
        let mut out = Validated::default();

        for (key, value) in args {
            if key == "_" {
                out.args.insert(key, value);
                continue;
            }
            let Some(spec) = self.spec(&key) else {
                if forwarded {
                    out.ignored.push(key);
                    continue;
                }
                return Err(format!("unknown argument `{key}`"));
            };
            let value = coerce(spec, value)?;
            out.args.insert(key, value);
        }

        for spec in &self.args {
            if out.args.contains_key(&spec.name) {
                continue;
            }
            if let Some(default) = &spec.default {
                out.args.insert(spec.name.clone(), default.clone());
            } else if spec.required {
                return Err(format!("missing required argument `{}`", spec.name));
            }
        }

        Ok(out)
    }
}

fn coerce(spec: &ArgSpec, value: Value) -> std::result::Result<Value, String> {
    let mismatch = |v: &Value| {
        format!(
            "argument `{}` expects {:?}, got {v}",
            spec.name, spec.kind
        )
    };
    match (spec.kind, value) {
        (ArgKind::String, Value::String(s)) => Ok(Value::String(s)),
        (ArgKind::String, v @ (Value::Number(_) | Value::Bool(_))) => Ok(Value::String(v.to_string())),
        (ArgKind::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (ArgKind::Bool, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(mismatch(&Value::String(s))),
        },
        (ArgKind::Number, Value::Number(n)) => Ok(Value::Number(n)),
        (ArgKind::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|f| {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    Some(Value::from(f as i64))
                } else {
                    serde_json::Number::from_f64(f).map(Value::Number)
                }
            })
            .ok_or_else(|| mismatch(&Value::String(s))),
        (ArgKind::List, Value::Array(items)) => Ok(Value::Array(items)),
        (ArgKind::List, v) => Ok(Value::Array(vec![v])),
        (_, v) => Err(mismatch(&v)),
    }
}

/// A command's run routine.
pub trait CommandHandler: Send + Sync {
    fn run(&self, scope: Scope, args: Args) -> BoxFuture<'static, Result<()>>;
}

impl<F, Fut> CommandHandler for F
where
    F: Fn(Scope, Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn run(&self, scope: Scope, args: Args) -> BoxFuture<'static, Result<()>> {
        (self)(scope, args).boxed()
    }
}

/// Resolves command names for the scheduler.
pub trait CommandRegistry: Send + Sync {
    fn handler(&self, name: &str) -> Option<Arc<dyn CommandHandler>>;

    /// Validate `args` for `name`. `None` if the command is unknown.
    fn validate(
        &self,
        name: &str,
        args: Args,
        forwarded: bool,
    ) -> Option<std::result::Result<Validated, String>>;
}

struct Entry {
    schema: ArgSchema,
    handler: Arc<dyn CommandHandler>,
}

/// In-memory registry built from closures.
#[derive(Default)]
pub struct Registry {
    commands: HashMap<String, Entry>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.commands.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("commands", &names).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`; a later registration under the same name replaces
    /// the earlier one.
    pub fn command<F, Fut>(self, name: impl Into<String>, schema: ArgSchema, handler: F) -> Self
    where
        F: Fn(Scope, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(name, schema, Arc::new(handler))
    }

    /// Register an already boxed handler.
    pub fn register(
        mut self,
        name: impl Into<String>,
        schema: ArgSchema,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        self.commands.insert(name.into(), Entry { schema, handler });
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl CommandRegistry for Registry {
    fn handler(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.commands.get(name).map(|e| e.handler.clone())
    }

    fn validate(
        &self,
        name: &str,
        args: Args,
        forwarded: bool,
    ) -> Option<std::result::Result<Validated, String>> {
        self.commands
            .get(name)
            .map(|e| e.schema.validate(args, forwarded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ArgSchema {
        ArgSchema::new()
            .arg(ArgSpec::new("env", ArgKind::String).required())
            .arg(ArgSpec::new("force", ArgKind::Bool).default_value(false))
            .arg(ArgSpec::new("jobs", ArgKind::Number))
            .arg(ArgSpec::new("tag", ArgKind::List))
    }

    fn args(v: Value) -> Args {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn coerces_and_defaults() {
        let v = schema()
            .validate(args(json!({"env": "prod", "jobs": "4", "tag": "v1"})), false)
            .unwrap();
        assert_eq!(v.args["env"], json!("prod"));
        assert_eq!(v.args["force"], json!(false));
        assert_eq!(v.args["jobs"], json!(4));
        assert_eq!(v.args["tag"], json!(["v1"]));
        assert!(v.ignored.is_empty());
    }

    #[test]
    fn bool_from_shorthand_string() {
        let v = schema()
            .validate(args(json!({"env": "x", "force": "yes"})), false)
            .unwrap();
        assert_eq!(v.args["force"], json!(true));
        assert!(schema()
            .validate(args(json!({"env": "x", "force": "maybe"})), false)
            .is_err());
    }

    #[test]
    fn unknown_keys_fail_direct_but_are_dropped_when_forwarded() {
        let input = args(json!({"env": "x", "verbose": true}));
        let err = schema().validate(input.clone(), false).unwrap_err();
        assert!(err.contains("verbose"));

        let v = schema().validate(input, true).unwrap();
        assert_eq!(v.ignored, vec!["verbose".to_string()]);
        assert!(!v.args.contains_key("verbose"));
    }

    #[test]
    fn missing_required_argument() {
        let err = schema().validate(Args::new(), false).unwrap_err();
        assert!(err.contains("env"));
    }

    #[test]
    fn positionals_are_always_accepted() {
        let v = ArgSchema::new()
            .validate(args(json!({"_": ["a", "b"]})), false)
            .unwrap();
        assert_eq!(v.args["_"], json!(["a", "b"]));
    }
}
