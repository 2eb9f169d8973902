// src/engine/node.rs

//! Command specification nodes.
//!
//! Users hand [`RawNode`]s to `exec`: strings, `{name, args}` objects and
//! nested lists, as written in code or deserialized from JSON/TOML. They are
//! resolved exactly once, against the sequential mode of the context that
//! receives them, into the closed [`Node`] type the scheduler walks.
//!
//! String markers:
//! - `?text`          help text, printed as-is
//! - `@name args...`  sub-command reference
//! - `%cmd`           shell command without echo
//! - `%%cmd`          shell command without echo and without stdout
//! - anything else    shell command
//!
//! Lists alternate: a list met in sequential mode is a parallel fan-out, a
//! list met inside a parallel fan-out is a sequence.

use serde::Deserialize;
use serde_json::Value;

use crate::engine::registry::Args;
use crate::types::Verbosity;

/// Unresolved user input.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawNode {
    Null,
    Text(String),
    Ref {
        name: String,
        #[serde(default)]
        args: Args,
        /// Arguments are being forwarded from another command; unknown keys
        /// are dropped with a warning instead of failing.
        #[serde(default)]
        forward: bool,
    },
    List(Vec<RawNode>),
}

impl RawNode {
    /// Explicit sub-command reference.
    pub fn command(name: impl Into<String>, args: Args) -> Self {
        RawNode::Ref {
            name: name.into(),
            args,
            forward: false,
        }
    }

    /// Sub-command reference carrying forwarded arguments.
    pub fn forward(name: impl Into<String>, args: Args) -> Self {
        RawNode::Ref {
            name: name.into(),
            args,
            forward: true,
        }
    }

    /// Nested list (inverts the scheduling mode).
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<RawNode>,
    {
        RawNode::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for RawNode {
    fn from(s: &str) -> Self {
        RawNode::Text(s.to_string())
    }
}

impl From<String> for RawNode {
    fn from(s: String) -> Self {
        RawNode::Text(s)
    }
}

impl<T: Into<RawNode>> From<Option<T>> for RawNode {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(RawNode::Null)
    }
}

impl From<Vec<RawNode>> for RawNode {
    fn from(v: Vec<RawNode>) -> Self {
        RawNode::List(v)
    }
}

/// Reference to another registered command.
#[derive(Debug, Clone, PartialEq)]
pub struct SubCommandRef {
    pub name: String,
    pub args: Args,
    pub forwarded: bool,
}

/// Resolved, immutable specification node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Shell { command: String, verbosity: Verbosity },
    Help(String),
    SubCommand(SubCommandRef),
    Sequence(Vec<Node>),
    Parallel(Vec<Node>),
}

/// Resolve top-level nodes for a context in the given mode.
///
/// Errors are messages describing the malformed node; the caller attaches
/// the context prefix.
pub fn resolve(raw: &[RawNode], sequential: bool) -> Result<Vec<Node>, String> {
    let mut out = Vec::with_capacity(raw.len());
    for node in raw {
        if let Some(n) = resolve_node(node, sequential)? {
            out.push(n);
        }
    }
    Ok(out)
}

fn resolve_node(raw: &RawNode, sequential: bool) -> Result<Option<Node>, String> {
    match raw {
        RawNode::Null => Ok(None),
        RawNode::Text(text) => resolve_text(text),
        RawNode::Ref {
            name,
            args,
            forward,
        } => {
            if name.trim().is_empty() {
                return Err("sub-command reference with an empty name".to_string());
            }
            Ok(Some(Node::SubCommand(SubCommandRef {
                name: name.trim().to_string(),
                args: args.clone(),
                forwarded: *forward,
            })))
        }
        RawNode::List(items) => {
            // Elements are resolved in the opposite mode.
            let children = resolve(items, !sequential)?;
            Ok(Some(if sequential {
                Node::Parallel(children)
            } else {
                Node::Sequence(children)
            }))
        }
    }
}

fn resolve_text(text: &str) -> Result<Option<Node>, String> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    if let Some(help) = text.strip_prefix('?') {
        return Ok(Some(Node::Help(help.trim_start().to_string())));
    }
    if let Some(reference) = text.strip_prefix('@') {
        return parse_shorthand(reference).map(|r| Some(Node::SubCommand(r)));
    }

    let (verbosity, command) = if let Some(rest) = text.strip_prefix("%%") {
        (Verbosity::Silent, rest)
    } else if let Some(rest) = text.strip_prefix('%') {
        (Verbosity::Quiet, rest)
    } else {
        (Verbosity::Normal, text)
    };
    let command = command.trim();
    if command.is_empty() {
        return Ok(None);
    }
    Ok(Some(Node::Shell {
        command: command.to_string(),
        verbosity,
    }))
}

/// Parse `name --key value --flag --no-other --k=v positional`.
fn parse_shorthand(text: &str) -> Result<SubCommandRef, String> {
    let tokens = shlex::split(text)
        .ok_or_else(|| format!("cannot split sub-command reference `@{text}` (unbalanced quotes?)"))?;
    let mut tokens = tokens.into_iter().peekable();
    let name = match tokens.next() {
        Some(n) if !n.is_empty() => n,
        _ => return Err(format!("sub-command reference `@{text}` has no name")),
    };

    let mut args = Args::new();
    let mut positional = Vec::new();
    while let Some(token) = tokens.next() {
        let Some(flag) = token.strip_prefix("--").filter(|f| !f.is_empty()) else {
            positional.push(Value::String(token));
            continue;
        };
        if let Some((key, value)) = flag.split_once('=') {
            insert_arg(&mut args, key, Value::String(value.to_string()));
        } else if let Some(key) = flag.strip_prefix("no-") {
            insert_arg(&mut args, key, Value::Bool(false));
        } else if tokens.peek().is_some_and(|next| !next.starts_with("--")) {
            let value = tokens.next().unwrap_or_default();
            insert_arg(&mut args, flag, Value::String(value));
        } else {
            insert_arg(&mut args, flag, Value::Bool(true));
        }
    }
    if !positional.is_empty() {
        args.insert("_".to_string(), Value::Array(positional));
    }

    Ok(SubCommandRef {
        name,
        args,
        forwarded: false,
    })
}

/// Repeated keys accumulate into an array.
fn insert_arg(args: &mut Args, key: &str, value: Value) {
    match args.remove(key) {
        None => {
            args.insert(key.to_string(), value);
        }
        Some(Value::Array(mut items)) => {
            items.push(value);
            args.insert(key.to_string(), Value::Array(items));
        }
        Some(previous) => {
            args.insert(key.to_string(), Value::Array(vec![previous, value]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shell(cmd: &str) -> Node {
        Node::Shell {
            command: cmd.to_string(),
            verbosity: Verbosity::Normal,
        }
    }

    #[test]
    fn markers_are_resolved_once() {
        let raw = vec![
            RawNode::from("?Building things"),
            RawNode::from("%echo quiet"),
            RawNode::from("%%echo silent"),
            RawNode::from("   "),
            RawNode::Null,
            RawNode::from("make"),
        ];
        let nodes = resolve(&raw, true).unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Help("Building things".to_string()),
                Node::Shell {
                    command: "echo quiet".to_string(),
                    verbosity: Verbosity::Quiet
                },
                Node::Shell {
                    command: "echo silent".to_string(),
                    verbosity: Verbosity::Silent
                },
                shell("make"),
            ]
        );
    }

    #[test]
    fn lists_alternate_between_parallel_and_sequence() {
        let raw = vec![RawNode::list([
            RawNode::from("a"),
            RawNode::list(["b", "c"]),
        ])];
        let nodes = resolve(&raw, true).unwrap();
        assert_eq!(
            nodes,
            vec![Node::Parallel(vec![
                shell("a"),
                Node::Sequence(vec![shell("b"), shell("c")]),
            ])]
        );

        // The same input in a parallel context starts with a sequence.
        let nodes = resolve(&raw, false).unwrap();
        assert!(matches!(nodes[0], Node::Sequence(_)));
    }

    #[test]
    fn shorthand_arguments() {
        let nodes = resolve(
            &[RawNode::from("@deploy --env prod --force --no-cache --tag=v1 extra 'two words'")],
            true,
        )
        .unwrap();
        let Node::SubCommand(r) = &nodes[0] else {
            panic!("expected sub-command, got {nodes:?}");
        };
        assert_eq!(r.name, "deploy");
        assert!(!r.forwarded);
        assert_eq!(r.args["env"], json!("prod"));
        assert_eq!(r.args["force"], json!(true));
        assert_eq!(r.args["cache"], json!(false));
        assert_eq!(r.args["tag"], json!("v1"));
        assert_eq!(r.args["_"], json!(["extra", "two words"]));
    }

    #[test]
    fn malformed_references_are_rejected() {
        assert!(resolve(&[RawNode::from("@")], true).is_err());
        assert!(resolve(&[RawNode::from("@x 'open")], true).is_err());
        assert!(resolve(&[RawNode::command(" ", Args::new())], true).is_err());
    }

    #[test]
    fn deserializes_from_json() {
        let raw: Vec<RawNode> = serde_json::from_value(json!([
            "echo hi",
            null,
            {"name": "test", "args": {"watch": true}},
            ["a", ["b", "c"]]
        ]))
        .unwrap();
        assert_eq!(raw.len(), 4);
        assert_eq!(raw[1], RawNode::Null);
        let nodes = resolve(&raw, true).unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(matches!(&nodes[1], Node::SubCommand(r) if r.name == "test"));
    }
}
