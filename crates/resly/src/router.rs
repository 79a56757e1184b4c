//! Pattern router.
//!
//! A trie over dot-separated resource-name tokens. Each token of a
//! registered pattern is a literal (`[A-Za-z0-9_]+`), a single-token
//! parameter (`$name`), or the terminal full wildcard (`>`).
//!
//! ```text
//!            root
//!             │ "library"
//!             ▼
//!           ┌────┐  "book"   ┌────┐  $id   ┌────┐
//!           │node│──────────►│node│───────►│node│ entry: book handler
//!           └────┘           └────┘        └────┘
//!             │ >
//!             ▼
//!           entry: catch-all handler
//! ```
//!
//! # Matching precedence
//!
//! When several siblings could match a token, the most specific wins:
//!
//! 1. Literal child (exact text)
//! 2. Parameter child (`$name`, capturing the token)
//! 3. Full wildcard (`>`, consuming this and all remaining tokens)
//!
//! Matching backtracks: a deeper literal miss falls back to a parameter
//! sibling, then to the wildcard.
//!
//! # Conflicts
//!
//! Registration rejects a pattern that would be ambiguous with an
//! existing sibling: two equal literals, two parameters (regardless of
//! name), or two full wildcards. A parameter and a literal may coexist;
//! precedence resolves them.

use crate::error::ServiceError;
use crate::handler::Handler;
use std::collections::HashMap;
use std::sync::Arc;

/// Returns `true` for a valid literal token: non-empty, alphanumeric or
/// underscore.
pub(crate) fn is_valid_token(tok: &str) -> bool {
    !tok.is_empty() && tok.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A successful router lookup.
#[derive(Clone)]
pub struct Match {
    /// The matched handler.
    pub handler: Arc<Handler>,
    /// Captured `$name` parameters.
    pub params: HashMap<String, String>,
    /// Resolved group label, when the handler declares one.
    pub group: Option<String>,
    /// The canonical pattern that matched, prefix included.
    pub pattern: String,
}

/// Capability summary of one registered pattern, used to derive the
/// reset lists and the subscription topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PatternCaps {
    /// Pattern in bus form: `$name` rendered as `*`.
    pub pattern: String,
    pub has_get: bool,
    pub has_access: bool,
    pub has_call: bool,
    pub has_auth: bool,
}

struct Entry {
    handler: Arc<Handler>,
    group: Option<GroupLabel>,
    pattern: String,
}

struct ParamNode {
    name: String,
    node: Node,
}

#[derive(Default)]
struct Node {
    literals: HashMap<String, Node>,
    param: Option<Box<ParamNode>>,
    wild: Option<Entry>,
    entry: Option<Entry>,
}

/// Trie of registered patterns, merged with a service-wide prefix.
///
/// Immutable once the service starts; lookups take shared access only.
pub struct Router {
    prefix: String,
    root: Node,
}

impl Router {
    /// Creates an empty router. Every registered pattern is prefixed with
    /// `prefix` (dot-joined) when non-empty.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            root: Node::default(),
        }
    }

    /// Returns the service-wide prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Registers a handler under a pattern.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::PatternInvalid`] on a malformed token
    /// - [`ServiceError::PatternConflict`] on an ambiguous sibling
    /// - [`ServiceError::GroupInvalid`] on a group label referencing an
    ///   undeclared parameter
    /// - [`ServiceError::InvalidArgument`] on a malformed method name
    pub fn register(&mut self, pattern: &str, handler: Handler) -> Result<(), ServiceError> {
        let full = merge_pattern(&self.prefix, pattern);
        let invalid = |reason: &str| ServiceError::PatternInvalid {
            pattern: full.clone(),
            reason: reason.to_string(),
        };
        if full.is_empty() {
            return Err(invalid("empty pattern"));
        }

        let tokens: Vec<&str> = full.split('.').collect();
        let mut param_names: Vec<&str> = Vec::new();
        for (i, tok) in tokens.iter().enumerate() {
            if *tok == ">" {
                if i != tokens.len() - 1 {
                    return Err(invalid("full wildcard '>' must be the last token"));
                }
            } else if let Some(name) = tok.strip_prefix('$') {
                if !is_valid_token(name) {
                    return Err(invalid("malformed parameter token"));
                }
                if param_names.contains(&name) {
                    return Err(invalid("duplicate parameter name"));
                }
                param_names.push(name);
            } else if !is_valid_token(tok) {
                return Err(invalid("tokens must be alphanumeric or '_'"));
            }
        }

        handler.validate()?;
        let group = match handler.group_label() {
            Some(label) => Some(GroupLabel::parse(label, &param_names).map_err(|reason| {
                ServiceError::GroupInvalid {
                    group: label.to_string(),
                    reason,
                }
            })?),
            None => None,
        };

        let entry = Entry {
            handler: Arc::new(handler),
            group,
            pattern: full.clone(),
        };

        let conflict = || ServiceError::PatternConflict { pattern: full.clone() };
        let mut node = &mut self.root;
        for tok in &tokens {
            if *tok == ">" {
                if node.wild.is_some() {
                    return Err(conflict());
                }
                node.wild = Some(entry);
                return Ok(());
            }
            if let Some(name) = tok.strip_prefix('$') {
                let pn = node
                    .param
                    .get_or_insert_with(|| Box::new(ParamNode { name: name.to_string(), node: Node::default() }));
                if pn.name != name {
                    // Two parameter children are ambiguous regardless of
                    // their names.
                    return Err(conflict());
                }
                node = &mut pn.node;
            } else {
                node = node.literals.entry((*tok).to_string()).or_default();
            }
        }
        if node.entry.is_some() {
            return Err(conflict());
        }
        node.entry = Some(entry);
        Ok(())
    }

    /// Looks up the handler for a resource name. A `?query` part, if
    /// present, is ignored for matching.
    #[must_use]
    pub fn lookup(&self, rid: &str) -> Option<Match> {
        let name = rid.split('?').next().unwrap_or(rid);
        if name.is_empty() {
            return None;
        }
        let tokens: Vec<&str> = name.split('.').collect();
        if tokens.iter().any(|t| t.is_empty()) {
            return None;
        }

        let mut captured: Vec<(String, String)> = Vec::new();
        let entry = match_node(&self.root, &tokens, 0, &mut captured)?;
        let params: HashMap<String, String> = captured.into_iter().collect();
        let group = entry.group.as_ref().map(|g| g.resolve(&params));
        Some(Match {
            handler: Arc::clone(&entry.handler),
            params,
            group,
            pattern: entry.pattern.clone(),
        })
    }

    /// Enumerates registered patterns with their capability flags, in
    /// deterministic (sorted) order.
    pub(crate) fn capability_patterns(&self) -> Vec<PatternCaps> {
        let mut entries = Vec::new();
        collect_entries(&self.root, &mut entries);
        let mut caps: Vec<PatternCaps> = entries
            .into_iter()
            .map(|e| PatternCaps {
                pattern: wildcard_form(&e.pattern),
                has_get: e.handler.has_get(),
                has_access: e.handler.has_access(),
                has_call: e.handler.has_call(),
                has_auth: e.handler.has_auth(),
            })
            .collect();
        caps.sort_by(|a, b| a.pattern.cmp(&b.pattern));
        caps
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let patterns: Vec<String> =
            self.capability_patterns().into_iter().map(|c| c.pattern).collect();
        f.debug_struct("Router")
            .field("prefix", &self.prefix)
            .field("patterns", &patterns)
            .finish()
    }
}

fn merge_pattern(prefix: &str, pattern: &str) -> String {
    match (prefix.is_empty(), pattern.is_empty()) {
        (true, _) => pattern.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}.{pattern}"),
    }
}

fn match_node<'a>(
    node: &'a Node,
    tokens: &[&str],
    idx: usize,
    captured: &mut Vec<(String, String)>,
) -> Option<&'a Entry> {
    if idx == tokens.len() {
        return node.entry.as_ref();
    }
    let tok = tokens[idx];
    if let Some(child) = node.literals.get(tok) {
        if let Some(entry) = match_node(child, tokens, idx + 1, captured) {
            return Some(entry);
        }
    }
    if let Some(pn) = &node.param {
        captured.push((pn.name.clone(), tok.to_string()));
        if let Some(entry) = match_node(&pn.node, tokens, idx + 1, captured) {
            return Some(entry);
        }
        captured.pop();
    }
    // '>' consumes this token and everything after it.
    node.wild.as_ref()
}

fn collect_entries<'a>(node: &'a Node, out: &mut Vec<&'a Entry>) {
    if let Some(entry) = &node.entry {
        out.push(entry);
    }
    if let Some(entry) = &node.wild {
        out.push(entry);
    }
    for child in node.literals.values() {
        collect_entries(child, out);
    }
    if let Some(pn) = &node.param {
        collect_entries(&pn.node, out);
    }
}

/// Renders a canonical pattern in bus form: `$name` becomes `*`.
fn wildcard_form(pattern: &str) -> String {
    pattern
        .split('.')
        .map(|tok| if tok.starts_with('$') { "*" } else { tok })
        .collect::<Vec<_>>()
        .join(".")
}

/// A parsed group label: literal chunks interleaved with `${name}`
/// parameter references.
struct GroupLabel {
    parts: Vec<GroupPart>,
}

enum GroupPart {
    Literal(String),
    Param(String),
}

impl GroupLabel {
    fn parse(raw: &str, param_names: &[&str]) -> Result<Self, String> {
        let mut parts = Vec::new();
        let mut rest = raw;
        while let Some(start) = rest.find("${") {
            if start > 0 {
                parts.push(GroupPart::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err("unterminated '${' reference".to_string());
            };
            let name = &after[..end];
            if !param_names.contains(&name) {
                return Err(format!("pattern declares no parameter '${name}'"));
            }
            parts.push(GroupPart::Param(name.to_string()));
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            parts.push(GroupPart::Literal(rest.to_string()));
        }
        Ok(Self { parts })
    }

    fn resolve(&self, params: &HashMap<String, String>) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                GroupPart::Literal(s) => out.push_str(s),
                GroupPart::Param(name) => {
                    if let Some(v) = params.get(name) {
                        out.push_str(v);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> Handler {
        Handler::new().get(|r| r.model(serde_json::json!({})))
    }

    #[test]
    fn register_and_lookup_literal() {
        let mut router = Router::new("test");
        router.register("model", handler()).expect("pattern should register");

        let m = router.lookup("test.model").expect("literal should match");
        assert_eq!(m.pattern, "test.model");
        assert!(m.params.is_empty());
        assert!(router.lookup("test.other").is_none());
    }

    #[test]
    fn parameter_capture() {
        let mut router = Router::new("");
        router.register("foo.$id.bar", handler()).expect("pattern should register");

        let m = router.lookup("foo.X.bar").expect("parameter should match");
        assert_eq!(m.params.get("id").map(String::as_str), Some("X"));

        assert!(router.lookup("foo.bar").is_none());
        assert!(router.lookup("foo.X.Y.bar").is_none());
    }

    #[test]
    fn full_wildcard_needs_one_more_token() {
        let mut router = Router::new("");
        router.register("foo.>", handler()).expect("pattern should register");

        assert!(router.lookup("foo.a").is_some());
        assert!(router.lookup("foo.a.b.c").is_some());
        assert!(router.lookup("foo").is_none());
        assert!(router.lookup("bar.a").is_none());
    }

    #[test]
    fn precedence_literal_over_param_over_wild() {
        let mut router = Router::new("");
        router.register("a.b", handler()).expect("literal should register");
        router.register("a.$x", handler()).expect("param should register");
        router.register("a.>", handler()).expect("wildcard should register");

        assert_eq!(router.lookup("a.b").expect("should match").pattern, "a.b");
        assert_eq!(router.lookup("a.c").expect("should match").pattern, "a.$x");
        assert_eq!(router.lookup("a.c.d").expect("should match").pattern, "a.>");
    }

    #[test]
    fn backtracks_from_literal_to_param() {
        let mut router = Router::new("");
        router.register("a.b.c", handler()).expect("should register");
        router.register("a.$x.d", handler()).expect("should register");

        // "a.b" descends into the literal child first, but only the
        // parameter branch completes for trailing "d".
        let m = router.lookup("a.b.d").expect("param branch should match");
        assert_eq!(m.pattern, "a.$x.d");
        assert_eq!(m.params.get("x").map(String::as_str), Some("b"));
    }

    #[test]
    fn invalid_patterns() {
        let mut router = Router::new("");
        assert!(matches!(
            router.register("", handler()),
            Err(ServiceError::PatternInvalid { .. })
        ));
        assert!(matches!(
            router.register("a..b", handler()),
            Err(ServiceError::PatternInvalid { .. })
        ));
        assert!(matches!(
            router.register("a.>.b", handler()),
            Err(ServiceError::PatternInvalid { .. })
        ));
        assert!(matches!(
            router.register("a.$", handler()),
            Err(ServiceError::PatternInvalid { .. })
        ));
        assert!(matches!(
            router.register("a.b-c", handler()),
            Err(ServiceError::PatternInvalid { .. })
        ));
        assert!(matches!(
            router.register("$x.$x", handler()),
            Err(ServiceError::PatternInvalid { .. })
        ));
    }

    #[test]
    fn conflicting_patterns() {
        let mut router = Router::new("");
        router.register("a.b", handler()).expect("should register");
        assert!(matches!(
            router.register("a.b", handler()),
            Err(ServiceError::PatternConflict { .. })
        ));

        router.register("a.$x", handler()).expect("should register");
        assert!(matches!(
            router.register("a.$y", handler()),
            Err(ServiceError::PatternConflict { .. })
        ));

        router.register("a.>", handler()).expect("should register");
        assert!(matches!(
            router.register("a.>", handler()),
            Err(ServiceError::PatternConflict { .. })
        ));
    }

    #[test]
    fn param_and_literal_do_not_conflict() {
        let mut router = Router::new("");
        router.register("a.b", handler()).expect("literal should register");
        router.register("a.$x", handler()).expect("param sibling should register");
    }

    #[test]
    fn same_param_name_extends_branch() {
        let mut router = Router::new("");
        router.register("a.$x.b", handler()).expect("should register");
        router.register("a.$x.c", handler()).expect("same name should extend");

        assert!(router.lookup("a.1.b").is_some());
        assert!(router.lookup("a.1.c").is_some());
    }

    #[test]
    fn group_resolution() {
        let mut router = Router::new("");
        let h = handler().group("lib.${id}");
        router.register("book.$id.title", h).expect("should register");

        let m = router.lookup("book.42.title").expect("should match");
        assert_eq!(m.group.as_deref(), Some("lib.42"));
    }

    #[test]
    fn group_with_unknown_param_rejected() {
        let mut router = Router::new("");
        let h = handler().group("${nope}");
        assert!(matches!(
            router.register("book.$id", h),
            Err(ServiceError::GroupInvalid { .. })
        ));
    }

    #[test]
    fn group_with_unterminated_ref_rejected() {
        let mut router = Router::new("");
        let h = handler().group("x${id");
        assert!(matches!(
            router.register("book.$id", h),
            Err(ServiceError::GroupInvalid { .. })
        ));
    }

    #[test]
    fn lookup_ignores_query_part(){
        let mut router = Router::new("");
        router.register("book.$id", handler()).expect("should register");
        let m = router.lookup("book.42?limit=5").expect("query should be ignored");
        assert_eq!(m.params.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn prefix_merging() {
        let mut router = Router::new("svc");
        router.register("", handler()).expect("empty pattern uses the prefix");
        assert!(router.lookup("svc").is_some());

        router.register(">", handler()).expect("wildcard under prefix");
        assert!(router.lookup("svc.anything.deep").is_some());
    }

    #[test]
    fn capability_enumeration_wildcards_params() {
        let mut router = Router::new("test");
        router
            .register("book.$id", Handler::new().get(|r| r.model(serde_json::json!({}))))
            .expect("should register");
        router
            .register("books", Handler::new().collection().access(|r| r.access_granted()))
            .expect("should register");

        let caps = router.capability_patterns();
        assert_eq!(caps.len(), 2);
        assert_eq!(caps[0].pattern, "test.book.*");
        assert!(caps[0].has_get);
        assert!(!caps[0].has_access);
        assert_eq!(caps[1].pattern, "test.books");
        assert!(caps[1].has_access);
        assert!(!caps[1].has_get);
    }

    #[test]
    fn capability_enumeration_keeps_trailing_wildcard() {
        let mut router = Router::new("test");
        router.register(">", handler()).expect("should register");
        let caps = router.capability_patterns();
        assert_eq!(caps[0].pattern, "test.>");
    }
}
