//! Selector-to-query translation.
//!
//! A [`Query`] is a small XPath-shaped tree. Its `Display` output is the
//! XPath text handed to the agent's block-list, while [`crate::eval`]
//! evaluates the tree directly against a [`crate::hierarchy::Hierarchy`].

use std::fmt;

use crate::selector::{IdMatch, Relation, Selector, TextMatch};

/// Rendered form of [`Query::Error`].
pub const ERROR_QUERY: &str = "//error";

// ── AST ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Equals { attr: &'static str, value: String },
    Contains { attr: &'static str, value: String },
    StartsWith { attr: &'static str, value: String },
}

/// A `node` step with its attribute predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTest {
    /// `.//node` (any widget below the root) rather than a bare `node`.
    pub from_root: bool,
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Nodes(NodeTest),
    /// `{context}//{inner}`
    Descendant(Box<Query>, Box<Query>),
    /// `{context}/following-sibling::{inner}`
    FollowingSibling(Box<Query>, Box<Query>),
    /// `{context}/preceding-sibling::{inner}`
    PrecedingSibling(Box<Query>, Box<Query>),
    /// `({a} | {b})`
    Union(Box<Query>, Box<Query>),
    /// `({inner})[position]`, 1-based.
    Nth(Box<Query>, usize),
    /// A selector that cannot be expressed; matches nothing.
    Error,
}

impl Query {
    pub fn is_error(&self) -> bool {
        matches!(self, Query::Error)
    }
}

// ── Translation ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{method}` selectors are not supported against a static hierarchy")]
pub struct Untranslatable {
    pub method: &'static str,
}

/// Translate a selector into a query. Regex-style conditions have no
/// query form and yield [`Query::Error`].
pub fn translate(selector: &Selector) -> Query {
    match translate_step(selector, true) {
        Ok(q) => q,
        Err(e) => {
            tracing::warn!(error = %e, "selector translated to error marker");
            Query::Error
        }
    }
}

fn translate_step(selector: &Selector, from_root: bool) -> Result<Query, Untranslatable> {
    let mut predicates = Vec::new();

    if let Some(class) = &selector.class_name {
        predicates.push(Predicate::Equals {
            attr: "class",
            value: class.clone(),
        });
    }
    if let Some(m) = &selector.text {
        predicates.push(text_predicate("text", m, "textMatches")?);
    }
    if let Some(m) = &selector.description {
        predicates.push(text_predicate("content-desc", m, "descriptionMatches")?);
    }
    if let Some(m) = &selector.package {
        predicates.push(id_predicate("package", m, "packageNameMatches")?);
    }
    if let Some(m) = &selector.resource_id {
        predicates.push(id_predicate("resource-id", m, "resourceIdMatches")?);
    }
    for (flag, value) in selector.flags() {
        predicates.push(Predicate::Equals {
            attr: flag.attr_name(),
            value: value.to_string(),
        });
    }
    if let Some(index) = selector.index {
        predicates.push(Predicate::Equals {
            attr: "index",
            value: index.to_string(),
        });
    }

    let mut query = Query::Nodes(NodeTest {
        from_root,
        predicates,
    });

    for (relation, sub) in &selector.relations {
        let inner = translate_step(sub, false)?;
        query = match relation {
            Relation::Child => Query::Descendant(Box::new(query), Box::new(inner)),
            Relation::Sibling => Query::Union(
                Box::new(Query::FollowingSibling(
                    Box::new(query.clone()),
                    Box::new(inner.clone()),
                )),
                Box::new(Query::PrecedingSibling(Box::new(query), Box::new(inner))),
            ),
        };
    }

    if let Some(instance) = selector.instance {
        query = Query::Nth(Box::new(query), instance + 1);
    }
    Ok(query)
}

fn text_predicate(
    attr: &'static str,
    m: &TextMatch,
    regex_method: &'static str,
) -> Result<Predicate, Untranslatable> {
    Ok(match m {
        TextMatch::Exact(v) => Predicate::Equals {
            attr,
            value: v.clone(),
        },
        TextMatch::Contains(v) => Predicate::Contains {
            attr,
            value: v.clone(),
        },
        TextMatch::StartsWith(v) => Predicate::StartsWith {
            attr,
            value: v.clone(),
        },
        TextMatch::Matches(_) => {
            return Err(Untranslatable {
                method: regex_method,
            })
        }
    })
}

fn id_predicate(
    attr: &'static str,
    m: &IdMatch,
    regex_method: &'static str,
) -> Result<Predicate, Untranslatable> {
    match m {
        IdMatch::Exact(v) => Ok(Predicate::Equals {
            attr,
            value: v.clone(),
        }),
        IdMatch::Matches(_) => Err(Untranslatable {
            method: regex_method,
        }),
    }
}

// ── Rendering ────────────────────────────────────────────────────────

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Equals { attr, value } => write!(f, "[@{attr}={}]", Literal(value)),
            Predicate::Contains { attr, value } => {
                write!(f, "[contains(@{attr}, {})]", Literal(value))
            }
            Predicate::StartsWith { attr, value } => {
                write!(f, "[starts-with(@{attr}, {})]", Literal(value))
            }
        }
    }
}

/// An XPath 1.0 string literal. Literals have no escapes, so a value
/// holding both quote kinds is spelled as `concat()` of quoted pieces.
struct Literal<'a>(&'a str);

impl fmt::Display for Literal<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;
        if !value.contains('\'') {
            return write!(f, "'{value}'");
        }
        if !value.contains('"') {
            return write!(f, "\"{value}\"");
        }
        f.write_str("concat(")?;
        for (i, piece) in value.split('\'').enumerate() {
            if i > 0 {
                f.write_str(", \"'\", ")?;
            }
            write!(f, "'{piece}'")?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for NodeTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.from_root { ".//node" } else { "node" })?;
        for p in &self.predicates {
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Nodes(test) => write!(f, "{test}"),
            Query::Descendant(ctx, inner) => write!(f, "{ctx}//{inner}"),
            Query::FollowingSibling(ctx, inner) => write!(f, "{ctx}/following-sibling::{inner}"),
            Query::PrecedingSibling(ctx, inner) => write!(f, "{ctx}/preceding-sibling::{inner}"),
            Query::Union(a, b) => write!(f, "({a} | {b})"),
            Query::Nth(inner, n) => write!(f, "({inner})[{n}]"),
            Query::Error => f.write_str(ERROR_QUERY),
        }
    }
}
