use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::coverage::compute_coverage;
use crate::eval::match_query;
use crate::hierarchy::{Hierarchy, HierarchyError, NodeId};
use crate::query::{translate, Query};
use crate::selector::Selector;

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error("`{method}` is not supported on a static hierarchy")]
    Unsupported { method: &'static str },
}

/// Answers selector queries against one captured hierarchy.
///
/// Occlusion is computed once on construction. A failed occlusion pass is
/// logged and leaves best-effort annotations; when a diagnostics
/// directory is set the offending tree is written there.
#[derive(Debug)]
pub struct StaticChecker {
    hierarchy: Hierarchy,
}

impl StaticChecker {
    pub fn from_xml(xml: &str) -> Result<Self, CheckError> {
        Self::with_diagnostics(xml, None)
    }

    pub fn with_diagnostics(xml: &str, dump_dir: Option<&Path>) -> Result<Self, CheckError> {
        let mut hierarchy = Hierarchy::parse(xml)?;
        if let Err(e) = compute_coverage(&mut hierarchy) {
            tracing::error!(error = %e, "failed to annotate covered widgets");
            if let Some(dir) = dump_dir {
                dump_tree(&hierarchy, dir);
            }
        }
        Ok(Self { hierarchy })
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn find(&self, selector: Selector) -> Widget<'_> {
        Widget {
            checker: self,
            selector,
        }
    }

    pub fn select(&self, query: &Query) -> Vec<NodeId> {
        match_query(&self.hierarchy, query)
    }
}

/// Distinguishes dumps written within the same clock tick.
static DUMP_SEQ: AtomicU64 = AtomicU64::new(0);

fn dump_tree(hierarchy: &Hierarchy, dir: &Path) {
    let seq = DUMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let path: PathBuf = dir.join(format!("error_tree_{}_{nanos}_{seq}.xml", std::process::id()));
    match std::fs::write(&path, hierarchy.to_xml()) {
        Ok(()) => tracing::debug!(path = %path.display(), "dumped hierarchy"),
        Err(e) => tracing::warn!(error = %e, "could not dump hierarchy"),
    }
}

/// A selector bound to a snapshot.
#[derive(Debug, Clone)]
pub struct Widget<'a> {
    checker: &'a StaticChecker,
    selector: Selector,
}

impl<'a> Widget<'a> {
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn query(&self) -> Query {
        translate(&self.selector)
    }

    /// Whether a widget matches that is not hidden behind another one.
    pub fn exists(&self) -> bool {
        let query = translate(&self.selector.uncovered());
        !self.checker.select(&query).is_empty()
    }

    /// Number of matches, hidden widgets included.
    pub fn count(&self) -> usize {
        self.checker.select(&self.query()).len()
    }

    pub fn matches(&self) -> Vec<NodeId> {
        self.checker.select(&self.query())
    }

    pub fn child(&self, sub: Selector) -> Widget<'a> {
        self.relate(self.selector.clone().child(sub))
    }

    pub fn sibling(&self, sub: Selector) -> Widget<'a> {
        self.relate(self.selector.clone().sibling(sub))
    }

    fn relate(&self, selector: Selector) -> Widget<'a> {
        Widget {
            checker: self.checker,
            selector,
        }
    }

    pub fn left(&self, _sub: Selector) -> Result<Widget<'a>, CheckError> {
        Err(CheckError::Unsupported { method: "left" })
    }

    pub fn right(&self, _sub: Selector) -> Result<Widget<'a>, CheckError> {
        Err(CheckError::Unsupported { method: "right" })
    }

    pub fn up(&self, _sub: Selector) -> Result<Widget<'a>, CheckError> {
        Err(CheckError::Unsupported { method: "up" })
    }

    pub fn down(&self, _sub: Selector) -> Result<Widget<'a>, CheckError> {
        Err(CheckError::Unsupported { method: "down" })
    }

    pub fn child_by_text(&self, _text: &str, _sub: Selector) -> Result<Widget<'a>, CheckError> {
        Err(CheckError::Unsupported {
            method: "child_by_text",
        })
    }

    pub fn child_by_description(
        &self,
        _description: &str,
        _sub: Selector,
    ) -> Result<Widget<'a>, CheckError> {
        Err(CheckError::Unsupported {
            method: "child_by_description",
        })
    }

    pub fn child_by_instance(&self, _instance: usize, _sub: Selector) -> Result<Widget<'a>, CheckError> {
        Err(CheckError::Unsupported {
            method: "child_by_instance",
        })
    }
}
