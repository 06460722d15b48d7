//! Widget block-list rules.
//!
//! A rule names widgets the fuzzer must leave alone, either the widgets
//! themselves or their whole subtrees. Rules with preconditions only
//! apply while those hold on the current snapshot.

use sonde_agent::api::BlockList;
use sonde_checker::query::translate;
use sonde_checker::{Selector, StaticChecker};

use crate::property::{evaluate_preconditions, Precondition, PreconditionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockScope {
    Widgets,
    Tree,
}

pub struct BlockRule {
    scope: BlockScope,
    preconditions: Vec<Precondition>,
    selectors: Vec<Selector>,
}

impl BlockRule {
    pub fn widgets(selectors: impl IntoIterator<Item = Selector>) -> Self {
        Self::new(BlockScope::Widgets, selectors)
    }

    pub fn tree(selectors: impl IntoIterator<Item = Selector>) -> Self {
        Self::new(BlockScope::Tree, selectors)
    }

    fn new(scope: BlockScope, selectors: impl IntoIterator<Item = Selector>) -> Self {
        Self {
            scope,
            preconditions: Vec::new(),
            selectors: selectors.into_iter().collect(),
        }
    }

    pub fn when<F>(mut self, f: F) -> Self
    where
        F: Fn(&StaticChecker) -> anyhow::Result<bool> + 'static,
    {
        self.preconditions.push(Box::new(f));
        self
    }

    pub fn scope(&self) -> BlockScope {
        self.scope
    }

    fn applies(&self, snapshot: Option<&StaticChecker>) -> bool {
        if self.preconditions.is_empty() {
            return true;
        }
        let Some(checker) = snapshot else {
            return false;
        };
        match evaluate_preconditions(&self.preconditions, checker) {
            PreconditionOutcome::Satisfied => true,
            PreconditionOutcome::NotSatisfied => false,
            PreconditionOutcome::EvaluationError(e) => {
                tracing::warn!(error = %e, "block rule precondition failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for BlockRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockRule")
            .field("scope", &self.scope)
            .field("preconditions", &self.preconditions.len())
            .field("selectors", &self.selectors)
            .finish()
    }
}

/// Collect the block-list for the next step. Conditional rules are
/// skipped when there is no snapshot yet.
pub fn resolve_block_list(rules: &[BlockRule], snapshot: Option<&StaticChecker>) -> BlockList {
    let mut widgets: Vec<String> = Vec::new();
    let mut trees: Vec<String> = Vec::new();

    for rule in rules.iter().filter(|r| r.applies(snapshot)) {
        let target = match rule.scope {
            BlockScope::Widgets => &mut widgets,
            BlockScope::Tree => &mut trees,
        };
        for selector in &rule.selectors {
            let query = translate(selector);
            if query.is_error() {
                continue;
            }
            let rendered = query.to_string();
            if !target.contains(&rendered) {
                target.push(rendered);
            }
        }
    }
    widgets.retain(|w| !trees.contains(w));

    tracing::debug!(widgets = ?widgets, trees = ?trees, "block list");
    BlockList {
        block_widgets: widgets,
        block_trees: trees,
    }
}
