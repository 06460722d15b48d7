//! Structured widget selectors.
//!
//! A [`Selector`] is built once through its consuming builder methods
//! and is not mutated afterwards; relations compose it with further
//! selectors.

/// Text-like attribute condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextMatch {
    Exact(String),
    Contains(String),
    StartsWith(String),
    /// Regular-expression match. Not expressible as a query.
    Matches(String),
}

/// Identifier-like attribute condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdMatch {
    Exact(String),
    /// Regular-expression match. Not expressible as a query.
    Matches(String),
}

/// Boolean widget flags, in the order they are rendered into queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    Checkable,
    Checked,
    Clickable,
    LongClickable,
    Scrollable,
    Enabled,
    Focusable,
    Focused,
    Selected,
    Covered,
}

impl Flag {
    pub const ALL: [Flag; 10] = [
        Flag::Checkable,
        Flag::Checked,
        Flag::Clickable,
        Flag::LongClickable,
        Flag::Scrollable,
        Flag::Enabled,
        Flag::Focusable,
        Flag::Focused,
        Flag::Selected,
        Flag::Covered,
    ];

    /// Attribute name in the hierarchy dump.
    pub fn attr_name(&self) -> &'static str {
        match self {
            Flag::Checkable => "checkable",
            Flag::Checked => "checked",
            Flag::Clickable => "clickable",
            Flag::LongClickable => "long-clickable",
            Flag::Scrollable => "scrollable",
            Flag::Enabled => "enabled",
            Flag::Focusable => "focusable",
            Flag::Focused => "focused",
            Flag::Selected => "selected",
            Flag::Covered => "covered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Child,
    Sibling,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub text: Option<TextMatch>,
    pub description: Option<TextMatch>,
    pub class_name: Option<String>,
    pub package: Option<IdMatch>,
    pub resource_id: Option<IdMatch>,
    flags: [Option<bool>; 10],
    pub index: Option<u32>,
    pub instance: Option<usize>,
    pub relations: Vec<(Relation, Selector)>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, v: impl Into<String>) -> Self {
        self.text = Some(TextMatch::Exact(v.into()));
        self
    }

    pub fn text_contains(mut self, v: impl Into<String>) -> Self {
        self.text = Some(TextMatch::Contains(v.into()));
        self
    }

    pub fn text_starts_with(mut self, v: impl Into<String>) -> Self {
        self.text = Some(TextMatch::StartsWith(v.into()));
        self
    }

    pub fn text_matches(mut self, v: impl Into<String>) -> Self {
        self.text = Some(TextMatch::Matches(v.into()));
        self
    }

    pub fn description(mut self, v: impl Into<String>) -> Self {
        self.description = Some(TextMatch::Exact(v.into()));
        self
    }

    pub fn description_contains(mut self, v: impl Into<String>) -> Self {
        self.description = Some(TextMatch::Contains(v.into()));
        self
    }

    pub fn description_starts_with(mut self, v: impl Into<String>) -> Self {
        self.description = Some(TextMatch::StartsWith(v.into()));
        self
    }

    pub fn description_matches(mut self, v: impl Into<String>) -> Self {
        self.description = Some(TextMatch::Matches(v.into()));
        self
    }

    pub fn class_name(mut self, v: impl Into<String>) -> Self {
        self.class_name = Some(v.into());
        self
    }

    pub fn package(mut self, v: impl Into<String>) -> Self {
        self.package = Some(IdMatch::Exact(v.into()));
        self
    }

    pub fn package_matches(mut self, v: impl Into<String>) -> Self {
        self.package = Some(IdMatch::Matches(v.into()));
        self
    }

    pub fn resource_id(mut self, v: impl Into<String>) -> Self {
        self.resource_id = Some(IdMatch::Exact(v.into()));
        self
    }

    pub fn resource_id_matches(mut self, v: impl Into<String>) -> Self {
        self.resource_id = Some(IdMatch::Matches(v.into()));
        self
    }

    pub fn flag(mut self, flag: Flag, value: bool) -> Self {
        self.flags[flag as usize] = Some(value);
        self
    }

    pub fn clickable(self, value: bool) -> Self {
        self.flag(Flag::Clickable, value)
    }

    pub fn enabled(self, value: bool) -> Self {
        self.flag(Flag::Enabled, value)
    }

    pub fn checked(self, value: bool) -> Self {
        self.flag(Flag::Checked, value)
    }

    pub fn selected(self, value: bool) -> Self {
        self.flag(Flag::Selected, value)
    }

    pub fn scrollable(self, value: bool) -> Self {
        self.flag(Flag::Scrollable, value)
    }

    pub fn get_flag(&self, flag: Flag) -> Option<bool> {
        self.flags[flag as usize]
    }

    /// Flags that are set, in canonical order.
    pub fn flags(&self) -> impl Iterator<Item = (Flag, bool)> + '_ {
        Flag::ALL
            .into_iter()
            .filter_map(move |f| self.get_flag(f).map(|v| (f, v)))
    }

    pub fn index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Select the `instance`-th match (0-based) of the whole selector.
    pub fn instance(mut self, instance: usize) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn child(mut self, sub: Selector) -> Self {
        self.relations.push((Relation::Child, sub));
        self
    }

    pub fn sibling(mut self, sub: Selector) -> Self {
        self.relations.push((Relation::Sibling, sub));
        self
    }

    /// Copy of this selector with `covered=false` forced on the selector
    /// that finally picks the widget: the innermost one along the last
    /// relation of each level.
    pub fn uncovered(&self) -> Selector {
        let mut out = self.clone();
        out.deepest_mut().flags[Flag::Covered as usize] = Some(false);
        out
    }

    fn deepest_mut(&mut self) -> &mut Selector {
        if self.relations.is_empty() {
            return self;
        }
        let last = self.relations.len() - 1;
        self.relations[last].1.deepest_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_iterate_in_canonical_order() {
        let s = Selector::new()
            .flag(Flag::Covered, true)
            .clickable(false)
            .flag(Flag::Checkable, true);
        let flags: Vec<_> = s.flags().collect();
        assert_eq!(
            flags,
            vec![
                (Flag::Checkable, true),
                (Flag::Clickable, false),
                (Flag::Covered, true)
            ]
        );
    }

    #[test]
    fn test_uncovered_targets_deepest_selector() {
        let s = Selector::new()
            .text("outer")
            .child(Selector::new().text("a"))
            .sibling(Selector::new().text("b").child(Selector::new().text("leaf")));
        let u = s.uncovered();
        assert_eq!(u.get_flag(Flag::Covered), None);
        assert_eq!(u.relations[0].1.get_flag(Flag::Covered), None);
        let leaf = &u.relations[1].1.relations[0].1;
        assert_eq!(leaf.get_flag(Flag::Covered), Some(false));
        assert_eq!(s.relations[1].1.relations[0].1.get_flag(Flag::Covered), None);
    }

    #[test]
    fn test_uncovered_without_relations() {
        let u = Selector::new().text("x").uncovered();
        assert_eq!(u.get_flag(Flag::Covered), Some(false));
    }
}
