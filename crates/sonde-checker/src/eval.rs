//! Query evaluation over a hierarchy snapshot.

use crate::hierarchy::{Hierarchy, NodeId};
use crate::query::{NodeTest, Predicate, Query};

/// Nodes matched by `query`, deduplicated, in document order.
pub fn match_query(hierarchy: &Hierarchy, query: &Query) -> Vec<NodeId> {
    if hierarchy.is_empty() {
        return Vec::new();
    }
    let top = &hierarchy.node(hierarchy.root()).children;
    select(hierarchy, query, top)
}

/// `scope` holds the candidates a relative `node` step is tested against.
fn select(h: &Hierarchy, query: &Query, scope: &[NodeId]) -> Vec<NodeId> {
    match query {
        Query::Nodes(test) => {
            let candidates = if test.from_root {
                h.descendants(h.root())
            } else {
                scope.to_vec()
            };
            candidates
                .into_iter()
                .filter(|id| node_matches(h, *id, test))
                .collect()
        }
        Query::Descendant(ctx, inner) => {
            let context = select(h, ctx, scope);
            let axis = normalize(context.iter().flat_map(|id| h.descendants(*id)).collect());
            select(h, inner, &axis)
        }
        Query::FollowingSibling(ctx, inner) => {
            let context = select(h, ctx, scope);
            let axis = normalize(
                context
                    .iter()
                    .flat_map(|id| h.following_siblings(*id).iter().copied())
                    .collect(),
            );
            select(h, inner, &axis)
        }
        Query::PrecedingSibling(ctx, inner) => {
            let context = select(h, ctx, scope);
            let axis = normalize(
                context
                    .iter()
                    .flat_map(|id| h.preceding_siblings(*id).iter().copied())
                    .collect(),
            );
            select(h, inner, &axis)
        }
        Query::Union(a, b) => {
            let mut out = select(h, a, scope);
            out.extend(select(h, b, scope));
            normalize(out)
        }
        Query::Nth(inner, position) => {
            let matched = select(h, inner, scope);
            position
                .checked_sub(1)
                .and_then(|i| matched.get(i).copied())
                .into_iter()
                .collect()
        }
        Query::Error => Vec::new(),
    }
}

fn normalize(mut ids: Vec<NodeId>) -> Vec<NodeId> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn node_matches(h: &Hierarchy, id: NodeId, test: &NodeTest) -> bool {
    h.node(id).is_widget() && test.predicates.iter().all(|p| predicate_holds(h, id, p))
}

fn predicate_holds(h: &Hierarchy, id: NodeId, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Equals { attr, value } => h.attr(id, attr) == Some(value.as_str()),
        // A missing attribute behaves as the empty string.
        Predicate::Contains { attr, value } => h.attr(id, attr).unwrap_or("").contains(value.as_str()),
        Predicate::StartsWith { attr, value } => {
            h.attr(id, attr).unwrap_or("").starts_with(value.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::translate;
    use crate::selector::Selector;

    const XML: &str = r#"<hierarchy>
      <node index="0" class="Frame" resource-id="root">
        <node index="0" class="Text" text="Name"/>
        <node index="1" class="Edit" text=""/>
        <node index="2" class="List" resource-id="list">
          <node index="0" class="Row" text="Apple"/>
          <node index="1" class="Row" text="Apricot"/>
          <node index="2" class="Row" text="Banana"/>
        </node>
      </node>
    </hierarchy>"#;

    fn texts(h: &Hierarchy, ids: &[NodeId]) -> Vec<String> {
        ids.iter()
            .map(|id| h.attr(*id, "text").unwrap_or("-").to_string())
            .collect()
    }

    #[test]
    fn test_prefix_match() {
        let h = Hierarchy::parse(XML).unwrap();
        let q = translate(&Selector::new().text_starts_with("Ap"));
        assert_eq!(texts(&h, &match_query(&h, &q)), vec!["Apple", "Apricot"]);
    }

    #[test]
    fn test_child_and_instance() {
        let h = Hierarchy::parse(XML).unwrap();
        let q = translate(
            &Selector::new()
                .resource_id("list")
                .child(Selector::new().class_name("Row"))
                .instance(2),
        );
        assert_eq!(texts(&h, &match_query(&h, &q)), vec!["Banana"]);
    }

    #[test]
    fn test_instance_out_of_range() {
        let h = Hierarchy::parse(XML).unwrap();
        let q = translate(&Selector::new().class_name("Row").instance(3));
        assert!(match_query(&h, &q).is_empty());
    }

    #[test]
    fn test_sibling_both_directions() {
        let h = Hierarchy::parse(XML).unwrap();
        let q = translate(&Selector::new().class_name("Edit").sibling(Selector::new()));
        let classes: Vec<_> = match_query(&h, &q)
            .iter()
            .map(|id| h.attr(*id, "class").unwrap())
            .collect();
        assert_eq!(classes, vec!["Text", "List"]);
    }

    #[test]
    fn test_contains_empty_needle_matches_missing_attr() {
        let h = Hierarchy::parse(XML).unwrap();
        let q = translate(&Selector::new().text_contains(""));
        assert_eq!(match_query(&h, &q).len(), 7);
    }

    #[test]
    fn test_error_matches_nothing() {
        let h = Hierarchy::parse(XML).unwrap();
        assert!(match_query(&h, &Query::Error).is_empty());
    }
}
