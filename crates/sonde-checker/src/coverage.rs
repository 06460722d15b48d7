//! Occlusion annotation.
//!
//! Widgets are visited depth-first with siblings ordered by their
//! `drawing-order`. Every visited widget's center goes into an R-tree.
//! A clickable widget first claims every center that lies inside its
//! bounds: those widgets are marked covered and leave the index, so a
//! covered widget never covers anything later.

use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};

use crate::bounds::{Bounds, BoundsError};
use crate::hierarchy::{Hierarchy, NodeId};

type CenterPoint = GeomWithData<[f64; 2], NodeId>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoverageError {
    #[error("widget {node} has {source}")]
    Bounds {
        node: usize,
        #[source]
        source: BoundsError,
    },
}

/// Recompute `covered` for every widget. On error, widgets visited before
/// the failure keep their annotation and the rest stay uncovered.
pub fn compute_coverage(hierarchy: &mut Hierarchy) -> Result<usize, CoverageError> {
    hierarchy.reset_coverage();
    if hierarchy.is_empty() {
        return Ok(0);
    }

    let order = drawing_order(hierarchy);
    let mut index: RTree<CenterPoint> = RTree::new();
    let mut covered = 0;

    for id in order {
        let node = hierarchy.node(id);
        let Some(raw) = node.raw_attr("bounds") else {
            continue;
        };
        if node.raw_attr("visible-to-user") == Some("false") {
            continue;
        }
        let bounds = Bounds::parse(raw).map_err(|source| CoverageError::Bounds {
            node: id.0,
            source,
        })?;

        if node.flag("clickable") {
            let area = AABB::from_corners(bounds.lower(), bounds.upper());
            let hidden: Vec<CenterPoint> = index.locate_in_envelope(&area).cloned().collect();
            for point in hidden {
                hierarchy.node_mut(point.data).covered = true;
                index.remove(&point);
                covered += 1;
            }
        }
        index.insert(CenterPoint::new(bounds.center(), id));
    }
    Ok(covered)
}

/// Widgets in depth-first order, siblings sorted by `drawing-order`
/// (missing means 0, ties keep document order).
pub fn drawing_order(hierarchy: &Hierarchy) -> Vec<NodeId> {
    let mut out = Vec::with_capacity(hierarchy.len());
    let mut stack = vec![hierarchy.root()];
    while let Some(id) = stack.pop() {
        let node = hierarchy.node(id);
        if node.is_widget() {
            out.push(id);
        }
        let children = sorted_children(hierarchy, &node.children);
        stack.extend(children.into_iter().rev());
    }
    out
}

fn sorted_children(hierarchy: &Hierarchy, children: &[NodeId]) -> Vec<NodeId> {
    let keys: Option<Vec<i64>> = children
        .iter()
        .map(|c| match hierarchy.node(*c).raw_attr("drawing-order") {
            None => Some(0),
            Some(raw) => raw.trim().parse().ok(),
        })
        .collect();
    let mut ordered = children.to_vec();
    // An unparseable key leaves the siblings in document order.
    if let Some(keys) = keys {
        let mut keyed: Vec<(i64, NodeId)> = keys.into_iter().zip(ordered).collect();
        keyed.sort_by_key(|(k, _)| *k);
        ordered = keyed.into_iter().map(|(_, id)| id).collect();
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered(h: &Hierarchy, id: usize) -> bool {
        h.node(NodeId(id)).covered
    }

    #[test]
    fn test_drawing_order_sorts_siblings_stably() {
        let h = Hierarchy::parse(
            r#"<hierarchy>
                <node text="a" drawing-order="2"/>
                <node text="b"/>
                <node text="c" drawing-order="1"/>
                <node text="d" drawing-order="1"/>
            </hierarchy>"#,
        )
        .unwrap();
        let texts: Vec<_> = drawing_order(&h)
            .into_iter()
            .map(|id| h.attr(id, "text").unwrap())
            .collect();
        assert_eq!(texts, vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn test_unparseable_order_keeps_document_order() {
        let h = Hierarchy::parse(
            r#"<hierarchy>
                <node text="a" drawing-order="x"/>
                <node text="b" drawing-order="0"/>
            </hierarchy>"#,
        )
        .unwrap();
        let first = drawing_order(&h)[0];
        assert_eq!(h.attr(first, "text"), Some("a"));
    }

    #[test]
    fn test_covered_widget_cannot_cover_again() {
        // Each clickable layer hides the one drawn just before it.
        let mut h = Hierarchy::parse(
            r#"<hierarchy>
                <node bounds="[0,0][100,100]" drawing-order="0"/>
                <node bounds="[0,0][100,100]" clickable="true" drawing-order="1"/>
                <node bounds="[0,0][100,100]" clickable="true" drawing-order="2"/>
            </hierarchy>"#,
        )
        .unwrap();
        assert_eq!(compute_coverage(&mut h).unwrap(), 2);
        assert!(covered(&h, 1));
        assert!(covered(&h, 2));
        assert!(!covered(&h, 3));
    }

    #[test]
    fn test_nodes_without_bounds_are_skipped() {
        let mut h = Hierarchy::parse(
            r#"<hierarchy>
                <node/>
                <node bounds="[0,0][10,10]" clickable="true"/>
            </hierarchy>"#,
        )
        .unwrap();
        assert_eq!(compute_coverage(&mut h).unwrap(), 0);
        assert!(!covered(&h, 1));
    }

    #[test]
    fn test_malformed_bounds_keeps_partial_result() {
        let mut h = Hierarchy::parse(
            r#"<hierarchy>
                <node bounds="[0,0][10,10]"/>
                <node bounds="[0,0][10,10]" clickable="true"/>
                <node bounds="garbage"/>
            </hierarchy>"#,
        )
        .unwrap();
        let err = compute_coverage(&mut h).unwrap_err();
        assert!(matches!(err, CoverageError::Bounds { node: 3, .. }));
        assert!(covered(&h, 1));
    }

    #[test]
    fn test_recompute_starts_fresh() {
        let mut h = Hierarchy::parse(r#"<hierarchy><node bounds="[0,0][1,1]"/></hierarchy>"#).unwrap();
        h.node_mut(NodeId(1)).covered = true;
        compute_coverage(&mut h).unwrap();
        assert!(!covered(&h, 1));
    }
}
