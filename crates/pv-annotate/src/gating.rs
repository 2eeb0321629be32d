//! Selection gating: decides which classified sections a customer sees.
//!
//! Unknown flags always degrade toward "show the content"; a proposal with
//! an incomplete snapshot renders everything rather than hiding options.

use crate::classify::Classification;
use pv_core::ExtraKind;
use pv_core::SectionKey;
use pv_core::SelectionSnapshot;
use pv_core::TriState;
use pv_dom::DomTree;
use pv_dom::NodeId;

/// Pure visibility rule for one section key.
///
/// Precedence: an explicitly deselected work category hides every
/// sub-section under it; a selected category defers to the material's own
/// flag; trim stays visible regardless, because individual trim line items
/// remain selectable even when the parent extra is toggled off.
pub fn visibility(key: SectionKey, snapshot: &SelectionSnapshot) -> bool {
    match key.work_category() {
        Some(category) => match snapshot.work_selected.get(category) {
            TriState::NotSelected => false,
            TriState::Selected | TriState::Unknown => {
                let material = if key == SectionKey::Decking {
                    TriState::Selected
                } else {
                    snapshot.material(key)
                };
                material != TriState::NotSelected
            }
        },
        None => {
            if key == SectionKey::Extra(ExtraKind::Trim) {
                return true;
            }
            snapshot.extra(key) != TriState::NotSelected
        }
    }
}

/// Applies visibility to every classified section and recomputes dividers.
pub fn apply(tree: &mut DomTree, state: &mut Classification, snapshot: &SelectionSnapshot) {
    for index in 0..state.sections.len() {
        let key = state.sections[index].key;
        let root = state.sections[index].root;
        let visible = visibility(key, snapshot);
        state.sections[index].visible = Some(visible);
        if visible {
            tree.remove_attr(root, "hidden");
        } else {
            tree.set_attr(root, "hidden", "");
        }
    }
    recompute_dividers(tree, state);
}

/// Hides any divider rule that sits next to a hidden section so no dangling
/// separator renders beside a gap.
fn recompute_dividers(tree: &mut DomTree, state: &Classification) {
    let dividers: Vec<NodeId> = tree
        .walk(tree.root())
        .into_iter()
        .filter(|id| tree.tag(*id) == Some("hr"))
        .collect();

    for divider in dividers {
        let before = neighbor_section(tree, state, divider, Direction::Before);
        let after = neighbor_section(tree, state, divider, Direction::After);
        let hidden_neighbor = before == Some(true) || after == Some(true);
        if hidden_neighbor {
            tree.set_attr(divider, "hidden", "");
        } else {
            tree.remove_attr(divider, "hidden");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Before,
    After,
}

/// Walks sibling elements from a divider; returns whether the nearest
/// sibling that is (or contains) a section root is hidden.
fn neighbor_section(
    tree: &DomTree,
    state: &Classification,
    divider: NodeId,
    direction: Direction,
) -> Option<bool> {
    let parent = tree.parent(divider)?;
    let index = tree.index_in_parent(divider)?;
    let siblings = tree.children(parent);

    let candidates: Vec<NodeId> = match direction {
        Direction::Before => siblings[..index].iter().rev().copied().collect(),
        Direction::After => siblings[index + 1..].to_vec(),
    };

    for sibling in candidates {
        if !tree.is_element(sibling) {
            continue;
        }
        let section = state.sections.iter().find(|section| {
            section.root == sibling || tree.is_descendant_of(section.root, sibling)
        });
        if let Some(section) = section {
            return Some(section.visible == Some(false));
        }
    }
    None
}
