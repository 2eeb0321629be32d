//! Price-control injection: pairs every priced amount with a checkbox.
//!
//! Injection is strictly idempotent: a region already holding a control is
//! protected, so the pass can run any number of times over an annotated
//! document without double-wrapping.

use crate::classify::Classification;
use crate::tokens;
use crate::tokens::MoneySpan;
use crate::tokens::TotalKind;
use pv_core::ExtraKind;
use pv_core::Money;
use pv_core::SectionKey;
use pv_core::SelectionSnapshot;
use pv_dom::DomTree;
use pv_dom::NodeId;
use std::collections::HashMap;
use std::collections::HashSet;
use tracing::debug;

pub type ControlId = usize;

/// Interactive pairing of a detected amount with a checkbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceControl {
    pub id: ControlId,
    /// Wrapper element around the original matched markup.
    pub host: NodeId,
    pub amount: Money,
    pub section: Option<SectionKey>,
    /// Exclusivity group: controls sharing a group allow one checked member.
    pub group: Option<NodeId>,
    /// Set for quantity lines; `amount` is recomputed as rate x quantity.
    pub unit_rate: Option<Money>,
    pub quantity: u32,
    pub checked: bool,
}

/// A node the recalculation engine writes formatted totals into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalDisplay {
    pub kind: TotalKind,
    pub node: NodeId,
}

/// Registry of live controls and total displays for one proposal view.
#[derive(Debug, Clone, Default)]
pub struct ControlRegistry {
    controls: Vec<PriceControl>,
    next_id: ControlId,
    displays: Vec<TotalDisplay>,
    /// Checked state of controls whose host vanished, keyed by
    /// (section, amount) identity for best-effort restoration.
    retired: HashMap<(Option<SectionKey>, i64), bool>,
}

impl ControlRegistry {
    pub fn controls(&self) -> &[PriceControl] {
        &self.controls
    }

    pub fn control(&self, id: ControlId) -> Option<&PriceControl> {
        self.controls.iter().find(|control| control.id == id)
    }

    fn control_mut(&mut self, id: ControlId) -> Option<&mut PriceControl> {
        self.controls.iter_mut().find(|control| control.id == id)
    }

    pub fn displays(&self) -> &[TotalDisplay] {
        &self.displays
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Sets a checkbox, enforcing at most one checked control per group.
    /// Returns `true` when any state changed.
    pub fn set_checked(&mut self, id: ControlId, checked: bool) -> bool {
        let Some(target) = self.control(id) else {
            return false;
        };
        let group = target.group;
        let mut changed = false;

        if checked {
            if let Some(group) = group {
                for other in &mut self.controls {
                    if other.id != id && other.group == Some(group) && other.checked {
                        other.checked = false;
                        changed = true;
                    }
                }
            }
        }
        if let Some(target) = self.control_mut(id) {
            if target.checked != checked {
                target.checked = checked;
                changed = true;
            }
        }
        changed
    }

    pub fn set_quantity(&mut self, id: ControlId, quantity: u32) -> bool {
        match self.control_mut(id) {
            Some(control) if control.unit_rate.is_some() && control.quantity != quantity => {
                control.quantity = quantity;
                true
            }
            _ => false,
        }
    }

    pub fn update_amount(&mut self, id: ControlId, amount: Money) {
        if let Some(control) = self.control_mut(id) {
            control.amount = amount;
        }
    }

    /// Drops controls whose host is no longer attached, remembering their
    /// checked state by (section, amount) identity.
    pub fn prune_detached(&mut self, tree: &DomTree) {
        let root = tree.root();
        let mut kept = Vec::with_capacity(self.controls.len());
        for control in self.controls.drain(..) {
            if tree.is_descendant_of(control.host, root) {
                kept.push(control);
            } else {
                self.retired
                    .insert((control.section, control.amount.cents()), control.checked);
            }
        }
        self.controls = kept;
        self.displays
            .retain(|display| tree.is_descendant_of(display.node, root));
    }

    fn register(
        &mut self,
        host: NodeId,
        amount: Money,
        section: Option<SectionKey>,
        group: Option<NodeId>,
    ) -> ControlId {
        let id = self.next_id;
        self.next_id += 1;
        let checked = self
            .retired
            .remove(&(section, amount.cents()))
            .unwrap_or(false);
        self.controls.push(PriceControl {
            id,
            host,
            amount,
            section,
            group,
            unit_rate: None,
            quantity: 1,
            checked,
        });
        id
    }
}

/// Runs one injection pass; returns the number of controls created.
pub fn inject(
    tree: &mut DomTree,
    state: &Classification,
    registry: &mut ControlRegistry,
    snapshot: &SelectionSnapshot,
) -> usize {
    registry.prune_detached(tree);
    ensure_total_displays(tree, registry);

    let matches = tokens::scan_money(tree, tree.root());
    let protected_totals = placeholder_regions(tree);
    let tiered_rows = tiered_total_rows(tree, &matches);

    // Reverse document order keeps earlier offsets and child indexes valid
    // while wrapping mutates the tree.
    let mut wrapped = Vec::new();
    for money in matches.iter().rev() {
        let anchor = match money.span {
            MoneySpan::Inline { node, .. } => node,
            MoneySpan::Split { parent, .. } => parent,
        };
        if is_protected(tree, state, anchor, &protected_totals) {
            continue;
        }

        let row = enclosing_row(tree, anchor);
        let host = match money.span {
            MoneySpan::Inline { node, start, end } => tree.wrap_text_range(
                node,
                start,
                end,
                "span",
                control_attrs(money.amount),
            ),
            MoneySpan::Split {
                parent,
                start_child,
                end_child,
                end_offset,
            } => {
                if let Some(offset) = end_offset {
                    let last = tree.children(parent)[end_child - 1];
                    let _ = tree.split_text(last, offset);
                }
                tree.wrap_child_range(
                    parent,
                    start_child,
                    end_child,
                    "span",
                    control_attrs(money.amount),
                )
            }
        };
        let Some(host) = host else {
            continue;
        };

        let section = state.section_of(tree, host);
        let group = control_group(state, section, row, &tiered_rows);
        wrapped.push((host, money.amount, section, group));
    }

    // Registration runs forward so control ids and the registry's order
    // follow the document, not the wrapping walk.
    let created = wrapped.len();
    for (host, amount, section, group) in wrapped.into_iter().rev() {
        let id = registry.register(host, amount, section, group);
        tree.set_attr(host, "data-control-id", &id.to_string());
        seed_quantity(tree, registry, id, host, section, amount, snapshot);
    }

    if created > 0 {
        debug!(created, total = registry.len(), "price controls injected");
    }
    created
}

/// Regions around total labels are protected wholesale: a running total
/// printed next to its label must never become a checkable line.
fn placeholder_regions(tree: &DomTree) -> Vec<NodeId> {
    let mut regions = Vec::new();
    for placeholder in tokens::scan_placeholders(tree, tree.root()) {
        regions.push(placeholder.node);
        let region = enclosing_row(tree, placeholder.node)
            .or_else(|| enclosing_block(tree, placeholder.node));
        if let Some(region) = region {
            regions.push(region);
        }
    }
    regions
}

fn control_attrs(amount: Money) -> Vec<(String, String)> {
    vec![
        ("data-price-control".to_owned(), String::new()),
        ("data-amount".to_owned(), amount.to_plain_string()),
    ]
}

/// Tiered-total rows: one `tr` presenting the same total across multiple
/// alternative tiers. Only one member may stay checked.
fn tiered_total_rows(tree: &DomTree, matches: &[tokens::MoneyMatch]) -> HashSet<NodeId> {
    let mut per_row: HashMap<NodeId, usize> = HashMap::new();
    for money in matches {
        let anchor = match money.span {
            MoneySpan::Inline { node, .. } => node,
            MoneySpan::Split { parent, .. } => parent,
        };
        if let Some(row) = enclosing_row(tree, anchor) {
            *per_row.entry(row).or_insert(0) += 1;
        }
    }
    per_row
        .into_iter()
        .filter(|(row, count)| {
            *count >= 2
                && tree
                    .text_content(*row)
                    .to_ascii_lowercase()
                    .contains("total")
        })
        .map(|(row, _)| row)
        .collect()
}

fn control_group(
    state: &Classification,
    section: Option<SectionKey>,
    row: Option<NodeId>,
    tiered_rows: &HashSet<NodeId>,
) -> Option<NodeId> {
    if let Some(row) = row {
        if tiered_rows.contains(&row) {
            return Some(row);
        }
    }
    // Detached-structure options: at most one structure selected at a time.
    if section == Some(SectionKey::Extra(ExtraKind::Detached)) {
        return state
            .section(SectionKey::Extra(ExtraKind::Detached))
            .map(|section| section.root);
    }
    None
}

fn seed_quantity(
    tree: &DomTree,
    registry: &mut ControlRegistry,
    id: ControlId,
    host: NodeId,
    section: Option<SectionKey>,
    amount: Money,
    snapshot: &SelectionSnapshot,
) {
    let Some(section) = section else {
        return;
    };
    let Some(count) = snapshot.counts.get(section.as_str()).copied() else {
        return;
    };
    if count == 0 {
        return;
    }
    // Only per-unit lines multiply; flat amounts elsewhere in the same
    // section keep their printed price.
    let Some(block) = enclosing_block(tree, host) else {
        return;
    };
    let line = tree.text_content(block).to_ascii_lowercase();
    if !(line.contains("each") || line.contains("per unit")) {
        return;
    }
    if let Some(control) = registry.control_mut(id) {
        control.unit_rate = Some(amount);
        control.quantity = count;
    }
}

fn is_protected(
    tree: &DomTree,
    state: &Classification,
    node: NodeId,
    protected_totals: &[NodeId],
) -> bool {
    if state.in_legal_block(tree, node) {
        return true;
    }
    if protected_totals
        .iter()
        .any(|region| node == *region || tree.is_descendant_of(node, *region))
    {
        return true;
    }
    if has_attr_on_self_or_ancestor(tree, node, "data-price-control") {
        return true;
    }
    if has_attr_on_self_or_ancestor(tree, node, "data-total-display") {
        return true;
    }
    if in_carpentry_disclaimer(tree, node) {
        return true;
    }
    false
}

fn has_attr_on_self_or_ancestor(tree: &DomTree, node: NodeId, name: &str) -> bool {
    if tree.attr(node, name).is_some() {
        return true;
    }
    tree.ancestors(node)
        .into_iter()
        .any(|ancestor| tree.attr(ancestor, name).is_some())
}

/// Carpentry-rate disclaimers quote an hourly rate that is informational,
/// never a selectable price.
fn in_carpentry_disclaimer(tree: &DomTree, node: NodeId) -> bool {
    let Some(block) = enclosing_block(tree, node) else {
        return false;
    };
    let text = tree.text_content(block).to_ascii_lowercase();
    text.contains("carpentry") && (text.contains("per hour") || text.contains("hourly rate"))
}

fn enclosing_row(tree: &DomTree, node: NodeId) -> Option<NodeId> {
    if tree.tag(node) == Some("tr") {
        return Some(node);
    }
    tree.ancestors(node)
        .into_iter()
        .find(|ancestor| tree.tag(*ancestor) == Some("tr"))
}

fn enclosing_block(tree: &DomTree, node: NodeId) -> Option<NodeId> {
    let blocks = ["p", "td", "th", "li", "div", "tr"];
    if tree.tag(node).is_some_and(|tag| blocks.contains(&tag)) {
        return Some(node);
    }
    tree.ancestors(node)
        .into_iter()
        .find(|ancestor| tree.tag(*ancestor).is_some_and(|tag| blocks.contains(&tag)))
}

/// Pairs each total-by-category label with one dedicated display node.
fn ensure_total_displays(tree: &mut DomTree, registry: &mut ControlRegistry) {
    // Re-discover displays surviving in the tree (attrs are authoritative
    // here because a re-render may have replaced the nodes we knew).
    registry.displays = tree
        .walk(tree.root())
        .into_iter()
        .filter_map(|id| {
            let kind = tree.attr(id, "data-total-display")?;
            Some(TotalDisplay {
                kind: TotalKind::from_str(kind)?,
                node: id,
            })
        })
        .collect();

    for placeholder in tokens::scan_placeholders(tree, tree.root()) {
        if registry
            .displays
            .iter()
            .any(|display| display.kind == placeholder.kind)
        {
            continue;
        }
        let Some(parent) = tree.parent(placeholder.node) else {
            continue;
        };
        let Some(index) = tree.index_in_parent(placeholder.node) else {
            continue;
        };
        let display = tree.create_element_with_attrs(
            "span",
            vec![(
                "data-total-display".to_owned(),
                placeholder.kind.as_str().to_owned(),
            )],
        );
        tree.insert_child(parent, index + 1, display);
        registry.displays.push(TotalDisplay {
            kind: placeholder.kind,
            node: display,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::ControlRegistry;
    use super::inject;
    use crate::classify::Classification;
    use crate::classify::classify;
    use crate::tokens::TotalKind;
    use pv_core::Money;
    use pv_core::SelectionSnapshot;
    use pv_dom::DomTree;
    use pv_markup::parse_document;

    fn annotate(source: &str) -> (DomTree, Classification, ControlRegistry) {
        let mut tree = parse_document(source);
        let mut state = Classification::default();
        classify(&mut tree, &mut state);
        let mut registry = ControlRegistry::default();
        inject(&mut tree, &state, &mut registry, &SelectionSnapshot::default());
        (tree, state, registry)
    }

    #[test]
    fn wraps_each_amount_in_exactly_one_control() {
        let (mut tree, state, mut registry) = annotate(
            "<table><tr><td>Asphalt roof $8,200.00</td><td>ridge vent $450.00</td></tr></table>",
        );
        assert_eq!(registry.len(), 2);
        let before = registry.len();
        inject(
            &mut tree,
            &state,
            &mut registry,
            &SelectionSnapshot::default(),
        );
        assert_eq!(registry.len(), before);
    }

    #[test]
    fn split_amount_becomes_a_single_control() {
        let (tree, _, registry) = annotate(
            "<table><tr><td>Asphalt roof</td>\
             <td><span>$</span><span><b>3,600.00</b></span></td></tr></table>",
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.controls()[0].amount, Money::from_cents(360_000));
        let host = registry.controls()[0].host;
        assert_eq!(tree.attr(host, "data-amount"), Some("3600.00"));
        assert_eq!(tree.text_content(host), "$3,600.00");
    }

    #[test]
    fn controls_enumerate_in_document_order() {
        let (_, _, registry) = annotate(
            "<table><tr><td>Asphalt roof $8,200.00</td></tr></table>\
             <table><tr><td>Vinyl Siding $4,100.00</td></tr></table>",
        );
        let amounts: Vec<Money> = registry
            .controls()
            .iter()
            .map(|control| control.amount)
            .collect();
        assert_eq!(
            amounts,
            vec![Money::from_cents(820_000), Money::from_cents(410_000)]
        );
        assert!(registry.controls()[0].id < registry.controls()[1].id);
    }

    #[test]
    fn running_total_row_is_never_annotated() {
        let (_, _, registry) = annotate(
            "<table><tr><td>Grand Total</td><td>$12,300.00</td></tr></table>",
        );
        assert!(registry.is_empty());
        assert_eq!(registry.displays().len(), 1);
    }

    #[test]
    fn split_control_excludes_trailing_prose() {
        let (tree, _, registry) = annotate(
            "<table><tr><td>Asphalt roof</td>\
             <td><span>$</span>3,600.00 installed and hauled</td></tr></table>",
        );
        assert_eq!(registry.len(), 1);
        let host = registry.controls()[0].host;
        assert_eq!(tree.text_content(host), "$3,600.00");
        let cell = tree.parent(host).unwrap_or_default();
        assert_eq!(tree.text_content(cell), "$3,600.00 installed and hauled");
    }

    #[test]
    fn controls_default_to_unchecked() {
        let (_, _, registry) = annotate(
            "<table><tr><td>Asphalt roof $8,200.00</td></tr></table>",
        );
        assert!(registry.controls().iter().all(|control| !control.checked));
    }

    #[test]
    fn legal_blocks_are_never_annotated() {
        let (_, _, registry) = annotate(
            "<table><tr><td>Terms and Conditions: deposit of $500.00 due on signing</td></tr></table>",
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn carpentry_rate_disclaimer_is_protected() {
        let (_, _, registry) = annotate(
            "<p>All carpentry repairs billed at $85.00 per hour plus materials.</p>",
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn tiered_total_row_enforces_single_checked() {
        let (_, _, mut registry) = annotate(
            "<table><tr><td>Asphalt roof total</td>\
             <td>Good $8,200.00</td><td>Better $9,400.00</td><td>Best $11,000.00</td></tr></table>",
        );
        assert_eq!(registry.len(), 3);
        let ids: Vec<usize> = registry.controls().iter().map(|control| control.id).collect();
        registry.set_checked(ids[0], true);
        registry.set_checked(ids[1], true);
        let checked: Vec<usize> = registry
            .controls()
            .iter()
            .filter(|control| control.checked)
            .map(|control| control.id)
            .collect();
        assert_eq!(checked, vec![ids[1]]);
    }

    #[test]
    fn total_label_gets_one_display_node_and_no_control() {
        let (tree, _, registry) = annotate("<p>Grand Total: $0.00</p><p>Grand Total again</p>");
        let displays = registry.displays();
        assert_eq!(displays.len(), 1);
        assert_eq!(displays[0].kind, TotalKind::Final);
        assert_eq!(tree.attr(displays[0].node, "data-total-display"), Some("final"));
        assert!(registry.is_empty());
    }

    #[test]
    fn checked_state_survives_host_replacement() {
        let (mut tree, state, mut registry) = annotate(
            "<table><tr><td>Asphalt roof $8,200.00</td></tr></table>",
        );
        let control = registry.controls()[0].clone();
        registry.set_checked(control.id, true);

        // Simulate a host re-render wiping the wrapper.
        tree.detach(control.host);
        let row = tree.find_first(tree.root(), "tr").unwrap_or_default();
        let cell = tree.create_element("td");
        let text = tree.create_text("Asphalt roof $8,200.00");
        tree.append_child(cell, text);
        tree.append_child(row, cell);

        inject(&mut tree, &state, &mut registry, &SelectionSnapshot::default());
        assert_eq!(registry.len(), 1);
        let rebuilt = &registry.controls()[0];
        assert!(rebuilt.checked);
        assert_eq!(rebuilt.amount, Money::from_cents(820_000));
    }

    #[test]
    fn quantity_lines_are_seeded_from_snapshot_counts() {
        let mut tree = parse_document(
            "<table><tr><td>Velux skylight, installed $950.00 each</td></tr></table>",
        );
        let mut state = Classification::default();
        classify(&mut tree, &mut state);
        let mut registry = ControlRegistry::default();
        let mut snapshot = SelectionSnapshot::default();
        snapshot.counts.insert("extras.skylights".to_owned(), 3);
        inject(&mut tree, &state, &mut registry, &snapshot);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.controls()[0].quantity, 3);
        assert_eq!(
            registry.controls()[0].unit_rate,
            Some(Money::from_cents(95_000))
        );
    }

    #[test]
    fn flat_amounts_in_a_counted_section_are_not_multiplied() {
        let mut tree = parse_document(
            "<table><tr><td>Velux skylight, installed $950.00 each</td>\
             <td>flashing kit $120.00</td></tr></table>",
        );
        let mut state = Classification::default();
        classify(&mut tree, &mut state);
        let mut registry = ControlRegistry::default();
        let mut snapshot = SelectionSnapshot::default();
        snapshot.counts.insert("extras.skylights".to_owned(), 3);
        inject(&mut tree, &state, &mut registry, &snapshot);
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.controls()[0].unit_rate,
            Some(Money::from_cents(95_000))
        );
        assert_eq!(registry.controls()[1].unit_rate, None);
        assert_eq!(registry.controls()[1].quantity, 1);
    }
}
