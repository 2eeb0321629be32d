//! Recalculation: derives running totals from live control state.
//!
//! Totals are never stored independently; every recompute rebuilds them
//! from the checked controls, so two consecutive runs with no state change
//! always produce identical output.

use crate::inject::ControlRegistry;
use crate::tokens::TotalKind;
use pv_core::Money;
use pv_core::WorkCategory;
use pv_dom::DomTree;
use pv_dom::NodeId;
use std::collections::BTreeMap;

/// Derived totals for one recompute pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunningTotal {
    pub grand: Money,
    /// Checked sums per section key string, for host UIs.
    pub per_section: BTreeMap<String, Money>,
}

impl RunningTotal {
    fn category_total(&self, category: WorkCategory) -> Money {
        let prefix = match category {
            WorkCategory::Roofing => "roofing",
            WorkCategory::Siding => "siding",
            WorkCategory::Decking => "decking",
        };
        self.per_section
            .iter()
            .filter(|(key, _)| key.as_str() == prefix || key.starts_with(&format!("{prefix}.")))
            .fold(Money::ZERO, |acc, (_, amount)| acc.add(*amount))
    }
}

/// Recomputes quantity-driven amounts, sums checked controls, and writes
/// the formatted results into every tagged total display.
pub fn recompute(tree: &mut DomTree, registry: &mut ControlRegistry) -> RunningTotal {
    apply_quantity_rates(tree, registry);

    let mut total = RunningTotal::default();
    for control in registry.controls() {
        if !control.checked {
            continue;
        }
        total.grand = total.grand.add(control.amount);
        if let Some(section) = control.section {
            let entry = total
                .per_section
                .entry(section.as_str().to_owned())
                .or_insert(Money::ZERO);
            *entry = entry.add(control.amount);
        }
    }

    for display in registry.displays().to_vec() {
        let value = match display.kind {
            TotalKind::Final => total.grand,
            TotalKind::Roofing => total.category_total(WorkCategory::Roofing),
            TotalKind::Siding => total.category_total(WorkCategory::Siding),
            TotalKind::Decking => total.category_total(WorkCategory::Decking),
        };
        tree.set_sole_text_child(display.node, &value.to_string());
    }

    total
}

/// Lines priced as rate x quantity get their amount refreshed before any
/// summing happens.
fn apply_quantity_rates(tree: &mut DomTree, registry: &mut ControlRegistry) {
    let updates: Vec<(usize, NodeId, Money)> = registry
        .controls()
        .iter()
        .filter_map(|control| {
            let rate = control.unit_rate?;
            let amount = rate.scale(control.quantity);
            (amount != control.amount).then_some((control.id, control.host, amount))
        })
        .collect();

    for (id, host, amount) in updates {
        registry.update_amount(id, amount);
        tree.set_attr(host, "data-amount", &amount.to_plain_string());
        replace_content(tree, host, &amount.to_string());
    }
}

fn replace_content(tree: &mut DomTree, host: NodeId, text: &str) {
    let children: Vec<NodeId> = tree.children(host).to_vec();
    for child in children {
        tree.detach(child);
    }
    let node = tree.create_text(text);
    tree.append_child(host, node);
}
