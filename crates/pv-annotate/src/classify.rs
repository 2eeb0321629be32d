//! Section classification: ordered pattern rules over aggregated block text.
//!
//! Rules are plain phrase lists so they can be unit-tested without a tree.
//! Priority order matters: specialty roofing materials come before generic
//! asphalt, because their blurbs often mention asphalt-adjacent vocabulary.

use pv_core::ExtraKind;
use pv_core::RoofingMaterial;
use pv_core::SectionKey;
use pv_core::SidingMaterial;
use pv_dom::DomTree;
use pv_dom::NodeId;
use tracing::debug;

/// One ordered classification rule: the block matches when any phrase
/// appears in its collapsed lowercase text.
#[derive(Debug, Clone, Copy)]
pub struct SectionRule {
    pub key: SectionKey,
    pub phrases: &'static [&'static str],
}

pub const SECTION_RULES: &[SectionRule] = &[
    SectionRule {
        key: SectionKey::Roofing(RoofingMaterial::Davinci),
        phrases: &["davinci", "composite slate"],
    },
    SectionRule {
        key: SectionKey::Roofing(RoofingMaterial::Cedar),
        phrases: &["cedar roof", "cedar shake roof", "red cedar shingle roof"],
    },
    SectionRule {
        key: SectionKey::Roofing(RoofingMaterial::Rubber),
        phrases: &["rubber roof", "epdm"],
    },
    SectionRule {
        key: SectionKey::Roofing(RoofingMaterial::Asphalt),
        phrases: &["asphalt", "architectural shingle"],
    },
    SectionRule {
        key: SectionKey::Siding(SidingMaterial::Cedar),
        phrases: &["cedar siding", "cedar shingle siding", "cedar clapboard"],
    },
    SectionRule {
        key: SectionKey::Siding(SidingMaterial::Synthetic),
        phrases: &["synthetic siding", "composite siding", "everlast"],
    },
    SectionRule {
        key: SectionKey::Siding(SidingMaterial::Vinyl),
        phrases: &["vinyl siding"],
    },
    SectionRule {
        key: SectionKey::Siding(SidingMaterial::Clapboard),
        phrases: &["clapboard siding", "primed clapboard"],
    },
    SectionRule {
        key: SectionKey::Decking,
        phrases: &["decking", "deck construction", "deck rebuild"],
    },
    SectionRule {
        key: SectionKey::Extra(ExtraKind::Windows),
        phrases: &["replacement window", "window installation", "new windows"],
    },
    SectionRule {
        key: SectionKey::Extra(ExtraKind::Skylights),
        phrases: &["skylight"],
    },
    SectionRule {
        key: SectionKey::Extra(ExtraKind::Trim),
        phrases: &["exterior trim", "trim work", "azek trim"],
    },
    SectionRule {
        key: SectionKey::Extra(ExtraKind::Plywood),
        phrases: &["plywood"],
    },
    SectionRule {
        key: SectionKey::Extra(ExtraKind::Chimney),
        phrases: &["chimney"],
    },
    SectionRule {
        key: SectionKey::Extra(ExtraKind::Gutters),
        phrases: &["gutter"],
    },
    SectionRule {
        key: SectionKey::Extra(ExtraKind::Detached),
        phrases: &["detached garage", "detached structure", "storage shed"],
    },
    SectionRule {
        key: SectionKey::Extra(ExtraKind::Custom),
        phrases: &["custom option", "additional option"],
    },
];

/// Vocabulary that marks a block as legal/acceptance/signature content.
/// Such blocks are never classified, hidden, or price-annotated.
const LEGAL_MARKERS: &[&str] = &[
    "terms and conditions",
    "accepted by",
    "date of acceptance",
    "signature",
    "hereby authorize",
    "payment schedule",
    "workmanship warranty",
];

pub fn rule_matches(rule: &SectionRule, lower_text: &str) -> bool {
    rule.phrases.iter().any(|phrase| lower_text.contains(phrase))
}

pub fn is_legal_text(lower_text: &str) -> bool {
    LEGAL_MARKERS.iter().any(|marker| lower_text.contains(marker))
}

/// A classified pricing block. `visible` stays unknown until gating runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub key: SectionKey,
    pub root: NodeId,
    pub visible: Option<bool>,
}

/// Classification state carried across reconciliation passes.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub sections: Vec<Section>,
    pub legal_blocks: Vec<NodeId>,
}

impl Classification {
    pub fn section(&self, key: SectionKey) -> Option<&Section> {
        self.sections.iter().find(|section| section.key == key)
    }

    pub fn section_of(&self, tree: &DomTree, node: NodeId) -> Option<SectionKey> {
        self.sections
            .iter()
            .find(|section| section.root == node || tree.is_descendant_of(node, section.root))
            .map(|section| section.key)
    }

    pub fn in_legal_block(&self, tree: &DomTree, node: NodeId) -> bool {
        self.legal_blocks
            .iter()
            .any(|block| *block == node || tree.is_descendant_of(node, *block))
    }

    fn key_assigned(&self, key: SectionKey) -> bool {
        self.sections.iter().any(|section| section.key == key)
    }

    fn overlaps_existing(&self, tree: &DomTree, candidate: NodeId) -> bool {
        self.sections.iter().any(|section| {
            section.root == candidate
                || tree.is_descendant_of(candidate, section.root)
                || tree.is_descendant_of(section.root, candidate)
        })
    }
}

/// Runs one classification pass. Idempotent: already-tagged roots are kept,
/// detached roots are dropped so a re-rendered block can be re-found.
pub fn classify(tree: &mut DomTree, state: &mut Classification) {
    let root = tree.root();
    state
        .sections
        .retain(|section| tree.is_descendant_of(section.root, root));
    state
        .legal_blocks
        .retain(|block| tree.is_descendant_of(*block, root));

    classify_blocks(tree, state);
    classify_by_line_labels(tree, state);

    for section in &state.sections {
        tree.set_attr(section.root, "data-section", section.key.as_str());
    }
}

fn classify_blocks(tree: &mut DomTree, state: &mut Classification) {
    let candidates: Vec<NodeId> = tree
        .walk(tree.root())
        .into_iter()
        .filter(|id| tree.tag(*id).is_some_and(|tag| tag == "table"))
        .collect();

    for candidate in candidates {
        if state.overlaps_existing(tree, candidate) {
            continue;
        }
        let text = collapse_lower(&tree.text_content(candidate));
        if text.is_empty() {
            continue;
        }
        if is_legal_text(&text) {
            if !state.legal_blocks.contains(&candidate) {
                tree.set_attr(candidate, "data-legal", "");
                state.legal_blocks.push(candidate);
            }
            continue;
        }
        let matched = SECTION_RULES
            .iter()
            .find(|rule| !state.key_assigned(rule.key) && rule_matches(rule, &text));
        if let Some(rule) = matched {
            state.sections.push(Section {
                key: rule.key,
                root: candidate,
                visible: None,
            });
        }
    }
}

/// Fallback: a section that never got a whole-block match can still be
/// located through a single unambiguous line label; the nearest common
/// ancestor of the matching runs becomes the section root.
fn classify_by_line_labels(tree: &mut DomTree, state: &mut Classification) {
    for rule in SECTION_RULES {
        if state.key_assigned(rule.key) {
            continue;
        }
        let label_nodes: Vec<NodeId> = tree
            .walk(tree.root())
            .into_iter()
            .filter(|id| {
                tree.text(*id)
                    .is_some_and(|text| {
                        let lower = collapse_lower(text);
                        rule.phrases.iter().any(|phrase| lower.contains(phrase))
                    })
            })
            .collect();
        if label_nodes.is_empty() {
            continue;
        }
        let Some(ancestor) = tree.nearest_common_ancestor(&label_nodes) else {
            continue;
        };
        let root = enclosing_block(tree, ancestor);
        let text = collapse_lower(&tree.text_content(root));
        if is_legal_text(&text) || state.overlaps_existing(tree, root) {
            continue;
        }
        debug!(key = rule.key.as_str(), "section classified via line-label fallback");
        state.sections.push(Section {
            key: rule.key,
            root,
            visible: None,
        });
    }
}

fn enclosing_block(tree: &DomTree, node: NodeId) -> NodeId {
    let mut current = node;
    loop {
        match tree.tag(current) {
            Some("table") | Some("div") | Some("section") | Some("p") => return current,
            _ => {}
        }
        match tree.parent(current) {
            Some(parent) if parent != tree.root() => current = parent,
            _ => return current,
        }
    }
}

fn collapse_lower(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut ws = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !ws {
                out.push(' ');
                ws = true;
            }
        } else {
            out.extend(ch.to_lowercase());
            ws = false;
        }
    }
    out.trim().to_owned()
}
