//! Money and placeholder tokenization over the document tree.
//!
//! Word-processor exports routinely split a dollar sign from its digits
//! across nested formatting runs, so detection happens in two passes: the
//! common same-run case, then a bounded look-ahead across sibling runs.

use once_cell::sync::Lazy;
use pv_core::Money;
use pv_dom::DomTree;
use pv_dom::NodeId;
use regex::Regex;

/// Sibling look-ahead window for split symbol/digit runs.
const SPLIT_WINDOW_SIBLINGS: usize = 6;
const SPLIT_WINDOW_CHARS: usize = 120;

static INLINE_MONEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\s*([0-9][0-9,]*(?:\.[0-9]{1,2})?)").unwrap_or_else(|_| unreachable!())
});

static LEADING_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([0-9][0-9,]*(?:\.[0-9]{1,2})?)").unwrap_or_else(|_| unreachable!())
});

/// Where a detected amount lives in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoneySpan {
    /// Symbol and digits inside one text run; byte offsets into that run.
    Inline {
        node: NodeId,
        start: usize,
        end: usize,
    },
    /// Symbol at the tail of one run, digits in later sibling runs. The
    /// children `[start_child, end_child)` of `parent` cover symbol and
    /// digits together.
    Split {
        parent: NodeId,
        start_child: usize,
        end_child: usize,
        /// When the final child is a text run with prose after the digits,
        /// the byte offset where the amount ends inside that run.
        end_offset: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoneyMatch {
    pub span: MoneySpan,
    pub amount: Money,
}

/// Destination for a recomputed total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TotalKind {
    Final,
    Roofing,
    Siding,
    Decking,
}

impl TotalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TotalKind::Final => "final",
            TotalKind::Roofing => "roofing",
            TotalKind::Siding => "siding",
            TotalKind::Decking => "decking",
        }
    }

    pub fn from_str(input: &str) -> Option<TotalKind> {
        match input {
            "final" => Some(TotalKind::Final),
            "roofing" => Some(TotalKind::Roofing),
            "siding" => Some(TotalKind::Siding),
            "decking" => Some(TotalKind::Decking),
            _ => None,
        }
    }
}

/// A detected total-by-category label; the injector pairs each with a
/// dedicated display node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderMatch {
    /// Text node holding the label phrase.
    pub node: NodeId,
    pub kind: TotalKind,
}

/// Ordered scan of the subtree for dollar amounts.
pub fn scan_money(tree: &DomTree, from: NodeId) -> Vec<MoneyMatch> {
    let mut out = Vec::new();
    for id in tree.walk(from) {
        let Some(text) = tree.text(id) else {
            continue;
        };
        scan_inline(tree, id, text, &mut out);
        scan_split(tree, id, text, &mut out);
    }
    out
}

fn scan_inline(_tree: &DomTree, id: NodeId, text: &str, out: &mut Vec<MoneyMatch>) {
    for captures in INLINE_MONEY.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let Some(digits) = captures.get(1) else {
            continue;
        };
        if letter_follows(text, digits.end()) {
            continue;
        }
        let Some(amount) = Money::parse(digits.as_str()) else {
            continue;
        };
        if !amount.is_positive() {
            continue;
        }
        out.push(MoneyMatch {
            span: MoneySpan::Inline {
                node: id,
                start: whole.start(),
                end: digits.end(),
            },
            amount,
        });
    }
}

fn scan_split(tree: &DomTree, id: NodeId, text: &str, out: &mut Vec<MoneyMatch>) {
    // Only a run that ends with a dangling `$` starts a split match.
    let Some(symbol_offset) = text.rfind('$') else {
        return;
    };
    if text[symbol_offset + 1..].chars().any(|ch| ch.is_ascii_digit()) {
        return;
    }
    if !text[symbol_offset + 1..].trim().is_empty() {
        return;
    }

    // Climb out of formatting wrappers until something follows the symbol.
    // A block boundary with nothing after the `$` ends the search.
    let mut carrier = id;
    let (parent, index) = loop {
        let Some(parent) = tree.parent(carrier) else {
            return;
        };
        let Some(index) = tree.index_in_parent(carrier) else {
            return;
        };
        if index + 1 < tree.children(parent).len() {
            break (parent, index);
        }
        if is_block_tag(tree.tag(parent).unwrap_or("")) {
            return;
        }
        carrier = parent;
    };

    // Tag-stripped concatenation of a bounded window of following runs.
    let siblings = tree.children(parent);
    let mut window = String::new();
    let mut boundaries = Vec::new();
    for sibling in siblings
        .iter()
        .skip(index + 1)
        .take(SPLIT_WINDOW_SIBLINGS)
    {
        window.push_str(&tree.text_content(*sibling));
        boundaries.push(window.len());
        if window.len() >= SPLIT_WINDOW_CHARS {
            break;
        }
    }

    let Some(captures) = LEADING_AMOUNT.captures(&window) else {
        return;
    };
    let Some(digits) = captures.get(1) else {
        return;
    };
    if letter_follows(&window, digits.end()) {
        return;
    }
    let Some(amount) = Money::parse(digits.as_str()) else {
        return;
    };
    if !amount.is_positive() {
        return;
    }

    let consumed = boundaries
        .iter()
        .position(|boundary| *boundary >= digits.end())
        .map(|position| position + 1)
        .unwrap_or(boundaries.len());

    // Prose trailing the digits in the last consumed run must stay outside
    // the eventual wrapper; element runs cannot be split this way.
    let tail_start = if consumed >= 2 { boundaries[consumed - 2] } else { 0 };
    let offset_in_last = digits.end() - tail_start;
    let last_child = siblings[index + consumed];
    let end_offset = match tree.text(last_child) {
        Some(last_text) if offset_in_last < last_text.len() => Some(offset_in_last),
        _ => None,
    };

    out.push(MoneyMatch {
        span: MoneySpan::Split {
            parent,
            start_child: index,
            end_child: index + 1 + consumed,
            end_offset,
        },
        amount,
    });
}

fn is_block_tag(tag: &str) -> bool {
    matches!(
        tag,
        "document"
            | "body"
            | "div"
            | "p"
            | "td"
            | "th"
            | "tr"
            | "table"
            | "li"
            | "ul"
            | "ol"
            | "section"
    )
}

/// Rejects amounts embedded in descriptive text such as unit specs
/// (`$12x14`, `$16d`). Only the character directly after the digits
/// disqualifies; a following word after whitespace does not.
fn letter_follows(text: &str, from: usize) -> bool {
    text[from..]
        .chars()
        .next()
        .is_some_and(|ch| ch.is_alphabetic())
}

const FINAL_TOTAL_LABELS: [&str; 3] = ["grand total", "total investment", "total proposal"];

/// Scans text runs for total-by-category marker labels.
pub fn scan_placeholders(tree: &DomTree, from: NodeId) -> Vec<PlaceholderMatch> {
    let mut out = Vec::new();
    for id in tree.walk(from) {
        let Some(text) = tree.text(id) else {
            continue;
        };
        let lower = text.to_ascii_lowercase();
        let kind = if FINAL_TOTAL_LABELS.iter().any(|label| lower.contains(label)) {
            Some(TotalKind::Final)
        } else if lower.contains("roofing total") {
            Some(TotalKind::Roofing)
        } else if lower.contains("siding total") {
            Some(TotalKind::Siding)
        } else if lower.contains("decking total") {
            Some(TotalKind::Decking)
        } else {
            None
        };
        if let Some(kind) = kind {
            out.push(PlaceholderMatch { node: id, kind });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::MoneySpan;
    use super::TotalKind;
    use super::scan_money;
    use super::scan_placeholders;
    use pv_core::Money;
    use pv_markup::parse_document;

    #[test]
    fn detects_inline_amounts_with_grouping() {
        let tree = parse_document("<td>Asphalt roof installed $3,600.00 complete</td>");
        let matches = scan_money(&tree, tree.root());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].amount, Money::from_cents(360_000));
        assert!(matches!(matches[0].span, MoneySpan::Inline { .. }));
    }

    #[test]
    fn rejects_amount_followed_by_letter() {
        let tree = parse_document("<td>use $12x14 lumber</td>");
        assert!(scan_money(&tree, tree.root()).is_empty());
    }

    #[test]
    fn ignores_bare_numbers_without_symbol() {
        let tree = parse_document("<td>5/8 plywood, 16 on center</td>");
        assert!(scan_money(&tree, tree.root()).is_empty());
    }

    #[test]
    fn detects_amount_split_across_formatting_runs() {
        let tree =
            parse_document("<td><span>Total: $</span><span><b>3,600.00</b></span></td>");
        let matches = scan_money(&tree, tree.root());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].amount, Money::from_cents(360_000));
        match matches[0].span {
            MoneySpan::Split {
                parent,
                start_child,
                end_child,
                end_offset,
            } => {
                assert_eq!(tree.tag(parent), Some("td"));
                assert_eq!(start_child, 0);
                assert_eq!(end_child, 2);
                assert_eq!(end_offset, None);
            }
            MoneySpan::Inline { .. } => unreachable!(),
        }
    }

    #[test]
    fn split_match_ends_before_trailing_prose() {
        let tree = parse_document("<td><span>Total due: $</span>3,600.00 installed</td>");
        let matches = scan_money(&tree, tree.root());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].amount, Money::from_cents(360_000));
        match matches[0].span {
            MoneySpan::Split { end_offset, .. } => {
                assert_eq!(end_offset, Some("3,600.00".len()));
            }
            MoneySpan::Inline { .. } => unreachable!(),
        }
    }

    #[test]
    fn split_scan_stops_at_block_boundaries() {
        let tree = parse_document("<tr><td>deposit $</td><td>3,600.00</td></tr>");
        assert!(scan_money(&tree, tree.root()).is_empty());
    }

    #[test]
    fn split_scan_rejects_letter_after_digits() {
        let tree = parse_document("<td><span>$</span><span>16d nails</span></td>");
        assert!(scan_money(&tree, tree.root()).is_empty());
    }

    #[test]
    fn zero_amounts_are_not_matches() {
        let tree = parse_document("<td>$0.00 due today</td>");
        assert!(scan_money(&tree, tree.root()).is_empty());
    }

    #[test]
    fn finds_total_labels_by_category() {
        let tree = parse_document(
            "<p>Roofing Total</p><p>Grand Total</p><p>nothing here</p>",
        );
        let placeholders = scan_placeholders(&tree, tree.root());
        let kinds: Vec<TotalKind> = placeholders.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![TotalKind::Roofing, TotalKind::Final]);
    }
}
