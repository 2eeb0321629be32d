//! Signature overlay: renders the signer's name as a cursive PNG and
//! anchors it over the acceptance line, plus the acceptance-date stamp.

use chrono::NaiveDate;
use pv_core::ProposalError;
use pv_core::ProposalResult;
use pv_dom::DomTree;
use pv_dom::NodeId;
use resvg::tiny_skia;
use resvg::usvg;
use tracing::warn;

/// Rendered overlay height in pixels.
pub const SIGNATURE_HEIGHT: u32 = 56;
/// Width reserved per glyph when sizing the raster.
const CHAR_WIDTH: f32 = 22.0;
/// Approximate advance of one proposal-body character, used to offset the
/// overlay past the "Accepted by" label text.
const LABEL_CHAR_WIDTH: f32 = 7.0;

const ACCEPT_LABEL: &str = "accepted by";
const DATE_LABEL: &str = "date of acceptance";

/// Cursive styles offered to the signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStyle {
    Flourish,
    Casual,
    Formal,
}

impl SignatureStyle {
    pub const ALL: [SignatureStyle; 3] = [
        SignatureStyle::Flourish,
        SignatureStyle::Casual,
        SignatureStyle::Formal,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            SignatureStyle::Flourish => "Flourish",
            SignatureStyle::Casual => "Casual",
            SignatureStyle::Formal => "Formal",
        }
    }

    fn font_families(self) -> &'static str {
        match self {
            SignatureStyle::Flourish => "'Great Vibes', 'Brush Script MT', cursive",
            SignatureStyle::Casual => "'Comic Sans MS', 'Segoe Script', cursive",
            SignatureStyle::Formal => "'Snell Roundhand', 'Apple Chancery', cursive",
        }
    }
}

/// PNG raster of a rendered signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Rasterizes the signer's name in the chosen style.
///
/// The name is typeset as SVG text and rendered with whatever cursive face
/// the system resolves; missing fonts degrade to a generic cursive rather
/// than failing the signing flow.
pub fn render_signature(name: &str, style: SignatureStyle) -> ProposalResult<SignatureImage> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ProposalError::new(
            "annotate.sign.empty_name",
            "cannot render a signature for an empty name",
        ));
    }

    let width = ((name.chars().count() as f32 * CHAR_WIDTH) as u32).clamp(80, 640);
    let font_size = SIGNATURE_HEIGHT as f32 * 0.6;
    let baseline = SIGNATURE_HEIGHT as f32 * 0.72;
    let svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{SIGNATURE_HEIGHT}\">\
         <text x=\"4\" y=\"{baseline}\" font-family=\"{families}\" font-size=\"{font_size}\" \
         fill=\"#1a1a66\">{name}</text></svg>",
        families = style.font_families(),
        name = escape_xml(name),
    );

    let mut options = usvg::Options::default();
    options.fontdb_mut().load_system_fonts();
    let svg_tree = usvg::Tree::from_str(&svg, &options).map_err(|error| {
        ProposalError::new("annotate.sign.svg", format!("signature svg rejected: {error}"))
    })?;

    let mut pixmap = tiny_skia::Pixmap::new(width, SIGNATURE_HEIGHT).ok_or_else(|| {
        ProposalError::new("annotate.sign.raster", "signature pixmap allocation failed")
    })?;
    resvg::render(&svg_tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());

    let png = pixmap.encode_png().map_err(|error| {
        ProposalError::new("annotate.sign.png", format!("png encoding failed: {error}"))
    })?;

    Ok(SignatureImage {
        png,
        width,
        height: SIGNATURE_HEIGHT,
    })
}

/// Where the overlay landed in the document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignaturePlacement {
    /// Element the overlay marker was attached to.
    pub host: NodeId,
    /// Horizontal offset past the acceptance label, in pixels.
    pub offset_px: f32,
    /// True when no acceptance line was found and the overlay fell back to
    /// the end of the document.
    pub fallback: bool,
}

/// Attaches (or re-positions) the overlay marker next to the acceptance
/// line. The marker is an empty span the renderer replaces with the raster;
/// repeated calls reuse the existing marker.
pub fn attach_overlay(tree: &mut DomTree, style: SignatureStyle) -> SignaturePlacement {
    let placement = match locate_accept_label(tree) {
        Some((text_node, label_chars)) => {
            let host = tree.parent(text_node).unwrap_or_else(|| tree.root());
            SignaturePlacement {
                host,
                // Label width approximation; exact text metrics are not
                // available outside the renderer.
                offset_px: label_chars as f32 * LABEL_CHAR_WIDTH,
                fallback: false,
            }
        }
        None => {
            warn!("no acceptance line found; signature overlay anchored at document end");
            SignaturePlacement {
                host: tree.root(),
                offset_px: 0.0,
                fallback: true,
            }
        }
    };

    let marker = existing_marker(tree).unwrap_or_else(|| {
        let span = tree.create_element_with_attrs(
            "span",
            vec![("data-signature-overlay".to_owned(), String::new())],
        );
        span
    });
    tree.set_attr(marker, "data-signature-style", style.display_name());
    tree.set_attr(marker, "data-offset-px", &format!("{:.0}", placement.offset_px));
    if tree.parent(marker) != Some(placement.host) {
        tree.append_child(placement.host, marker);
    }

    placement
}

fn existing_marker(tree: &DomTree) -> Option<NodeId> {
    tree.walk(tree.root())
        .into_iter()
        .find(|id| tree.attr(*id, "data-signature-overlay").is_some())
}

/// First text node containing the acceptance label, with the character
/// count up to the end of the label (the overlay offset basis).
fn locate_accept_label(tree: &DomTree) -> Option<(NodeId, usize)> {
    for id in tree.walk(tree.root()) {
        let Some(text) = tree.text(id) else {
            continue;
        };
        let lower = text.to_lowercase();
        if let Some(byte_pos) = lower.find(ACCEPT_LABEL) {
            let end = byte_pos + ACCEPT_LABEL.len();
            let chars = text
                .char_indices()
                .take_while(|(index, _)| *index < end)
                .count();
            return Some((id, chars));
        }
    }
    None
}

/// Writes the acceptance date (`MM/DD/YYYY`) next to the date label.
/// Re-stamping replaces the previous value instead of appending.
pub fn stamp_acceptance_date(tree: &mut DomTree, date: NaiveDate) -> Option<NodeId> {
    let formatted = date.format("%m/%d/%Y").to_string();

    if let Some(stamp) = tree
        .walk(tree.root())
        .into_iter()
        .find(|id| tree.attr(*id, "data-acceptance-date").is_some())
    {
        tree.set_sole_text_child(stamp, &formatted);
        return Some(stamp);
    }

    let label = tree.walk(tree.root()).into_iter().find(|id| {
        tree.text(*id)
            .is_some_and(|text| text.to_lowercase().contains(DATE_LABEL))
    })?;
    let parent = tree.parent(label)?;
    let index = tree.index_in_parent(label)?;

    let stamp = tree.create_element_with_attrs(
        "span",
        vec![("data-acceptance-date".to_owned(), String::new())],
    );
    tree.insert_child(parent, index + 1, stamp);
    tree.set_sole_text_child(stamp, &formatted);
    Some(stamp)
}

fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}
