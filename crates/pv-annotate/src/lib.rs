//! Proposal annotation engine: turns a rendered purchase proposal into an
//! interactive document with per-line price controls and live totals.
//!
//! The pipeline is classify -> gate -> inject -> recompute, and every stage
//! is idempotent so the reconciliation schedule can re-run it freely after
//! late template renders.

pub mod classify;
pub mod gating;
pub mod inject;
pub mod recalc;
pub mod reconcile;
pub mod signature;
pub mod tokens;

use crate::classify::Classification;
use crate::gating::apply as apply_gating;
use crate::inject::ControlId;
use crate::inject::ControlRegistry;
use crate::inject::PriceControl;
use crate::inject::TotalDisplay;
use crate::recalc::RunningTotal;
use crate::recalc::recompute;
use crate::reconcile::ReconcileSchedule;
use crate::signature::SignatureImage;
use crate::signature::SignaturePlacement;
use crate::signature::SignatureStyle;
use chrono::Local;
use chrono::NaiveDate;
use pv_core::CheckedLine;
use pv_core::ProposalError;
use pv_core::ProposalResult;
use pv_core::SelectionSnapshot;
use pv_core::SignedResult;
use pv_dom::DomTree;
use pv_markup::parse_document;
use pv_markup::serialize_document;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Destination for a completed acceptance: the pricing backend plus an
/// archival copy of the annotated document.
pub trait AcceptanceSink {
    fn submit_signed(&mut self, signed: &SignedResult) -> ProposalResult<()>;
    fn archive_html(&mut self, html: &str) -> ProposalResult<()>;
}

/// A signature the customer has applied but not yet submitted.
#[derive(Debug, Clone)]
pub struct AppliedSignature {
    pub signer_name: String,
    pub style: SignatureStyle,
    pub image: SignatureImage,
    pub placement: SignaturePlacement,
}

/// One interactive proposal document and all of its annotation state.
pub struct ProposalView {
    tree: DomTree,
    snapshot: SelectionSnapshot,
    classification: Classification,
    registry: ControlRegistry,
    schedule: ReconcileSchedule,
    total: RunningTotal,
    signature: Option<AppliedSignature>,
}

impl ProposalView {
    /// Parses the proposal template and runs the first annotation pass.
    pub fn new(template: &str, snapshot: SelectionSnapshot) -> Self {
        let tree = parse_document(template);
        let mut view = Self {
            tree,
            snapshot,
            classification: Classification::default(),
            registry: ControlRegistry::default(),
            schedule: ReconcileSchedule::new(),
            total: RunningTotal::default(),
            signature: None,
        };
        view.run_pass();
        view
    }

    /// One full annotation pass. Safe to repeat: classification keeps
    /// attached roots, injection skips already-wrapped amounts, and
    /// recomputation derives totals from scratch.
    pub fn run_pass(&mut self) {
        classify::classify(&mut self.tree, &mut self.classification);
        apply_gating(&mut self.tree, &mut self.classification, &self.snapshot);
        inject::inject(
            &mut self.tree,
            &self.classification,
            &mut self.registry,
            &self.snapshot,
        );
        self.total = recompute(&mut self.tree, &mut self.registry);
        // The pass's own writes must not look like host mutations to the
        // next tick.
        let _ = self.tree.take_changes();
    }

    /// Clock-driven reconciliation. Runs at most one pass per call,
    /// covering pending host mutations, scheduled startup passes, and the
    /// capped periodic re-check for templates that render late.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        if self.schedule.is_cancelled() {
            return false;
        }
        let due = self.schedule.due(now_ms);
        let mutated = self.tree.has_pending_changes();
        let periodic = due.periodic && self.registry.is_empty();
        if !(mutated || due.startup || periodic) {
            return false;
        }
        if mutated {
            debug!("host mutation observed; reconciling");
        }
        self.run_pass();
        true
    }

    /// Stops all scheduled reconciliation; used on view teardown.
    pub fn close(&mut self) {
        self.schedule.cancel();
    }

    pub fn tree(&self) -> &DomTree {
        &self.tree
    }

    /// Host-side mutation access; changes made here are picked up by the
    /// next `tick`.
    pub fn tree_mut(&mut self) -> &mut DomTree {
        &mut self.tree
    }

    pub fn snapshot(&self) -> &SelectionSnapshot {
        &self.snapshot
    }

    pub fn sections(&self) -> &[classify::Section] {
        &self.classification.sections
    }

    pub fn controls(&self) -> &[PriceControl] {
        self.registry.controls()
    }

    pub fn displays(&self) -> &[TotalDisplay] {
        self.registry.displays()
    }

    pub fn total(&self) -> &RunningTotal {
        &self.total
    }

    pub fn signature(&self) -> Option<&AppliedSignature> {
        self.signature.as_ref()
    }

    /// Toggles one control and refreshes totals and gating in the same
    /// step, so exclusivity groups and dividers stay consistent.
    pub fn set_checked(&mut self, id: ControlId, checked: bool) -> &RunningTotal {
        if self.registry.set_checked(id, checked) {
            apply_gating(&mut self.tree, &mut self.classification, &self.snapshot);
            self.total = recompute(&mut self.tree, &mut self.registry);
            let _ = self.tree.take_changes();
        }
        &self.total
    }

    /// Adjusts the quantity of a rate-priced line and refreshes totals.
    pub fn set_quantity(&mut self, id: ControlId, quantity: u32) -> &RunningTotal {
        if self.registry.set_quantity(id, quantity) {
            self.total = recompute(&mut self.tree, &mut self.registry);
            let _ = self.tree.take_changes();
        }
        &self.total
    }

    /// Renders and places the customer's signature, and stamps today's
    /// acceptance date next to the date label.
    pub fn apply_signature(
        &mut self,
        name: &str,
        style: SignatureStyle,
    ) -> ProposalResult<&AppliedSignature> {
        self.apply_signature_on(name, style, Local::now().date_naive())
    }

    pub fn apply_signature_on(
        &mut self,
        name: &str,
        style: SignatureStyle,
        date: NaiveDate,
    ) -> ProposalResult<&AppliedSignature> {
        let image = signature::render_signature(name, style)?;
        let placement = signature::attach_overlay(&mut self.tree, style);
        if signature::stamp_acceptance_date(&mut self.tree, date).is_none() {
            warn!("no acceptance-date label in template; date stamp skipped");
        }
        let _ = self.tree.take_changes();
        self.signature = Some(AppliedSignature {
            signer_name: name.trim().to_owned(),
            style,
            image,
            placement,
        });
        info!(signer = name.trim(), "signature applied");
        Ok(self.signature.as_ref().unwrap_or_else(|| unreachable!()))
    }

    /// Builds the acceptance payload from the current checked state.
    /// Requires an applied signature.
    pub fn signed_result(&self, signer_email: Option<String>) -> ProposalResult<SignedResult> {
        let Some(signature) = &self.signature else {
            return Err(ProposalError::new(
                "annotate.accept.unsigned",
                "cannot accept a proposal without an applied signature",
            ));
        };
        let checked_lines = self
            .registry
            .controls()
            .iter()
            .filter(|control| control.checked)
            .map(|control| CheckedLine {
                section: control.section.map(|key| key.as_str().to_owned()),
                amount: control.amount,
            })
            .collect();
        Ok(SignedResult {
            signer_name: signature.signer_name.clone(),
            signer_email,
            signature_png: signature.image.png.clone(),
            checked_lines,
            final_total: self.total.grand,
            accepted_snapshot: self.snapshot.clone(),
        })
    }

    /// Serialized annotated document, used for the archival copy.
    pub fn archival_html(&self) -> String {
        serialize_document(&self.tree)
    }

    /// Submits the signed result and archives the annotated document.
    /// Submission failures propagate; a failed archive is logged and
    /// swallowed so it can never block a completed sale.
    pub fn accept(
        &mut self,
        signer_email: Option<String>,
        sink: &mut dyn AcceptanceSink,
    ) -> ProposalResult<SignedResult> {
        let signed = self.signed_result(signer_email)?;
        sink.submit_signed(&signed)?;
        if let Err(error) = sink.archive_html(&self.archival_html()) {
            warn!(%error, "archival copy failed after successful acceptance");
        }
        self.close();
        info!(
            total = %signed.final_total,
            lines = signed.checked_lines.len(),
            "proposal accepted"
        );
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::AcceptanceSink;
    use super::ProposalView;
    use crate::reconcile::PERIODIC_INTERVAL_MS;
    use crate::signature::SignatureStyle;
    use chrono::NaiveDate;
    use pv_core::Money;
    use pv_core::ProposalError;
    use pv_core::ProposalResult;
    use pv_core::SelectionSnapshot;
    use pv_core::SignedResult;
    use pv_core::TriState;

    const TEMPLATE: &str = "<body>\
        <table><tr><td>Asphalt Architectural Shingle Roof $8,200.00</td></tr></table>\
        <hr>\
        <table><tr><td>Vinyl Siding $4,100.00</td></tr></table>\
        <p>Grand Total:</p>\
        <table><tr><td>Terms and Conditions. Accepted by: Date of Acceptance:</td></tr></table>\
        </body>";

    #[derive(Default)]
    struct RecordingSink {
        submitted: Vec<SignedResult>,
        archived: Vec<String>,
        fail_submit: bool,
        fail_archive: bool,
    }

    impl AcceptanceSink for RecordingSink {
        fn submit_signed(&mut self, signed: &SignedResult) -> ProposalResult<()> {
            if self.fail_submit {
                return Err(ProposalError::new("test.submit", "backend rejected"));
            }
            self.submitted.push(signed.clone());
            Ok(())
        }

        fn archive_html(&mut self, html: &str) -> ProposalResult<()> {
            if self.fail_archive {
                return Err(ProposalError::new("test.archive", "storage offline"));
            }
            self.archived.push(html.to_owned());
            Ok(())
        }
    }

    #[test]
    fn full_pipeline_is_idempotent() {
        let mut view = ProposalView::new(TEMPLATE, SelectionSnapshot::default());
        let controls = view.controls().len();
        let checked: Vec<bool> = view.controls().iter().map(|control| control.checked).collect();
        let total = view.total().clone();

        view.run_pass();
        view.run_pass();
        assert_eq!(view.controls().len(), controls);
        let checked_after: Vec<bool> =
            view.controls().iter().map(|control| control.checked).collect();
        assert_eq!(checked, checked_after);
        assert_eq!(view.total(), &total);
    }

    #[test]
    fn deselected_roofing_work_hides_the_roofing_section() {
        let mut snapshot = SelectionSnapshot::default();
        snapshot.work_selected.roofing = TriState::NotSelected;
        let view = ProposalView::new(TEMPLATE, snapshot);

        let roofing = view
            .sections()
            .iter()
            .find(|section| section.key.as_str().starts_with("roofing"));
        let root = roofing.map(|section| section.root).unwrap_or_default();
        assert_eq!(view.tree().attr(root, "hidden"), Some(""));

        // The siding amount is still interactive.
        let visible_controls = view
            .controls()
            .iter()
            .filter(|control| {
                control
                    .section
                    .is_some_and(|key| key.as_str().starts_with("siding"))
            })
            .count();
        assert_eq!(visible_controls, 1);
    }

    #[test]
    fn checking_lines_drives_the_grand_total() {
        let mut view = ProposalView::new(TEMPLATE, SelectionSnapshot::default());
        let ids: Vec<usize> = view.controls().iter().map(|control| control.id).collect();
        assert_eq!(ids.len(), 2);
        for id in &ids {
            view.set_checked(*id, true);
        }
        assert_eq!(view.total().grand, Money::from_cents(1_230_000));

        let display = view.displays()[0].node;
        assert_eq!(view.tree().text_content(display), "$12,300.00");

        view.set_checked(ids[1], false);
        assert_eq!(view.total().grand, Money::from_cents(820_000));
    }

    #[test]
    fn periodic_reconcile_recovers_from_a_late_render() {
        let mut view = ProposalView::new("<body></body>", SelectionSnapshot::default());
        assert!(view.controls().is_empty());

        // Template content arrives after creation, as late renders do.
        let body = view.tree().root();
        let tree = view.tree_mut();
        let table = tree.create_element("table");
        let row = tree.create_element("tr");
        let cell = tree.create_element("td");
        let text = tree.create_text("Copper gutter run $1,850.00");
        tree.append_child(body, table);
        tree.append_child(table, row);
        tree.append_child(row, cell);
        tree.append_child(cell, text);

        assert!(view.tick(PERIODIC_INTERVAL_MS * 2));
        assert_eq!(view.controls().len(), 1);

        // Quiet document with controls in place; the periodic check only
        // fires while the registry is empty.
        assert!(!view.tick(PERIODIC_INTERVAL_MS * 2 + 500));
        assert!(!view.tick(PERIODIC_INTERVAL_MS * 4));
    }

    #[test]
    fn closed_views_stop_reconciling() {
        let mut view = ProposalView::new(TEMPLATE, SelectionSnapshot::default());
        view.close();
        assert!(!view.tick(10_000));
    }

    #[test]
    fn accept_requires_a_signature() {
        let view = ProposalView::new(TEMPLATE, SelectionSnapshot::default());
        let result = view.signed_result(None);
        assert_eq!(
            result.err().map(|error| error.code),
            Some("annotate.accept.unsigned")
        );
    }

    #[test]
    fn accept_submits_lines_and_archives_the_document() {
        let mut view = ProposalView::new(TEMPLATE, SelectionSnapshot::default());
        let ids: Vec<usize> = view.controls().iter().map(|control| control.id).collect();
        for id in ids {
            view.set_checked(id, true);
        }
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap_or_default();
        let applied = view.apply_signature_on("Dana Whitfield", SignatureStyle::Flourish, date);
        assert!(applied.is_ok());

        let mut sink = RecordingSink::default();
        let signed = match view.accept(Some("dana@example.com".to_owned()), &mut sink) {
            Ok(signed) => signed,
            Err(error) => panic!("accept failed: {error}"),
        };
        assert_eq!(signed.signer_name, "Dana Whitfield");
        assert_eq!(signed.checked_lines.len(), 2);
        assert_eq!(signed.final_total, Money::from_cents(1_230_000));
        assert_eq!(sink.submitted.len(), 1);
        assert_eq!(sink.archived.len(), 1);
        assert!(sink.archived[0].contains("data-acceptance-date"));
        assert!(sink.archived[0].contains("08/27/2026"));
    }

    #[test]
    fn archive_failure_does_not_fail_acceptance() {
        let mut view = ProposalView::new(TEMPLATE, SelectionSnapshot::default());
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap_or_default();
        let _ = view.apply_signature_on("Dana Whitfield", SignatureStyle::Casual, date);

        let mut sink = RecordingSink {
            fail_archive: true,
            ..RecordingSink::default()
        };
        assert!(view.accept(None, &mut sink).is_ok());
        assert_eq!(sink.submitted.len(), 1);
        assert!(sink.archived.is_empty());
    }

    #[test]
    fn submit_failure_propagates() {
        let mut view = ProposalView::new(TEMPLATE, SelectionSnapshot::default());
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap_or_default();
        let _ = view.apply_signature_on("Dana Whitfield", SignatureStyle::Formal, date);

        let mut sink = RecordingSink {
            fail_submit: true,
            ..RecordingSink::default()
        };
        let result = view.accept(None, &mut sink);
        assert_eq!(result.err().map(|error| error.code), Some("test.submit"));
        assert!(sink.archived.is_empty());
    }
}
