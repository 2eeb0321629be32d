use eframe::egui;
use pv_annotate::AcceptanceSink;
use pv_annotate::ProposalView;
use pv_annotate::signature::SignatureStyle;
use pv_core::Money;
use pv_core::ProposalError;
use pv_core::ProposalResult;
use pv_core::SelectionSnapshot;
use pv_core::SignedResult;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;
use tracing::error;
use tracing::info;

const REPAINT_INTERVAL: Duration = Duration::from_millis(250);
const SIGNED_RESULT_FILE: &str = "signed.json";
const ARCHIVE_FILE: &str = "annotated.html";

struct ViewerArgs {
    template: PathBuf,
    snapshot: Option<PathBuf>,
    out_dir: PathBuf,
}

fn main() -> Result<(), eframe::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("proposal-viewer: {message}");
            eprintln!("usage: proposal-viewer --template <file> [--snapshot <file>] [--out <dir>]");
            return Ok(());
        }
    };

    let template = match std::fs::read_to_string(&args.template) {
        Ok(template) => template,
        Err(io_error) => {
            eprintln!(
                "proposal-viewer: cannot read template {}: {io_error}",
                args.template.display()
            );
            return Ok(());
        }
    };
    let snapshot = match load_snapshot(args.snapshot.as_deref()) {
        Ok(snapshot) => snapshot,
        Err(proposal_error) => {
            eprintln!("proposal-viewer: {proposal_error}");
            return Ok(());
        }
    };

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Proposal Viewer")
            .with_inner_size([1080.0, 780.0])
            .with_min_inner_size([720.0, 520.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Proposal Viewer",
        native_options,
        Box::new(move |_cc| Ok(Box::new(ViewerApp::new(&template, snapshot, args.out_dir)))),
    )
}

fn parse_args() -> Result<ViewerArgs, String> {
    let mut template = None;
    let mut snapshot = None;
    let mut out_dir = PathBuf::from(".");

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--template" => {
                let value = args.next().ok_or("missing path after --template")?;
                template = Some(PathBuf::from(value));
            }
            "--snapshot" => {
                let value = args.next().ok_or("missing path after --snapshot")?;
                snapshot = Some(PathBuf::from(value));
            }
            "--out" => {
                let value = args.next().ok_or("missing path after --out")?;
                out_dir = PathBuf::from(value);
            }
            other => return Err(format!("unrecognized argument `{other}`")),
        }
    }

    let template = template.ok_or("--template is required")?;
    Ok(ViewerArgs {
        template,
        snapshot,
        out_dir,
    })
}

/// Without a snapshot file every flag stays unknown, which gates nothing
/// out; the customer sees the whole proposal.
fn load_snapshot(path: Option<&Path>) -> ProposalResult<SelectionSnapshot> {
    let Some(path) = path else {
        return Ok(SelectionSnapshot::default());
    };
    let raw = std::fs::read_to_string(path).map_err(|io_error| {
        ProposalError::new(
            "viewer.snapshot.read",
            format!("cannot read snapshot {}: {io_error}", path.display()),
        )
    })?;
    serde_json::from_str(&raw).map_err(|json_error| {
        ProposalError::new(
            "viewer.snapshot.parse",
            format!("snapshot {} is not valid: {json_error}", path.display()),
        )
    })
}

/// Writes the acceptance payload and the annotated document into the
/// output directory.
struct FileSink {
    out_dir: PathBuf,
}

impl AcceptanceSink for FileSink {
    fn submit_signed(&mut self, signed: &SignedResult) -> ProposalResult<()> {
        let payload = serde_json::to_vec_pretty(signed).map_err(|json_error| {
            ProposalError::new(
                "viewer.accept.encode",
                format!("cannot encode signed result: {json_error}"),
            )
        })?;
        let path = self.out_dir.join(SIGNED_RESULT_FILE);
        std::fs::write(&path, payload).map_err(|io_error| {
            ProposalError::new(
                "viewer.accept.write",
                format!("cannot write {}: {io_error}", path.display()),
            )
        })?;
        info!(path = %path.display(), "signed result written");
        Ok(())
    }

    fn archive_html(&mut self, html: &str) -> ProposalResult<()> {
        let path = self.out_dir.join(ARCHIVE_FILE);
        std::fs::write(&path, html).map_err(|io_error| {
            ProposalError::new(
                "viewer.archive.write",
                format!("cannot write {}: {io_error}", path.display()),
            )
        })?;
        info!(path = %path.display(), "annotated document archived");
        Ok(())
    }
}

struct ControlRow {
    id: usize,
    label: String,
    checked: bool,
    quantity: Option<u32>,
}

struct ViewerApp {
    view: ProposalView,
    started: Instant,
    out_dir: PathBuf,
    signer_name: String,
    signer_email: String,
    style: SignatureStyle,
    signature_texture: Option<egui::TextureHandle>,
    status_line: String,
    last_error: Option<String>,
    accepted: bool,
}

impl ViewerApp {
    fn new(template: &str, snapshot: SelectionSnapshot, out_dir: PathBuf) -> Self {
        Self {
            view: ProposalView::new(template, snapshot),
            started: Instant::now(),
            out_dir,
            signer_name: String::new(),
            signer_email: String::new(),
            style: SignatureStyle::Flourish,
            signature_texture: None,
            status_line: "Ready".to_owned(),
            last_error: None,
            accepted: false,
        }
    }

    fn control_rows(&self) -> Vec<ControlRow> {
        self.view
            .controls()
            .iter()
            .map(|control| {
                let section = control
                    .section
                    .map(|key| key.as_str().to_owned())
                    .unwrap_or_else(|| "unclassified".to_owned());
                ControlRow {
                    id: control.id,
                    label: format!("{section}  {}", control.amount),
                    checked: control.checked,
                    quantity: control.unit_rate.map(|_| control.quantity),
                }
            })
            .collect()
    }

    fn sign(&mut self, ctx: &egui::Context) {
        match self.view.apply_signature(&self.signer_name, self.style) {
            Ok(applied) => {
                let image = applied.image.clone();
                self.status_line = format!("Signed as {}", applied.signer_name);
                self.last_error = None;
                self.signature_texture = decode_signature(ctx, &image.png);
            }
            Err(proposal_error) => {
                self.last_error = Some(proposal_error.to_string());
            }
        }
    }

    fn accept(&mut self) {
        let email = if self.signer_email.trim().is_empty() {
            None
        } else {
            Some(self.signer_email.trim().to_owned())
        };
        let mut sink = FileSink {
            out_dir: self.out_dir.clone(),
        };
        match self.view.accept(email, &mut sink) {
            Ok(signed) => {
                self.accepted = true;
                self.status_line = format!(
                    "Accepted: {} across {} lines",
                    signed.final_total,
                    signed.checked_lines.len()
                );
                self.last_error = None;
            }
            Err(proposal_error) => {
                error!(%proposal_error, "acceptance failed");
                self.last_error = Some(proposal_error.to_string());
            }
        }
    }
}

fn decode_signature(ctx: &egui::Context, png: &[u8]) -> Option<egui::TextureHandle> {
    let decoded = image::load_from_memory(png).ok()?;
    let rgba = decoded.to_rgba8();
    let size = [rgba.width() as usize, rgba.height() as usize];
    let color_image = egui::ColorImage::from_rgba_unmultiplied(size, rgba.as_raw());
    Some(ctx.load_texture("signature", color_image, egui::TextureOptions::LINEAR))
}

impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.accepted {
            let elapsed_ms = self.started.elapsed().as_millis() as u64;
            self.view.tick(elapsed_ms);
        }

        egui::TopBottomPanel::top("signing_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label("Name:");
                ui.text_edit_singleline(&mut self.signer_name);
                ui.label("Email:");
                ui.text_edit_singleline(&mut self.signer_email);
                egui::ComboBox::from_label("Style")
                    .selected_text(self.style.display_name())
                    .show_ui(ui, |ui| {
                        for style in SignatureStyle::ALL {
                            ui.selectable_value(&mut self.style, style, style.display_name());
                        }
                    });
                if ui.button("Sign").clicked() {
                    self.sign(ctx);
                }
                let can_accept = self.view.signature().is_some() && !self.accepted;
                if ui
                    .add_enabled(can_accept, egui::Button::new("Accept Proposal"))
                    .clicked()
                {
                    self.accept();
                }
            });
            if let Some(texture) = &self.signature_texture {
                ui.image(texture);
            }
        });

        egui::TopBottomPanel::bottom("totals_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(format!("Total: {}", self.view.total().grand));
                ui.separator();
                ui.label(&self.status_line);
                if let Some(message) = &self.last_error {
                    ui.separator();
                    ui.colored_label(egui::Color32::LIGHT_RED, message);
                }
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                ui.heading("Proposal line items");
                if self.view.controls().is_empty() {
                    ui.label("No priced lines detected yet.");
                }
                for row in self.control_rows() {
                    ui.horizontal(|ui| {
                        let mut checked = row.checked;
                        if ui.checkbox(&mut checked, &row.label).changed() {
                            let total = self.view.set_checked(row.id, checked).grand;
                            self.status_line = format!("Total: {total}");
                        }
                        if let Some(quantity) = row.quantity {
                            let mut quantity = quantity;
                            let drag = egui::DragValue::new(&mut quantity).range(1..=500);
                            if ui.add(drag).changed() {
                                self.view.set_quantity(row.id, quantity);
                            }
                        }
                    });
                }

                ui.separator();
                ui.heading("Per-section totals");
                let totals: Vec<(String, Money)> = self
                    .view
                    .total()
                    .per_section
                    .iter()
                    .map(|(key, amount)| (key.clone(), *amount))
                    .collect();
                if totals.is_empty() {
                    ui.label("Nothing selected.");
                }
                for (key, amount) in totals {
                    ui.label(format!("{key}: {amount}"));
                }
            });
        });

        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}

impl Drop for ViewerApp {
    fn drop(&mut self) {
        self.view.close();
    }
}
