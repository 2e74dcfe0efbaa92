//! `vdl formats` – list format labels.

use vdl_core::format::{FormatSelection, FORMAT_LABELS, SHORT_FORMAT_LABELS};

pub fn run_formats() {
    let default_label = FormatSelection::default().to_string();
    for label in FORMAT_LABELS.iter().chain(SHORT_FORMAT_LABELS) {
        let resolved = FormatSelection::parse(label).to_string();
        if resolved == *label {
            let marker = if resolved == default_label { "  (default)" } else { "" };
            println!("{}{}", label, marker);
        } else {
            println!("{:<12} same as {}", label, resolved);
        }
    }
}
