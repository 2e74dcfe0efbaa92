//! Gathers targets from positional arguments and `--input` files.

use anyhow::{bail, Context, Result};
use std::path::Path;
use vdl_core::url_model::{parse_targets, sanitize_target};

/// Positional targets first, then the file's lines; each sanitized.
pub fn collect_targets(args: &[String], input: Option<&Path>) -> Result<Vec<String>> {
    let mut targets: Vec<String> = args
        .iter()
        .map(|a| sanitize_target(a))
        .filter(|t| !t.is_empty())
        .collect();
    if let Some(path) = input {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read targets from {}", path.display()))?;
        targets.extend(parse_targets(&text));
    }
    if targets.is_empty() {
        bail!("no targets given (pass URLs or --input FILE)");
    }
    Ok(targets)
}
