use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use tracing::warn;

use crate::commands::CommandReport;
use crate::patcher::config::{load_config, unknown_env_keys};
use crate::patcher::{PatchOptions, patch_container};

#[derive(Debug, Clone)]
pub struct PatchCommandOptions {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub config_path: Option<PathBuf>,
    pub dry_run: bool,
    pub no_verify: bool,
}

pub fn run(opts: &PatchCommandOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("patch");

    for key in unknown_env_keys() {
        warn!(key = %key, "ignoring unknown FRAME_PATCH_ variable");
    }

    let loaded = load_config(opts.config_path.as_deref())?;
    let cfg = loaded.config;
    if let Some(path) = &loaded.source {
        report.detail(format!("config={}", path.display()));
    }
    let plan = cfg.to_plan(Utc::now()).context("invalid patch configuration")?;

    let patch_opts = PatchOptions {
        markup_entry: cfg.archive.markup_entry.clone(),
        scratch_root: cfg.archive.scratch_dir.clone(),
        verify: cfg.archive.verify && !opts.no_verify,
        dry_run: opts.dry_run,
    };

    report.detail(format!("relabel_rules={}", plan.relabel.rules().len()));
    if opts.dry_run {
        report.detail("patch.dry_run=true");
    }

    let outcome = patch_container(&opts.source, &opts.destination, &plan, &patch_opts)
        .with_context(|| {
            format!(
                "failed to patch {} into {}",
                opts.source.display(),
                opts.destination.display()
            )
        })?;

    report.detail(format!("source={}", outcome.source.display()));
    if let Some(written) = &outcome.destination {
        report.detail(format!("destination={}", written.display()));
    }
    let edits = &outcome.edits;
    report.detail(format!("entries={}", outcome.entries));
    report.detail(format!("properties_set={}", edits.properties_set.join(",")));
    report.detail(format!("metadata_entries={}", edits.metadata_entries));
    report.detail(format!("labels_rewritten={}", edits.relabeled.len()));
    for change in &edits.relabeled {
        report.detail(format!(
            "label {}: `{}` -> `{}`",
            change.owner.as_deref().unwrap_or("-"),
            change.before,
            change.after
        ));
    }
    for group in &edits.groups {
        report.detail(format!(
            "group {} id={} children={}",
            group.name,
            group.id,
            group.children.len()
        ));
    }
    if !edits.unclassified.is_empty() {
        report.detail(format!("unclassified={}", edits.unclassified.join(",")));
    }
    match outcome.verified_entries {
        Some(count) => report.detail(format!("verified_entries={count}")),
        None if !opts.dry_run => report.detail("verify=skipped"),
        None => {}
    }

    Ok(report)
}
