use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::error::PatchError;
use crate::patcher::category::Category;
use crate::patcher::config::load_config;
use crate::patcher::objects::{GROUP_TYPE, dependency_names, object_records};
use crate::patcher::plan::categorize_objects;
use crate::patcher::properties::{metadata_entries, property_value};
use crate::patcher::relabel::object_labels;
use crate::patcher::{PatchOptions, with_document};

const WELL_KNOWN: [&str; 6] = [
    "CreatedBy",
    "LastModifiedBy",
    "Company",
    "Comment",
    "Label",
    "LastModifiedDate",
];

#[derive(Debug, Clone)]
pub struct InspectOptions {
    pub source: PathBuf,
    pub config_path: Option<PathBuf>,
}

pub fn run(opts: &InspectOptions) -> Result<CommandReport> {
    let cfg = load_config(opts.config_path.as_deref())?.config;
    let patch_opts = PatchOptions {
        markup_entry: cfg.archive.markup_entry.clone(),
        scratch_root: cfg.archive.scratch_dir.clone(),
        verify: false,
        dry_run: true,
    };

    let mut report = CommandReport::new("inspect");
    report.detail(format!("source={}", opts.source.display()));

    let lines = with_document(&opts.source, &patch_opts, |doc| {
        let mut lines = Vec::new();
        for name in WELL_KNOWN {
            match property_value(doc, name) {
                Some(value) => lines.push(format!("property {name}={value}")),
                None => lines.push(format!("property {name} absent")),
            }
        }
        for (key, value) in metadata_entries(doc) {
            lines.push(format!("meta {key}={value}"));
        }

        let records = object_records(doc)?;
        lines.push(format!("objects={}", records.len()));
        for (name, label) in object_labels(doc) {
            if label != name {
                lines.push(format!("label {name}={label}"));
            }
        }

        let categorized = categorize_objects(doc)?;
        for category in Category::GROUPED {
            let count = categorized.members.get(&category).map_or(0, Vec::len);
            lines.push(format!("category {category}={count}"));
        }
        if !categorized.unclassified.is_empty() {
            lines.push(format!(
                "unclassified={}",
                categorized.unclassified.join(",")
            ));
        }

        for group in records.iter().filter(|r| r.type_name == GROUP_TYPE) {
            let children = dependency_names(doc, &group.name).unwrap_or_default();
            lines.push(format!(
                "group {} id={} children={}",
                group.name,
                group.id,
                children.join(",")
            ));
        }
        Ok::<_, PatchError>(lines)
    })
    .with_context(|| format!("failed to inspect {}", opts.source.display()))?;

    for line in lines {
        report.detail(line);
    }
    Ok(report)
}
