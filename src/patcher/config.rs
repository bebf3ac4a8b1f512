use crate::patcher::category::Category;
use crate::patcher::objects::GroupSpec;
use crate::patcher::plan::{
    DEFAULT_AUTHOR, DEFAULT_COMMENT, DEFAULT_COMPANY, DEFAULT_DOCUMENT_LABEL, PatchPlan,
    default_group, default_master_group, default_metadata, default_relabel_list, validate_groups,
};
use crate::patcher::relabel::{RelabelAction, RelabelRule, RelabelRules};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

include!(concat!(env!("OUT_DIR"), "/frame_patch_env_allowlist.rs"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    pub author: String,
    pub company: String,
    pub comment: String,
    pub label: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            author: DEFAULT_AUTHOR.to_string(),
            company: DEFAULT_COMPANY.to_string(),
            comment: DEFAULT_COMMENT.to_string(),
            label: DEFAULT_DOCUMENT_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetaEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelabelEntry {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupEntry {
    pub category: Category,
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MasterGroupEntry {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub markup_entry: String,
    pub scratch_dir: Option<PathBuf>,
    pub verify: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            markup_entry: "Document.xml".to_string(),
            scratch_dir: None,
            verify: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    pub document: DocumentConfig,
    pub meta: Vec<MetaEntry>,
    pub relabel: Vec<RelabelEntry>,
    pub group: Vec<GroupEntry>,
    pub master_group: MasterGroupEntry,
    pub archive: ArchiveConfig,
}

impl Default for PatchConfig {
    fn default() -> Self {
        let meta = default_metadata()
            .into_iter()
            .map(|(key, value)| MetaEntry { key, value })
            .collect();
        let relabel = default_relabel_list()
            .into_iter()
            .map(|rule| match rule.action {
                RelabelAction::Replace(text) => RelabelEntry {
                    pattern: rule.pattern,
                    replace: Some(text),
                    label: None,
                },
                RelabelAction::Set(text) => RelabelEntry {
                    pattern: rule.pattern,
                    replace: None,
                    label: Some(text),
                },
            })
            .collect();
        let group = Category::GROUPED
            .into_iter()
            .filter_map(|category| {
                default_group(category).map(|spec| GroupEntry {
                    category,
                    name: spec.name,
                    label: spec.label,
                    description: spec.description,
                })
            })
            .collect();
        let master = default_master_group();
        Self {
            document: DocumentConfig::default(),
            meta,
            relabel,
            group,
            master_group: MasterGroupEntry {
                name: master.name,
                label: master.label,
                description: master.description,
            },
            archive: ArchiveConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDocumentConfig {
    author: Option<String>,
    company: Option<String>,
    comment: Option<String>,
    label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialPatchConfig {
    document: Option<PartialDocumentConfig>,
    meta: Option<Vec<MetaEntry>>,
    relabel: Option<Vec<RelabelEntry>>,
    group: Option<Vec<GroupEntry>>,
    master_group: Option<MasterGroupEntry>,
    archive: Option<ArchiveConfig>,
}

fn env_or_string(lookup: &dyn Fn(&str) -> Option<String>, var: &str, fallback: &str) -> String {
    match lookup(var) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_bool(lookup: &dyn Fn(&str) -> Option<String>, var: &str, fallback: bool) -> bool {
    match lookup(var) {
        Some(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        None => fallback,
    }
}

fn env_or_path(
    lookup: &dyn Fn(&str) -> Option<String>,
    var: &str,
    fallback: Option<PathBuf>,
) -> Option<PathBuf> {
    match lookup(var) {
        Some(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => fallback,
    }
}

fn validate(cfg: &PatchConfig) -> Result<()> {
    if cfg.document.author.trim().is_empty() {
        return Err(anyhow!("invalid document author: cannot be empty"));
    }
    if cfg.document.label.trim().is_empty() {
        return Err(anyhow!("invalid document label: cannot be empty"));
    }
    let markup_entry = cfg.archive.markup_entry.trim();
    if markup_entry.is_empty() {
        return Err(anyhow!("invalid markup entry name: cannot be empty"));
    }
    if markup_entry.contains(['/', '\\']) || markup_entry == "." || markup_entry == ".." {
        return Err(anyhow!(
            "invalid markup entry name `{markup_entry}`: must name a file at the container root"
        ));
    }
    let mut keys = BTreeSet::new();
    for entry in &cfg.meta {
        if entry.key.trim().is_empty() {
            return Err(anyhow!("invalid meta entry: key cannot be empty"));
        }
        if !keys.insert(entry.key.as_str()) {
            return Err(anyhow!("invalid meta entry: key `{}` repeated", entry.key));
        }
    }
    for entry in &cfg.relabel {
        if entry.replace.is_some() == entry.label.is_some() {
            return Err(anyhow!(
                "invalid relabel rule `{}`: set exactly one of `replace` or `label`",
                entry.pattern
            ));
        }
    }
    Ok(())
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("frame-patch").join("config.toml"))
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<(PathBuf, bool)> {
    if let Some(path) = explicit {
        return Some((path.to_path_buf(), true));
    }
    if let Ok(custom) = env::var("FRAME_PATCH_CONFIG") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some((PathBuf::from(trimmed), true));
        }
    }
    default_config_path().map(|p| (p, false))
}

fn merge_config_text(base: &mut PatchConfig, raw: &str, origin: &Path) -> Result<()> {
    let parsed: PartialPatchConfig = toml::from_str(raw)
        .map_err(|err| anyhow!("failed to parse patch config {}: {err}", origin.display()))?;
    if let Some(document) = parsed.document {
        if let Some(author) = document.author {
            base.document.author = author;
        }
        if let Some(company) = document.company {
            base.document.company = company;
        }
        if let Some(comment) = document.comment {
            base.document.comment = comment;
        }
        if let Some(label) = document.label {
            base.document.label = label;
        }
    }
    if let Some(meta) = parsed.meta {
        base.meta = meta;
    }
    if let Some(relabel) = parsed.relabel {
        base.relabel = relabel;
    }
    if let Some(group) = parsed.group {
        base.group = group;
    }
    if let Some(master_group) = parsed.master_group {
        base.master_group = master_group;
    }
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    Ok(())
}

fn merge_file_config(base: &mut PatchConfig, explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    let Some((path, required)) = resolve_config_path(explicit) else {
        return Ok(None);
    };
    if !path.exists() {
        if required {
            return Err(anyhow!("patch config {} does not exist", path.display()));
        }
        return Ok(None);
    }

    let raw = fs::read_to_string(&path)
        .map_err(|err| anyhow!("failed to read patch config {}: {err}", path.display()))?;
    merge_config_text(base, &raw, &path)?;
    Ok(Some(path))
}

fn apply_env_overrides(cfg: &mut PatchConfig, lookup: &dyn Fn(&str) -> Option<String>) {
    cfg.document.author = env_or_string(lookup, "FRAME_PATCH_AUTHOR", &cfg.document.author);
    cfg.document.company = env_or_string(lookup, "FRAME_PATCH_COMPANY", &cfg.document.company);
    cfg.document.comment = env_or_string(lookup, "FRAME_PATCH_COMMENT", &cfg.document.comment);
    cfg.document.label =
        env_or_string(lookup, "FRAME_PATCH_DOCUMENT_LABEL", &cfg.document.label);
    cfg.archive.scratch_dir = env_or_path(
        lookup,
        "FRAME_PATCH_SCRATCH_DIR",
        cfg.archive.scratch_dir.clone(),
    );
    cfg.archive.verify = env_or_bool(lookup, "FRAME_PATCH_VERIFY", cfg.archive.verify);
}

/// `FRAME_PATCH_*` variables set in the environment that nothing reads.
pub fn unknown_env_keys() -> Vec<String> {
    env::vars()
        .map(|(k, _)| k)
        .filter(|k| k.starts_with("FRAME_PATCH_"))
        .filter(|k| !GENERATED_FRAME_PATCH_ENV_ALLOWLIST.contains(&k.as_str()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: PatchConfig,
    pub source: Option<PathBuf>,
}

pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let mut cfg = PatchConfig::default();
    let source = merge_file_config(&mut cfg, explicit)?;
    apply_env_overrides(&mut cfg, &|var: &str| env::var(var).ok());
    validate(&cfg)?;
    Ok(LoadedConfig {
        config: cfg,
        source,
    })
}

impl PatchConfig {
    /// Resolves the configuration into a validated plan stamped with `now`.
    pub fn to_plan(&self, now: DateTime<Utc>) -> Result<PatchPlan> {
        let rules = self
            .relabel
            .iter()
            .map(|entry| match (&entry.replace, &entry.label) {
                (Some(replacement), None) => Ok(RelabelRule::replace(&entry.pattern, replacement)),
                (None, Some(label)) => Ok(RelabelRule::set(&entry.pattern, label)),
                _ => Err(anyhow!(
                    "invalid relabel rule `{}`: set exactly one of `replace` or `label`",
                    entry.pattern
                )),
            })
            .collect::<Result<Vec<_>>>()?;
        let relabel = RelabelRules::new(rules)?;

        let category_groups = self
            .group
            .iter()
            .map(|entry| {
                (
                    entry.category,
                    GroupSpec {
                        name: entry.name.clone(),
                        label: entry.label.clone(),
                        description: entry.description.clone(),
                    },
                )
            })
            .collect::<Vec<_>>();
        let master_group = GroupSpec {
            name: self.master_group.name.clone(),
            label: self.master_group.label.clone(),
            description: self.master_group.description.clone(),
        };
        validate_groups(&category_groups, &master_group)?;

        Ok(PatchPlan {
            author: self.document.author.clone(),
            company: self.document.company.clone(),
            comment: self.document.comment.clone(),
            document_label: self.document.label.clone(),
            modified_at: now,
            metadata: self
                .meta
                .iter()
                .map(|m| (m.key.clone(), m.value.clone()))
                .collect(),
            relabel,
            category_groups,
            master_group,
        })
    }
}
