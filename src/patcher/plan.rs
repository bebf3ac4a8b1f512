use crate::error::PatchError;
use crate::patcher::category::{Category, categorize};
use crate::patcher::markup::MarkupDocument;
use crate::patcher::objects::{AddedGroup, GROUP_TYPE, GroupSpec, add_group, object_records};
use crate::patcher::properties::{set_metadata_map, set_property};
use crate::patcher::relabel::{Relabeled, RelabelRule, RelabelRules, relabel_objects};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::info;

pub const DEFAULT_AUTHOR: &str = "Professional House Designer <designer@architecture.com>";
pub const DEFAULT_COMPANY: &str = "Professional Architecture Firm";
pub const DEFAULT_COMMENT: &str = "Professional timber frame house structure with gabled roof system. \
Includes foundation footings, vertical columns/posts, horizontal beams, and complete roof rafter assembly.";
pub const DEFAULT_DOCUMENT_LABEL: &str = "Professional_House_Frame";

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Every edit one patch run applies, fully resolved.
#[derive(Debug, Clone)]
pub struct PatchPlan {
    pub author: String,
    pub company: String,
    pub comment: String,
    pub document_label: String,
    pub modified_at: DateTime<Utc>,
    pub metadata: Vec<(String, String)>,
    pub relabel: RelabelRules,
    pub category_groups: Vec<(Category, GroupSpec)>,
    pub master_group: GroupSpec,
}

pub fn default_metadata() -> Vec<(String, String)> {
    [
        ("Project", "Residential House Frame"),
        ("Type", "Structural Frame"),
        ("Category", "Timber Construction"),
        ("BuildingCode", "IBC 2021"),
        ("DesignLoad", "Residential"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn default_relabel_list() -> Vec<RelabelRule> {
    vec![
        RelabelRule::replace("Footing_", "Footing "),
        RelabelRule::replace("Column_Center_", "Center Column "),
        RelabelRule::replace("Post_L_", "Left Post "),
        RelabelRule::replace("Post_R_", "Right Post "),
        RelabelRule::set("RidgeBeam", "Ridge Beam (Peak)"),
        RelabelRule::set("HBeam_Left", "Horizontal Beam (Left)"),
        RelabelRule::set("HBeam_Right", "Horizontal Beam (Right)"),
        RelabelRule::replace("Rafter_L_", "Left Rafter "),
        RelabelRule::replace("Rafter_R_", "Right Rafter "),
    ]
}

#[cfg(test)]
pub fn default_relabel_rules() -> RelabelRules {
    RelabelRules::new(default_relabel_list()).expect("default relabel rules are disjoint")
}

fn group(name: &str, label: &str, description: &str) -> GroupSpec {
    GroupSpec {
        name: name.to_string(),
        label: label.to_string(),
        description: description.to_string(),
    }
}

pub fn default_group(category: Category) -> Option<GroupSpec> {
    let spec = match category {
        Category::Foundation => group(
            "Foundation",
            "01_Foundation",
            "Foundation footings supporting the structural frame",
        ),
        Category::Columns => group(
            "Columns",
            "02_Columns_and_Posts",
            "Vertical structural columns and posts",
        ),
        Category::Beams => group(
            "Beams",
            "03_Horizontal_Beams",
            "Horizontal structural beams including ridge beam",
        ),
        Category::Roof => group(
            "Roof",
            "04_Roof_Rafters",
            "Roof rafter system for gabled roof structure",
        ),
        Category::Unclassified => return None,
    };
    Some(spec)
}

pub fn default_master_group() -> GroupSpec {
    group(
        "Structure",
        "House_Frame_Structure",
        "Complete timber frame house structure",
    )
}

/// Checks the group layout: one group per grouped category, unique names.
pub fn validate_groups(
    category_groups: &[(Category, GroupSpec)],
    master: &GroupSpec,
) -> Result<(), PatchError> {
    for category in Category::GROUPED {
        let count = category_groups
            .iter()
            .filter(|(c, _)| *c == category)
            .count();
        if count != 1 {
            return Err(PatchError::InvalidPlan(format!(
                "expected exactly one group for category `{category}`, found {count}"
            )));
        }
    }
    if category_groups
        .iter()
        .any(|(c, _)| *c == Category::Unclassified)
    {
        return Err(PatchError::InvalidPlan(
            "unclassified objects cannot be grouped".to_string(),
        ));
    }

    let mut seen = BTreeMap::new();
    for spec in category_groups.iter().map(|(_, s)| s).chain([master]) {
        if spec.name.trim().is_empty() {
            return Err(PatchError::InvalidPlan("group with an empty name".to_string()));
        }
        if seen.insert(spec.name.as_str(), ()).is_some() {
            return Err(PatchError::InvalidPlan(format!(
                "group name `{}` used twice",
                spec.name
            )));
        }
    }
    Ok(())
}

/// Objects sorted into grouped categories, in document order.
#[derive(Debug, Clone, Default)]
pub struct Categorized {
    pub members: BTreeMap<Category, Vec<String>>,
    pub unclassified: Vec<String>,
}

pub fn categorize_objects(doc: &MarkupDocument) -> Result<Categorized, PatchError> {
    let mut out = Categorized::default();
    for record in object_records(doc)? {
        if record.type_name == GROUP_TYPE {
            continue;
        }
        match categorize(&record.name) {
            Category::Unclassified => out.unclassified.push(record.name),
            category => out.members.entry(category).or_default().push(record.name),
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Default)]
pub struct EditSummary {
    pub properties_set: Vec<String>,
    pub metadata_entries: usize,
    pub relabeled: Vec<Relabeled>,
    pub groups: Vec<AddedGroup>,
    pub unclassified: Vec<String>,
}

/// Applies every edit of `plan` to `doc`, in a fixed order: document
/// properties, metadata map, labels, then groups.
pub fn apply_plan(doc: &mut MarkupDocument, plan: &PatchPlan) -> Result<EditSummary, PatchError> {
    let mut summary = EditSummary::default();

    let stamp = plan.modified_at.format(TIMESTAMP_FORMAT).to_string();
    let properties = [
        ("CreatedBy", plan.author.as_str()),
        ("LastModifiedBy", plan.author.as_str()),
        ("Company", plan.company.as_str()),
        ("Comment", plan.comment.as_str()),
        ("Label", plan.document_label.as_str()),
        ("LastModifiedDate", stamp.as_str()),
    ];
    for (name, value) in properties {
        set_property(doc, name, value)?;
        summary.properties_set.push(name.to_string());
    }

    set_metadata_map(doc, &plan.metadata)?;
    summary.metadata_entries = plan.metadata.len();

    summary.relabeled = relabel_objects(doc, &plan.relabel);
    info!(count = summary.relabeled.len(), "labels rewritten");

    let mut categorized = categorize_objects(doc)?;
    let mut master_children = Vec::with_capacity(plan.category_groups.len());
    for (category, spec) in &plan.category_groups {
        let members = categorized.members.remove(category).unwrap_or_default();
        summary.groups.push(add_group(doc, spec, &members)?);
        master_children.push(spec.name.clone());
    }
    summary
        .groups
        .push(add_group(doc, &plan.master_group, &master_children)?);
    summary.unclassified = categorized.unclassified;
    info!(
        groups = summary.groups.len(),
        unclassified = summary.unclassified.len(),
        "groups added"
    );

    Ok(summary)
}
