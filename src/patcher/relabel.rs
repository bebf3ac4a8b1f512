use crate::error::PatchError;
use crate::patcher::markup::{Element, MarkupDocument};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelabelAction {
    /// Substitute the pattern inside the label.
    Replace(String),
    /// Replace the whole label.
    Set(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelabelRule {
    pub pattern: String,
    pub action: RelabelAction,
}

impl RelabelRule {
    pub fn replace(pattern: &str, replacement: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            action: RelabelAction::Replace(replacement.to_string()),
        }
    }

    pub fn set(pattern: &str, label: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            action: RelabelAction::Set(label.to_string()),
        }
    }

    fn output(&self) -> &str {
        match &self.action {
            RelabelAction::Replace(text) | RelabelAction::Set(text) => text,
        }
    }
}

/// Ordered rule list whose outputs never contain any rule's pattern.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelabelRules {
    rules: Vec<RelabelRule>,
}

impl RelabelRules {
    pub fn new(rules: Vec<RelabelRule>) -> Result<Self, PatchError> {
        for rule in &rules {
            if rule.pattern.is_empty() {
                return Err(PatchError::InvalidPlan(
                    "relabel rule with an empty pattern".to_string(),
                ));
            }
        }
        for rule in &rules {
            if let Some(other) = rules.iter().find(|o| rule.output().contains(&o.pattern)) {
                return Err(PatchError::InvalidPlan(format!(
                    "relabel output `{}` (rule `{}`) contains pattern `{}`",
                    rule.output(),
                    rule.pattern,
                    other.pattern
                )));
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[RelabelRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// New label for `label`, or `None` when nothing changes. `key` selects the
    /// rule: the first rule whose pattern occurs in it wins.
    pub fn apply(&self, key: &str, label: &str) -> Option<String> {
        let rule = self.rules.iter().find(|r| key.contains(&r.pattern))?;
        let updated = match &rule.action {
            RelabelAction::Set(fixed) => fixed.clone(),
            RelabelAction::Replace(replacement) => {
                let mut current = label.to_string();
                // bounded: a substitution can expose a fresh occurrence
                for _ in 0..=label.len() {
                    if !current.contains(&rule.pattern) {
                        break;
                    }
                    current = current.replace(&rule.pattern, replacement);
                }
                current
            }
        };
        (updated != label).then_some(updated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relabeled {
    pub owner: Option<String>,
    pub before: String,
    pub after: String,
}

fn label_string_mut(property: &mut Element) -> Option<&mut Element> {
    if property.name == "Property" && property.attr("name") == Some("Label") {
        property.child_mut("String")
    } else {
        None
    }
}

fn visit(el: &mut Element, owner: Option<&str>, rules: &RelabelRules, out: &mut Vec<Relabeled>) {
    let owned_name;
    let owner = if el.name == "Object" {
        owned_name = el.attr("name").map(ToOwned::to_owned);
        owned_name.as_deref().or(owner)
    } else {
        owner
    };

    for child in el.elements_mut() {
        if let Some(string) = label_string_mut(child) {
            let current = string.attr("value").unwrap_or_default().to_string();
            let key = owner.unwrap_or(current.as_str());
            if let Some(next) = rules.apply(key, &current) {
                debug!(owner = ?owner, before = %current, after = %next, "label rewritten");
                string.set_attr("value", next.as_str());
                out.push(Relabeled {
                    owner: owner.map(ToOwned::to_owned),
                    before: current,
                    after: next,
                });
            }
            continue;
        }
        visit(child, owner, rules, out);
    }
}

/// Rewrites every object label under `<ObjectData>`. Labels inside an
/// `<Object name=…>` record are matched on the owning object's name, bare
/// label records on their own text.
pub fn relabel_objects(doc: &mut MarkupDocument, rules: &RelabelRules) -> Vec<Relabeled> {
    let mut out = Vec::new();
    if rules.is_empty() {
        return out;
    }
    if let Some(data) = doc.root.child_mut("ObjectData") {
        visit(data, None, rules, &mut out);
    }
    out
}

/// Label stored for each object under `<ObjectData>`, keyed by object name.
pub fn object_labels(doc: &MarkupDocument) -> Vec<(String, String)> {
    let Some(data) = doc.root.child("ObjectData") else {
        return Vec::new();
    };
    data.elements()
        .filter(|el| el.name == "Object")
        .filter_map(|obj| {
            let name = obj.attr("name")?;
            let label = obj
                .child("Properties")?
                .child_with_attr("Property", "name", "Label")?
                .child("String")?
                .attr("value")?;
            Some((name.to_string(), label.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patcher::markup::parse;
    use crate::patcher::plan::default_relabel_rules;
    use crate::patcher::test_support::SAMPLE_DOCUMENT;

    #[test]
    fn frame_labels_are_rewritten() {
        let mut doc = parse(SAMPLE_DOCUMENT).expect("parse");
        let changed = relabel_objects(&mut doc, &default_relabel_rules());
        assert_eq!(changed.len(), 5);

        let labels: Vec<String> = object_labels(&doc).into_iter().map(|(_, l)| l).collect();
        assert_eq!(
            labels,
            vec![
                "Footing 1",
                "Footing 2",
                "Footing 3",
                "Center Column 1",
                "Left Rafter 1"
            ]
        );
    }

    #[test]
    fn relabeling_twice_changes_nothing_more() {
        let mut doc = parse(SAMPLE_DOCUMENT).expect("parse");
        let rules = default_relabel_rules();
        relabel_objects(&mut doc, &rules);
        let once = doc.clone();
        let changed = relabel_objects(&mut doc, &rules);
        assert!(changed.is_empty());
        assert_eq!(doc, once);
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = RelabelRules::new(vec![
            RelabelRule::replace("Post_L_", "Left Upright "),
            RelabelRule::set("Post", "Generic Upright"),
        ])
        .expect("rules");
        assert_eq!(
            rules.apply("Post_L_4", "Post_L_4"),
            Some("Left Upright 4".to_string())
        );
        assert_eq!(
            rules.apply("Post_Mid", "Post_Mid"),
            Some("Generic Upright".to_string())
        );
        assert_eq!(rules.apply("Sketch", "Sketch"), None);
    }

    #[test]
    fn name_keyed_relabel_is_idempotent_for_mixed_labels() {
        let rules = default_relabel_rules();
        let first = rules
            .apply("Footing_2", "Footing_Post_L_2")
            .expect("changed");
        assert_eq!(first, "Footing Post_L_2");
        assert_eq!(rules.apply("Footing_2", &first), None);
    }

    #[test]
    fn replacement_is_applied_until_pattern_is_gone() {
        let rules = RelabelRules::new(vec![RelabelRule::replace("ab", "a")]).expect("rules");
        let once = rules.apply("xab", "aabb").expect("changed");
        assert!(!once.contains("ab"));
        assert_eq!(rules.apply("xab", &once), None);
    }

    #[test]
    fn unmatched_labels_are_untouched() {
        let mut doc = parse(
            "<Document><ObjectData Count=\"1\"><Object name=\"Sketch\"><Properties Count=\"1\">\
             <Property name=\"Label\" type=\"App::PropertyString\"><String value=\"Footing_sketch\"/></Property>\
             </Properties></Object></ObjectData></Document>",
        )
        .expect("parse");
        let changed = relabel_objects(&mut doc, &default_relabel_rules());
        assert!(changed.is_empty());
        assert_eq!(
            object_labels(&doc),
            vec![("Sketch".to_string(), "Footing_sketch".to_string())]
        );
    }

    #[test]
    fn bare_label_records_match_on_label_text() {
        let mut doc = parse(
            "<Document><ObjectData>\
             <Property name=\"Label\"><String value=\"Rafter_R_3\"/></Property>\
             </ObjectData></Document>",
        )
        .expect("parse");
        let changed = relabel_objects(&mut doc, &default_relabel_rules());
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].owner, None);
        assert_eq!(changed[0].after, "Right Rafter 3");
    }

    #[test]
    fn bare_label_with_two_patterns_changes_on_second_pass() {
        // no owning object name to key on, so each pass re-reads the label text
        let mut doc = parse(
            "<Document><ObjectData>\
             <Property name=\"Label\"><String value=\"Footing_Post_L_2\"/></Property>\
             </ObjectData></Document>",
        )
        .expect("parse");
        let rules = default_relabel_rules();

        let first = relabel_objects(&mut doc, &rules);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].after, "Footing Post_L_2");

        let second = relabel_objects(&mut doc, &rules);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].after, "Footing Left Post 2");

        assert!(relabel_objects(&mut doc, &rules).is_empty());
    }

    #[test]
    fn rules_whose_output_contains_a_pattern_are_rejected() {
        let err = RelabelRules::new(vec![
            RelabelRule::replace("Beam_", "Beam "),
            RelabelRule::replace("Post_", "Post_Beam_"),
        ])
        .unwrap_err();
        assert!(matches!(err, PatchError::InvalidPlan(_)));

        let err = RelabelRules::new(vec![RelabelRule::replace("", "x")]).unwrap_err();
        assert!(matches!(err, PatchError::InvalidPlan(_)));
    }
}
