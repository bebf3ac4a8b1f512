use crate::error::PatchError;
use crate::patcher::markup::{Element, MarkupDocument};
use tracing::debug;

pub const GROUP_TYPE: &str = "App::DocumentObjectGroup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub type_name: String,
    pub name: String,
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub name: String,
    pub label: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedGroup {
    pub name: String,
    pub id: u64,
    pub children: Vec<String>,
}

fn objects(doc: &MarkupDocument) -> Result<&Element, PatchError> {
    doc.root.child("Objects").ok_or_else(|| {
        PatchError::MalformedDocument("document has no <Objects> section".to_string())
    })
}

fn parse_u64(raw: &str, what: &str) -> Result<u64, PatchError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| PatchError::MalformedDocument(format!("{what} `{raw}` is not an integer")))
}

/// Object records in document order.
pub fn object_records(doc: &MarkupDocument) -> Result<Vec<ObjectRecord>, PatchError> {
    let mut out = Vec::new();
    for el in objects(doc)?.elements().filter(|el| el.name == "Object") {
        let Some(name) = el.attr("name") else {
            return Err(PatchError::MalformedDocument(
                "object record without a name".to_string(),
            ));
        };
        let id = match el.attr("id") {
            Some(raw) => parse_u64(raw, &format!("id of object `{name}`"))?,
            None => {
                return Err(PatchError::MalformedDocument(format!(
                    "object `{name}` has no id"
                )));
            }
        };
        out.push(ObjectRecord {
            type_name: el.attr("type").unwrap_or_default().to_string(),
            name: name.to_string(),
            id,
        });
    }
    Ok(out)
}

/// Max existing id + 1, so sparse or unordered ids never collide.
pub fn next_object_id(records: &[ObjectRecord]) -> Result<u64, PatchError> {
    let Some(max) = records.iter().map(|r| r.id).max() else {
        return Ok(0);
    };
    max.checked_add(1).ok_or_else(|| {
        PatchError::MalformedDocument(format!("object id {max} leaves no room for a new id"))
    })
}

/// Children listed by the dependency record of `name`, if there is one.
pub fn dependency_names(doc: &MarkupDocument, name: &str) -> Option<Vec<String>> {
    let deps = doc
        .root
        .child("Objects")?
        .child_with_attr("ObjectDeps", "Name", name)?;
    Some(
        deps.elements()
            .filter(|el| el.name == "Dep")
            .filter_map(|el| el.attr("Name").map(ToOwned::to_owned))
            .collect(),
    )
}

fn string_property(name: &str, type_name: &str, value: &str) -> Element {
    Element::new("Property")
        .with_attr("name", name)
        .with_attr("type", type_name)
        .with_child(Element::new("String").with_attr("value", value))
}

fn group_data_record(spec: &GroupSpec, children: &[String]) -> Element {
    let mut links = Element::new("LinkList").with_attr("count", children.len().to_string());
    for child in children {
        links.push_child(Element::new("Link").with_attr("value", child.as_str()));
    }
    let group = Element::new("Property")
        .with_attr("name", "Group")
        .with_attr("type", "App::PropertyLinkList")
        .with_child(links);

    Element::new("Object").with_attr("name", spec.name.as_str()).with_child(
        Element::new("Properties")
            .with_attr("Count", "3")
            .with_child(string_property("Label", "App::PropertyString", &spec.label))
            .with_child(string_property(
                "Label2",
                "App::PropertyString",
                &spec.description,
            ))
            .with_child(group),
    )
}

fn bump_count(el: &mut Element, key: &str, what: &str) -> Result<(), PatchError> {
    let Some(raw) = el.attr(key) else {
        return Err(PatchError::MalformedDocument(format!("{what} has no {key}")));
    };
    let count = parse_u64(raw, &format!("{what} {key}"))?;
    let Some(next) = count.checked_add(1) else {
        return Err(PatchError::MalformedDocument(format!(
            "{what} {key} {count} cannot grow"
        )));
    };
    el.set_attr(key, next.to_string());
    Ok(())
}

/// Appends a grouping object record, its dependency record, and its
/// object-data record.
pub fn add_group(
    doc: &mut MarkupDocument,
    spec: &GroupSpec,
    children: &[String],
) -> Result<AddedGroup, PatchError> {
    let records = object_records(doc)?;
    if records.iter().any(|r| r.name == spec.name) {
        return Err(PatchError::DuplicateObjectName(spec.name.clone()));
    }
    if let Some(missing) = children
        .iter()
        .find(|child| !records.iter().any(|r| &r.name == *child))
    {
        return Err(PatchError::DanglingReference {
            group: spec.name.clone(),
            child: missing.clone(),
        });
    }
    let id = next_object_id(&records)?;

    let Some(objects) = doc.root.child_mut("Objects") else {
        return Err(PatchError::MalformedDocument(
            "document has no <Objects> section".to_string(),
        ));
    };
    bump_count(objects, "Count", "<Objects>")?;

    let mut deps = Element::new("ObjectDeps")
        .with_attr("Name", spec.name.as_str())
        .with_attr("Count", children.len().to_string());
    for child in children {
        deps.push_child(Element::new("Dep").with_attr("Name", child.as_str()));
    }
    objects.insert_after_last_named(deps);
    objects.insert_after_last_named(
        Element::new("Object")
            .with_attr("type", GROUP_TYPE)
            .with_attr("name", spec.name.as_str())
            .with_attr("id", id.to_string()),
    );

    if doc.root.child("ObjectData").is_none() {
        doc.root
            .insert_after_last_named(Element::new("ObjectData").with_attr("Count", "0"));
    }
    if let Some(data) = doc.root.child_mut("ObjectData") {
        if data.attr("Count").is_some() {
            bump_count(data, "Count", "<ObjectData>")?;
        }
        data.insert_after_last_named(group_data_record(spec, children));
    }

    debug!(group = %spec.name, id, children = children.len(), "group added");
    Ok(AddedGroup {
        name: spec.name.clone(),
        id,
        children: children.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patcher::markup::parse;
    use crate::patcher::test_support::SAMPLE_DOCUMENT;

    fn spec(name: &str) -> GroupSpec {
        GroupSpec {
            name: name.to_string(),
            label: format!("01_{name}"),
            description: format!("{name} members"),
        }
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn add_group_appends_records_with_next_id() {
        let mut doc = parse(SAMPLE_DOCUMENT).expect("parse");
        let before = object_records(&doc).expect("records");

        let added = add_group(
            &mut doc,
            &spec("Foundation"),
            &names(&["Footing_1", "Footing_2", "Footing_3"]),
        )
        .expect("add group");

        let after = object_records(&doc).expect("records");
        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(added.id, next_object_id(&before).expect("next id"));
        assert_eq!(
            after.iter().filter(|r| r.id == added.id).count(),
            1,
            "new id must be unique"
        );
        let group = after.iter().find(|r| r.name == "Foundation").expect("group");
        assert_eq!(group.type_name, GROUP_TYPE);

        assert_eq!(
            dependency_names(&doc, "Foundation"),
            Some(names(&["Footing_1", "Footing_2", "Footing_3"]))
        );
        let count = doc.root.child("Objects").and_then(|o| o.attr("Count"));
        assert_eq!(count, Some("6"));
        let data_count = doc.root.child("ObjectData").and_then(|o| o.attr("Count"));
        assert_eq!(data_count, Some("6"));
    }

    #[test]
    fn next_id_uses_max_for_sparse_ids() {
        let doc = parse(
            "<Document><Objects Count=\"3\">\
             <Object type=\"T\" name=\"A\" id=\"7\"/>\
             <Object type=\"T\" name=\"B\" id=\"2\"/>\
             <Object type=\"T\" name=\"C\" id=\"40\"/>\
             </Objects></Document>",
        )
        .expect("parse");
        let records = object_records(&doc).expect("records");
        assert_eq!(next_object_id(&records).expect("next id"), 41);
        assert_eq!(next_object_id(&[]).expect("empty table"), 0);
    }

    #[test]
    fn duplicate_group_name_is_rejected() {
        let mut doc = parse(SAMPLE_DOCUMENT).expect("parse");
        let err = add_group(&mut doc, &spec("Footing_1"), &[]).unwrap_err();
        assert!(matches!(err, PatchError::DuplicateObjectName(name) if name == "Footing_1"));
    }

    #[test]
    fn unknown_child_is_dangling_reference() {
        let mut doc = parse(SAMPLE_DOCUMENT).expect("parse");
        let err = add_group(&mut doc, &spec("Roof"), &names(&["Rafter_R_9"])).unwrap_err();
        assert!(matches!(
            err,
            PatchError::DanglingReference { group, child } if group == "Roof" && child == "Rafter_R_9"
        ));
        let count = doc.root.child("Objects").and_then(|o| o.attr("Count"));
        assert_eq!(count, Some("5"), "failed add must not touch the document");
    }

    #[test]
    fn group_may_reference_an_earlier_group() {
        let mut doc = parse(SAMPLE_DOCUMENT).expect("parse");
        add_group(&mut doc, &spec("Roof"), &names(&["Rafter_L_1"])).expect("roof");
        let master = add_group(&mut doc, &spec("Structure"), &names(&["Roof"])).expect("master");
        assert_eq!(master.children, names(&["Roof"]));
    }

    #[test]
    fn largest_possible_id_cannot_be_followed() {
        let mut doc = parse(
            "<Document><Objects Count=\"1\">\
             <Object type=\"T\" name=\"A\" id=\"18446744073709551615\"/>\
             </Objects></Document>",
        )
        .expect("parse");
        let before = doc.clone();
        let err = add_group(&mut doc, &spec("G"), &names(&["A"])).unwrap_err();
        assert!(matches!(err, PatchError::MalformedDocument(_)));
        assert_eq!(doc, before);
    }

    #[test]
    fn saturated_object_count_is_malformed() {
        let mut doc = parse(
            "<Document><Objects Count=\"18446744073709551615\">\
             <Object type=\"T\" name=\"A\" id=\"0\"/>\
             </Objects></Document>",
        )
        .expect("parse");
        let err = add_group(&mut doc, &spec("G"), &names(&["A"])).unwrap_err();
        assert!(matches!(err, PatchError::MalformedDocument(_)));
    }

    #[test]
    fn non_numeric_id_is_malformed() {
        let doc = parse(
            "<Document><Objects Count=\"1\"><Object type=\"T\" name=\"A\" id=\"x\"/></Objects></Document>",
        )
        .expect("parse");
        let err = object_records(&doc).unwrap_err();
        assert!(matches!(err, PatchError::MalformedDocument(_)));
    }

    #[test]
    fn object_data_section_is_created_when_missing() {
        let mut doc = parse(
            "<Document><Objects Count=\"1\"><Object type=\"T\" name=\"A\" id=\"0\"/></Objects></Document>",
        )
        .expect("parse");
        add_group(&mut doc, &spec("G"), &names(&["A"])).expect("add");
        let data = doc.root.child("ObjectData").expect("object data");
        assert_eq!(data.attr("Count"), Some("1"));
        let record = data
            .child_with_attr("Object", "name", "G")
            .expect("group data record");
        let label = record
            .child("Properties")
            .and_then(|p| p.child_with_attr("Property", "name", "Label"))
            .and_then(|p| p.child("String"))
            .and_then(|s| s.attr("value"));
        assert_eq!(label, Some("01_G"));
    }
}
