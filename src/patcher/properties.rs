use crate::error::PatchError;
use crate::patcher::markup::{Element, MarkupDocument};
use tracing::debug;

fn properties_mut(doc: &mut MarkupDocument) -> Result<&mut Element, PatchError> {
    doc.root.child_mut("Properties").ok_or_else(|| {
        PatchError::MalformedDocument("document has no <Properties> section".to_string())
    })
}

fn property_mut<'a>(doc: &'a mut MarkupDocument, name: &str) -> Result<&'a mut Element, PatchError> {
    properties_mut(doc)?
        .child_with_attr_mut("Property", "name", name)
        .ok_or_else(|| PatchError::PropertyNotFound(name.to_string()))
}

/// Reads a string-valued document property without failing on absence.
pub fn property_value<'a>(doc: &'a MarkupDocument, name: &str) -> Option<&'a str> {
    doc.root
        .child("Properties")?
        .child_with_attr("Property", "name", name)?
        .child("String")?
        .attr("value")
}

/// Overwrites a string-valued document property and marks it visible.
pub fn set_property(doc: &mut MarkupDocument, name: &str, value: &str) -> Result<(), PatchError> {
    let property = property_mut(doc, name)?;
    let Some(string) = property.child_mut("String") else {
        return Err(PatchError::MalformedDocument(format!(
            "property `{name}` has no <String> value"
        )));
    };
    string.set_attr("value", value);
    property.set_attr("status", "1");
    debug!(property = name, value, "property set");
    Ok(())
}

/// Replaces every entry of the `Meta` map property, keeping the given order.
pub fn set_metadata_map(
    doc: &mut MarkupDocument,
    entries: &[(String, String)],
) -> Result<(), PatchError> {
    let property = property_mut(doc, "Meta")?;
    let Some(map) = property.child_mut("Map") else {
        return Err(PatchError::MalformedDocument(
            "property `Meta` has no <Map> value".to_string(),
        ));
    };

    map.clear_children();
    for (key, value) in entries {
        map.push_child(
            Element::new("Item")
                .with_attr("key", key.as_str())
                .with_attr("value", value.as_str()),
        );
    }
    map.self_closing = entries.is_empty();
    map.set_attr("count", entries.len().to_string());
    debug!(count = entries.len(), "metadata map replaced");
    Ok(())
}

/// Key-value pairs currently stored in the `Meta` map property.
pub fn metadata_entries(doc: &MarkupDocument) -> Vec<(String, String)> {
    let Some(map) = doc
        .root
        .child("Properties")
        .and_then(|p| p.child_with_attr("Property", "name", "Meta"))
        .and_then(|p| p.child("Map"))
    else {
        return Vec::new();
    };
    map.elements()
        .filter(|el| el.name == "Item")
        .map(|el| {
            (
                el.attr("key").unwrap_or_default().to_string(),
                el.attr("value").unwrap_or_default().to_string(),
            )
        })
        .collect()
}
