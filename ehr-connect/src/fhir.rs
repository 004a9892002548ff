//! Small accessors over raw FHIR JSON.

use serde_json::Value;

/// `entry[].resource` of a Bundle. A bare resource yields itself.
pub fn bundle_resources(payload: &Value) -> Vec<&Value> {
    match payload.get("resourceType").and_then(Value::as_str) {
        Some("Bundle") => payload
            .get("entry")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("resource"))
                    .collect()
            })
            .unwrap_or_default(),
        Some(_) => vec![payload],
        None => Vec::new(),
    }
}

pub fn resource_type(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(Value::as_str)
}

/// Non-empty string at `pointer` (JSON pointer syntax).
pub fn text_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Display text of a CodeableConcept: `text`, else the first coding's
/// display, else its code.
pub fn codeable_text(concept: &Value) -> Option<String> {
    text_at(concept, "/text")
        .or_else(|| text_at(concept, "/coding/0/display"))
        .or_else(|| text_at(concept, "/coding/0/code"))
}

/// First CodeableConcept under `field`, which may be a single concept or an
/// array of them.
pub fn concept_text(resource: &Value, field: &str) -> Option<String> {
    match resource.get(field)? {
        Value::Array(items) => items.iter().find_map(codeable_text),
        concept => codeable_text(concept),
    }
}

/// `name[0]` rendered as text, or `given family`.
pub fn human_name(resource: &Value) -> Option<String> {
    let name = resource.pointer("/name/0")?;
    if let Some(text) = text_at(name, "/text") {
        return Some(text);
    }
    let given: Vec<&str> = name
        .get("given")
        .and_then(Value::as_array)
        .map(|g| g.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let family = name.get("family").and_then(Value::as_str);

    let parts: Vec<&str> = given.into_iter().chain(family).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// `telecom` entry of the given system (`phone`, `email`).
pub fn telecom(resource: &Value, system: &str) -> Option<String> {
    resource
        .get("telecom")?
        .as_array()?
        .iter()
        .find(|t| t.get("system").and_then(Value::as_str) == Some(system))
        .and_then(|t| text_at(t, "/value"))
}

/// A numeric or string JSON value as display text.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `valueQuantity` as `value unit`.
pub fn quantity_text(quantity: &Value) -> Option<String> {
    let value = quantity.get("value").and_then(scalar_text)?;
    match text_at(quantity, "/unit").or_else(|| text_at(quantity, "/code")) {
        Some(unit) => Some(format!("{} {}", value, unit)),
        None => Some(value),
    }
}
