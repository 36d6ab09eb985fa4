//! Collision-tolerant merge primitives shared by the v2 and v3 documents.
use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::debug;

/// The mutable target maps a document is folded into.
pub(crate) struct MergeTarget<'a> {
    pub paths: &'a mut BTreeMap<String, Value>,
    pub definitions: &'a mut BTreeMap<String, Value>,
    pub parameters: &'a mut BTreeMap<String, Value>,
}

/// The source maps of the document being folded in, plus the `$ref` prefixes
/// its references use (`#/definitions/` vs `#/components/schemas/`).
pub(crate) struct MergeSource<'a> {
    pub paths: &'a BTreeMap<String, Value>,
    pub definitions: &'a BTreeMap<String, Value>,
    pub parameters: &'a BTreeMap<String, Value>,
    pub definition_ref_prefix: &'static str,
    pub parameter_ref_prefix: &'static str,
}

/// Fold `source` into `target`.
///
/// Definitions and parameters whose names collide with an existing entry are
/// renamed (unless byte-identical, in which case the existing entry is
/// shared), and every `$ref` inside the incoming document is rewritten to
/// match. Overlapping paths are skipped, first writer wins.
pub(crate) fn merge_into(service: &str, target: MergeTarget<'_>, source: MergeSource<'_>) {
    let definition_renames = plan_renames(target.definitions, source.definitions);
    let parameter_renames = plan_renames(target.parameters, source.parameters);

    let rewrite = |value: &mut Value| {
        rewrite_refs(value, source.definition_ref_prefix, &definition_renames);
        rewrite_refs(value, source.parameter_ref_prefix, &parameter_renames);
    };

    for (name, schema) in source.definitions {
        let key = definition_renames.get(name).unwrap_or(name);
        if target.definitions.contains_key(key) {
            // identical schema already present, share it
            continue;
        }
        let mut schema = schema.clone();
        rewrite(&mut schema);
        target.definitions.insert(key.clone(), schema);
    }

    for (name, parameter) in source.parameters {
        let key = parameter_renames.get(name).unwrap_or(name);
        if target.parameters.contains_key(key) {
            continue;
        }
        let mut parameter = parameter.clone();
        rewrite(&mut parameter);
        target.parameters.insert(key.clone(), parameter);
    }

    for (path, item) in source.paths {
        if target.paths.contains_key(path) {
            debug!(service, path, "skipping conflicting path during spec merge");
            continue;
        }
        let mut item = item.clone();
        rewrite(&mut item);
        target.paths.insert(path.clone(), item);
    }
}

/// Decide new names for incoming entries that collide with existing ones.
///
/// Byte-identical entries are not renamed (they will be deduplicated); a
/// genuinely different entry gets the first free `{name}_{n}` with n >= 2.
fn plan_renames(
    existing: &BTreeMap<String, Value>,
    incoming: &BTreeMap<String, Value>,
) -> HashMap<String, String> {
    let mut renames = HashMap::new();
    for (name, value) in incoming {
        match existing.get(name) {
            None => {}
            Some(current) if current == value => {}
            Some(_) => {
                let mut n = 2;
                loop {
                    let candidate = format!("{name}_{n}");
                    if !existing.contains_key(&candidate) && !incoming.contains_key(&candidate) {
                        renames.insert(name.clone(), candidate);
                        break;
                    }
                    n += 1;
                }
            }
        }
    }
    renames
}

/// Rewrite every `$ref` under `value` whose target was renamed.
fn rewrite_refs(value: &mut Value, prefix: &str, renames: &HashMap<String, String>) {
    if renames.is_empty() {
        return;
    }
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get_mut("$ref") {
                if let Some(target) = reference.strip_prefix(prefix) {
                    if let Some(renamed) = renames.get(target) {
                        *reference = format!("{prefix}{renamed}");
                    }
                }
            }
            for child in map.values_mut() {
                rewrite_refs(child, prefix, renames);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_refs(item, prefix, renames);
            }
        }
        _ => {}
    }
}

/// Rewrite every `$ref` under `value` from one prefix convention to another,
/// used by the v2 -> v3 conversion.
pub(crate) fn replace_ref_prefix(value: &mut Value, from: &str, to: &str) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get_mut("$ref") {
                if let Some(target) = reference.strip_prefix(from) {
                    *reference = format!("{to}{target}");
                }
            }
            for child in map.values_mut() {
                replace_ref_prefix(child, from, to);
            }
        }
        Value::Array(items) => {
            for item in items {
                replace_ref_prefix(item, from, to);
            }
        }
        _ => {}
    }
}

/// Remove redundant empty `default` members from a schema tree.
///
/// The locally generated document tends to carry `default: ""` / `default: {}`
/// noise which inflates the merged output and causes spurious definition
/// conflicts between otherwise identical types.
pub fn strip_empty_defaults(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("default").is_some_and(is_empty_value) {
                map.remove("default");
            }
            for child in map.values_mut() {
                strip_empty_defaults(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_empty_defaults(item);
            }
        }
        _ => {}
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
