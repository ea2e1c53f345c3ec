//! Rewrites a schemars-produced JSON schema into the subset OpenAI strict
//! mode accepts: every object closed and fully required, no `oneOf`/`anyOf`,
//! `$ref` standing alone.

/// Recursively fix a JSON schema for strict mode:
/// - `additionalProperties: false` on all objects
/// - `required` must include all property keys
/// - `oneOf` of const strings becomes `enum`
/// - `anyOf [T, null]` (the `Option<T>` encoding) unwraps to `T`
pub fn fix_schema_for_strict(schema: &mut serde_json::Value) {
  let Some(obj) = schema.as_object_mut() else { return };

  // Strict mode (draft 7): $ref must be the only key
  if obj.contains_key("$ref") {
    obj.retain(|k, _| k == "$ref");
    return;
  }

  if let Some(one_of) = obj.get("oneOf").and_then(|v| v.as_array()).cloned() {
    let consts: Option<Vec<serde_json::Value>> =
      one_of.iter().map(|v| v.get("const").cloned()).collect();
    if let Some(values) = consts {
      obj.clear();
      obj.insert("type".to_owned(), serde_json::Value::String("string".to_owned()));
      obj.insert("enum".to_owned(), serde_json::Value::Array(values));
      return;
    }
  }

  if let Some(any_of) = obj.get("anyOf").and_then(|v| v.as_array()).cloned() {
    let non_null: Vec<&serde_json::Value> =
      any_of.iter().filter(|v| v.get("type").and_then(|t| t.as_str()) != Some("null")).collect();
    if non_null.len() == 1 {
      let inner = non_null[0].clone();
      obj.clear();
      obj.extend(inner.as_object().cloned().unwrap_or_default());
      fix_schema_for_strict(schema);
      return;
    }
  }

  if obj.contains_key("properties") {
    let keys: Vec<serde_json::Value> = obj["properties"]
      .as_object()
      .map(|p| p.keys().map(|k| serde_json::Value::String(k.clone())).collect())
      .unwrap_or_default();
    obj.insert("required".to_owned(), serde_json::Value::Array(keys));
    obj.insert("additionalProperties".to_owned(), serde_json::Value::Bool(false));

    if let Some(props) = obj.get_mut("properties").and_then(|p| p.as_object_mut()) {
      for v in props.values_mut() {
        fix_schema_for_strict(v);
      }
    }
  }

  if let Some(items) = obj.get_mut("items") {
    fix_schema_for_strict(items);
  }

  // schemars 0.x nests under "definitions", 1.x under "$defs"
  for defs_key in ["definitions", "$defs"] {
    if let Some(defs) = obj.get_mut(defs_key).and_then(|d| d.as_object_mut()) {
      for v in defs.values_mut() {
        fix_schema_for_strict(v);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn closes_objects_and_requires_all_properties() {
    let mut schema = json!({
      "type": "object",
      "properties": {
        "name": { "type": "string" },
        "count": { "type": "integer" }
      }
    });
    fix_schema_for_strict(&mut schema);

    assert_eq!(schema["additionalProperties"], json!(false));
    let required: Vec<&str> = schema["required"]
      .as_array()
      .unwrap()
      .iter()
      .map(|v| v.as_str().unwrap())
      .collect();
    assert_eq!(required, vec!["name", "count"]);
  }

  #[test]
  fn one_of_consts_become_enum() {
    let mut schema = json!({
      "oneOf": [
        { "const": "self_disclosed" },
        { "const": "mentioned" },
        { "const": "inferred" }
      ]
    });
    fix_schema_for_strict(&mut schema);

    assert_eq!(schema["type"], json!("string"));
    assert_eq!(
      schema["enum"],
      json!(["self_disclosed", "mentioned", "inferred"])
    );
  }

  #[test]
  fn optional_unwraps_to_inner_type() {
    let mut schema = json!({
      "anyOf": [
        { "type": "string" },
        { "type": "null" }
      ]
    });
    fix_schema_for_strict(&mut schema);
    assert_eq!(schema["type"], json!("string"));
  }

  #[test]
  fn nested_defs_are_fixed() {
    let mut schema = json!({
      "type": "object",
      "properties": { "inner": { "$ref": "#/$defs/Inner", "description": "drop me" } },
      "$defs": {
        "Inner": {
          "type": "object",
          "properties": { "x": { "type": "number" } }
        }
      }
    });
    fix_schema_for_strict(&mut schema);

    assert_eq!(
      schema["properties"]["inner"],
      json!({ "$ref": "#/$defs/Inner" })
    );
    assert_eq!(schema["$defs"]["Inner"]["additionalProperties"], json!(false));
  }
}
