/// Deep state traversal.
///
/// State arrives as a flat map of declared keys to JSON values, but values
/// nest: `{ user: { address: { city: "NYC" } } }`. Template extraction has
/// to find where a rendered string came from inside that nesting, and
/// instantiation has to resolve dotted bindings like `user.address.city`
/// back to values. Array elements are addressed as `items[2]`.
use serde_json::Value;
use std::collections::HashMap;

/// Component state: declared key to JSON value.
pub type StateMap = HashMap<String, Value>;

/// A state value located inside rendered text.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotMatch {
    /// Dotted path into the state (e.g. `user.address.city`).
    pub path: String,
    /// The value's string rendering as it appeared in the text.
    pub value_str: String,
    /// Byte offset of the match in the text.
    pub position: usize,
}

/// Render a scalar the way the host's renderer does.
pub fn display_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Resolve a dotted path, with optional `[i]` array indexing, against a
/// state map.
pub fn lookup_path<'a>(state: &'a StateMap, path: &str) -> Option<&'a Value> {
    let mut current: Option<&'a Value> = None;

    for part in path.split('.') {
        let (name, indices) = split_indices(part)?;
        let mut value = match current {
            None => state.get(name)?,
            Some(v) => v.as_object()?.get(name)?,
        };
        for idx in indices {
            value = value.as_array()?.get(idx)?;
        }
        current = Some(value);
    }

    current
}

fn split_indices(part: &str) -> Option<(&str, Vec<usize>)> {
    match part.find('[') {
        None => Some((part, Vec::new())),
        Some(open) => {
            let name = &part[..open];
            let mut indices = Vec::new();
            let mut rest = &part[open..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']')?;
                indices.push(stripped[..close].parse().ok()?);
                rest = &stripped[close + 1..];
            }
            if rest.is_empty() {
                Some((name, indices))
            } else {
                None
            }
        }
    }
}

/// Every scalar in the state, keyed by its string rendering, with all the
/// dotted paths it appears at.
pub fn collect_scalars(state: &StateMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();

    fn walk(value: &Value, path: &str, out: &mut HashMap<String, Vec<String>>) {
        match value {
            Value::String(s) if !s.is_empty() => {
                out.entry(s.clone()).or_default().push(path.to_string());
            }
            Value::Number(n) => {
                out.entry(n.to_string()).or_default().push(path.to_string());
            }
            Value::Bool(b) => {
                out.entry(b.to_string()).or_default().push(path.to_string());
            }
            Value::Object(obj) => {
                for (key, val) in obj {
                    let next = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    walk(val, &next, out);
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    walk(item, &format!("{path}[{i}]"), out);
                }
            }
            _ => {}
        }
    }

    for (key, value) in state {
        walk(value, key, &mut out);
    }

    out
}

/// Locate state values inside rendered text, leftmost-first, dropping
/// overlaps. Ambiguity note: a value reachable through several paths keeps
/// only its first path.
pub fn find_slots_in_text(state: &StateMap, text: &str) -> Vec<SlotMatch> {
    let scalars = collect_scalars(state);
    let mut matches = Vec::new();

    for (value_str, paths) in scalars {
        let path = match paths.first() {
            Some(p) => p.clone(),
            None => continue,
        };
        let mut from = 0usize;
        while let Some(rel) = text[from..].find(&value_str) {
            let position = from + rel;
            matches.push(SlotMatch {
                path: path.clone(),
                value_str: value_str.clone(),
                position,
            });
            from = position + value_str.len();
        }
    }

    matches.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            // Prefer the longer match at the same offset: "12" over "1".
            .then(b.value_str.len().cmp(&a.value_str.len()))
    });

    let mut filtered: Vec<SlotMatch> = Vec::new();
    let mut covered_until = 0usize;
    for m in matches {
        if m.position >= covered_until {
            covered_until = m.position + m.value_str.len();
            filtered.push(m);
        }
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> StateMap {
        serde_json::from_value(json!({
            "user": {
                "name": "John",
                "address": { "city": "NYC", "zip": "10001" }
            },
            "tags": ["alpha", "beta"],
            "count": 12
        }))
        .unwrap()
    }

    #[test]
    fn lookup_resolves_nested_and_indexed_paths() {
        let s = state();
        assert_eq!(lookup_path(&s, "user.name"), Some(&json!("John")));
        assert_eq!(lookup_path(&s, "user.address.city"), Some(&json!("NYC")));
        assert_eq!(lookup_path(&s, "tags[1]"), Some(&json!("beta")));
        assert_eq!(lookup_path(&s, "user.missing"), None);
        assert_eq!(lookup_path(&s, "tags[9]"), None);
    }

    #[test]
    fn collect_scalars_produces_dotted_paths() {
        let scalars = collect_scalars(&state());
        assert_eq!(scalars.get("NYC").unwrap(), &vec!["user.address.city"]);
        assert_eq!(scalars.get("John").unwrap(), &vec!["user.name"]);
        assert_eq!(scalars.get("beta").unwrap(), &vec!["tags[1]"]);
        assert!(scalars.contains_key("12"));
    }

    #[test]
    fn slots_are_leftmost_and_non_overlapping() {
        let slots = find_slots_in_text(&state(), "User: John from NYC");
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].path, "user.name");
        assert_eq!(slots[0].position, 6);
        assert_eq!(slots[1].path, "user.address.city");
        assert_eq!(slots[1].position, 16);
    }

    #[test]
    fn longer_match_wins_at_same_offset() {
        let mut s = StateMap::new();
        s.insert("a".to_string(), json!(1));
        s.insert("ab".to_string(), json!(12));
        let slots = find_slots_in_text(&s, "value 12 here");
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].value_str, "12");
    }

    #[test]
    fn display_scalar_matches_renderer() {
        assert_eq!(display_scalar(&json!(3)).unwrap(), "3");
        assert_eq!(display_scalar(&json!("x")).unwrap(), "x");
        assert_eq!(display_scalar(&json!(true)).unwrap(), "true");
        assert!(display_scalar(&json!([1])).is_none());
    }
}
