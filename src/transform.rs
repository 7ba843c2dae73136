use serde_json::Value;

/// Version of the transform table, shared with the client over FFI so
/// Expression templates are only executed when both sides agree.
pub const TRANSFORM_WHITELIST_VERSION: u32 = 1;

/// A pure, client-replayable text transform.
///
/// The table is closed: extraction rejects any name outside it, and the
/// engine never synthesizes new transforms from observed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Fixed1,
    Fixed2,
    Round,
    Floor,
    Ceil,
    Abs,
    Upper,
    Lower,
    Trim,
    Length,
}

pub const WHITELIST: [Transform; 10] = [
    Transform::Fixed1,
    Transform::Fixed2,
    Transform::Round,
    Transform::Floor,
    Transform::Ceil,
    Transform::Abs,
    Transform::Upper,
    Transform::Lower,
    Transform::Trim,
    Transform::Length,
];

impl Transform {
    pub fn name(&self) -> &'static str {
        match self {
            Transform::Fixed1 => "fixed1",
            Transform::Fixed2 => "fixed2",
            Transform::Round => "round",
            Transform::Floor => "floor",
            Transform::Ceil => "ceil",
            Transform::Abs => "abs",
            Transform::Upper => "upper",
            Transform::Lower => "lower",
            Transform::Trim => "trim",
            Transform::Length => "length",
        }
    }

    pub fn lookup(name: &str) -> Option<Transform> {
        WHITELIST.iter().copied().find(|t| t.name() == name)
    }

    /// Apply to a state value, or `None` when the value's type does not fit
    /// the transform.
    pub fn apply(&self, value: &Value) -> Option<String> {
        match self {
            Transform::Fixed1 => value.as_f64().map(|f| format!("{:.1}", f)),
            Transform::Fixed2 => value.as_f64().map(|f| format!("{:.2}", f)),
            Transform::Round => value.as_f64().map(|f| format!("{}", f.round() as i64)),
            Transform::Floor => value.as_f64().map(|f| format!("{}", f.floor() as i64)),
            Transform::Ceil => value.as_f64().map(|f| format!("{}", f.ceil() as i64)),
            Transform::Abs => match value {
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Some(i.abs().to_string())
                    } else {
                        n.as_f64().map(|f| f.abs().to_string())
                    }
                }
                _ => None,
            },
            Transform::Upper => value.as_str().map(|s| s.to_uppercase()),
            Transform::Lower => value.as_str().map(|s| s.to_lowercase()),
            Transform::Trim => value.as_str().map(|s| s.trim().to_string()),
            Transform::Length => match value {
                Value::String(s) => Some(s.chars().count().to_string()),
                Value::Array(items) => Some(items.len().to_string()),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_resolves_every_whitelisted_name() {
        for t in WHITELIST {
            assert_eq!(Transform::lookup(t.name()), Some(t));
        }
        assert_eq!(Transform::lookup("eval"), None);
    }

    #[test]
    fn numeric_transforms() {
        assert_eq!(Transform::Fixed2.apply(&json!(3.14159)).unwrap(), "3.14");
        assert_eq!(Transform::Fixed1.apply(&json!(2)).unwrap(), "2.0");
        assert_eq!(Transform::Round.apply(&json!(2.6)).unwrap(), "3");
        assert_eq!(Transform::Floor.apply(&json!(2.6)).unwrap(), "2");
        assert_eq!(Transform::Ceil.apply(&json!(2.1)).unwrap(), "3");
        assert_eq!(Transform::Abs.apply(&json!(-5)).unwrap(), "5");
        assert!(Transform::Fixed2.apply(&json!("text")).is_none());
    }

    #[test]
    fn string_transforms() {
        assert_eq!(Transform::Upper.apply(&json!("abc")).unwrap(), "ABC");
        assert_eq!(Transform::Lower.apply(&json!("ABC")).unwrap(), "abc");
        assert_eq!(Transform::Trim.apply(&json!("  x ")).unwrap(), "x");
        assert_eq!(Transform::Length.apply(&json!("abcd")).unwrap(), "4");
        assert_eq!(Transform::Length.apply(&json!([1, 2, 3])).unwrap(), "3");
        assert!(Transform::Upper.apply(&json!(5)).is_none());
    }
}
