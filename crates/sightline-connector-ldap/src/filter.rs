//! LDAP search filter construction.

use sightline_connector::Watermark;

/// Users only; computer accounts also carry `objectClass=user`.
pub const USER_FILTER: &str = "(&(objectClass=user)(!(objectClass=computer)))";

pub const COMPUTER_FILTER: &str = "(objectClass=computer)";

/// `(objectClass=a)` for one class, `(|(objectClass=a)(objectClass=b))` for
/// several, `(objectClass=*)` for none.
pub fn object_class_filter(classes: &[String]) -> String {
    let terms: Vec<String> = classes
        .iter()
        .map(|class| format!("(objectClass={})", escape_filter_value(class)))
        .collect();
    match terms.as_slice() {
        [] => "(objectClass=*)".to_string(),
        [single] => single.clone(),
        _ => format!("(|{})", terms.concat()),
    }
}

/// AND `base` with a `whenChanged` lower bound when a watermark is present.
pub fn incremental(base: &str, watermark: Option<&Watermark>) -> String {
    match watermark {
        Some(wm) => format!(
            "(&{base}(whenChanged>={}))",
            escape_filter_value(&wm.to_generalized_time())
        ),
        None => base.to_string(),
    }
}

/// Escape special characters in a filter assertion value (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => result.push_str("\\2a"),
            '(' => result.push_str("\\28"),
            ')' => result.push_str("\\29"),
            '\\' => result.push_str("\\5c"),
            '\0' => result.push_str("\\00"),
            _ => result.push(ch),
        }
    }
    result
}
