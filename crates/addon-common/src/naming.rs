//! Stack and volume naming rules.
//!
//! Both backends derive resource names from the add-on name: the stack name
//! is lower-cased with every non-alphanumeric character stripped, and volumes
//! are scoped by prefixing that normalized name.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches every character that is not an ASCII letter or digit.
static NON_ALPHANUMERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]").expect("Invalid regex pattern"));

/// Normalizes an add-on name into a stack/project name.
///
/// # Example
///
/// ```
/// use addon_common::naming::normalize_stack_name;
///
/// assert_eq!(normalize_stack_name("Node-RED Flow"), "noderedflow");
/// ```
pub fn normalize_stack_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    NON_ALPHANUMERIC_RE.replace_all(&lowered, "").into_owned()
}

/// Returns the scoped volume name `{normalizedStackName}_{volumeName}`.
pub fn scoped_volume_name(stack_name: &str, volume_name: &str) -> String {
    format!("{}_{}", normalize_stack_name(stack_name), volume_name)
}

/// Splits a scoped volume name back into its logical volume name.
///
/// Returns `None` if the volume does not belong to the stack.
pub fn unscoped_volume_name<'a>(stack_name: &str, scoped: &'a str) -> Option<&'a str> {
    let prefix = format!("{}_", normalize_stack_name(stack_name));
    scoped.strip_prefix(prefix.as_str()).filter(|v| !v.is_empty())
}
