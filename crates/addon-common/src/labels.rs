//! Metadata labels and stack-format versions.
//!
//! Every stack, service and volume created by the current backend carries a
//! product-version label and a stack-format-version label. The latter is the
//! only record of which backend deployed an add-on.

use std::collections::BTreeMap;

/// Label key holding the product version that created the object.
pub const PRODUCT_VERSION_LABEL: &str = "io.gateway.addon.product-version";

/// Label key holding the stack-format version that created the object.
pub const STACK_VERSION_LABEL: &str = "io.gateway.addon.stack-version";

/// Label set by the compose engine on every object of a project.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Stack-format versions known to the migration path.
pub mod versions {
    /// Stacks deployed through the remote stack-management service.
    pub const LEGACY: &str = "1";

    /// Stacks deployed through the local compose engine.
    pub const CURRENT: &str = "2";
}

/// Stack-format version detected on a deployed add-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackFormat {
    /// Deployed by the legacy backend.
    Legacy,
    /// Deployed by the current backend.
    Current,
}

impl StackFormat {
    /// Parses a stack-format version label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            versions::LEGACY => Some(StackFormat::Legacy),
            versions::CURRENT => Some(StackFormat::Current),
            _ => None,
        }
    }

    /// Returns the label value for this format.
    pub fn as_str(&self) -> &'static str {
        match self {
            StackFormat::Legacy => versions::LEGACY,
            StackFormat::Current => versions::CURRENT,
        }
    }
}

/// Labels applied to every object created for a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackLabels {
    /// Product version string.
    pub product_version: String,
    /// Stack-format version string.
    pub stack_version: String,
}

impl StackLabels {
    /// Labels for a stack created by the current backend.
    pub fn current(product_version: impl Into<String>) -> Self {
        Self {
            product_version: product_version.into(),
            stack_version: versions::CURRENT.to_string(),
        }
    }

    /// Returns the labels as a key/value map.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                PRODUCT_VERSION_LABEL.to_string(),
                self.product_version.clone(),
            ),
            (STACK_VERSION_LABEL.to_string(), self.stack_version.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_format_from_label() {
        assert_eq!(StackFormat::from_label("1"), Some(StackFormat::Legacy));
        assert_eq!(StackFormat::from_label("2"), Some(StackFormat::Current));
        assert_eq!(StackFormat::from_label("v3"), None);
        assert_eq!(StackFormat::Current.as_str(), versions::CURRENT);
    }

    #[test]
    fn test_current_labels() {
        let labels = StackLabels::current("1.4.0");
        let map = labels.to_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map[PRODUCT_VERSION_LABEL], "1.4.0");
        assert_eq!(map[STACK_VERSION_LABEL], versions::CURRENT);
    }
}
