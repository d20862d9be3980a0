use std::collections::BTreeMap;

/// Label applied to every resource derived from a SecuredAccess. The
/// per-kind watches select on this label, so foreign objects are never
/// delivered to the manager.
pub const SECURED_ACCESS_LABEL: &str = "internal.skupper.io/secured-access";

/// Annotation marking an object as written (and safe to delete) by this
/// controller.
pub const CONTROLLED_ANNOTATION: &str = "internal.skupper.io/controlled";

/// Selector matching all managed derived resources.
pub fn selector() -> String {
    format!("{SECURED_ACCESS_LABEL}=true")
}

pub fn controlled_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(SECURED_ACCESS_LABEL.to_string(), "true".to_string());
    labels
}

pub fn controlled_annotations() -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert(CONTROLLED_ANNOTATION.to_string(), "true".to_string());
    annotations
}
