use crate::config::ProductionConfig;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Immutable snapshot of the production run taken at capture time.
///
/// Embedded into every captured image so destination folders stay
/// deterministic even if the live configuration changes mid-run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionInfo {
    pub model_id: String,
    pub order_id: String,
    pub client_name: String,
    pub color_tag: String,
    pub operator_name: String,
}

impl From<&ProductionConfig> for ProductionInfo {
    fn from(cfg: &ProductionConfig) -> Self {
        Self {
            model_id: cfg.model_id.clone(),
            order_id: cfg.order_id.clone(),
            client_name: cfg.client_name.clone(),
            color_tag: cfg.color_tag.clone(),
            operator_name: cfg.operator_name.clone(),
        }
    }
}

impl ProductionInfo {
    /// Destination folder for this run: `clientName/orderId/modelId`,
    /// each segment normalized for use as a path component.
    pub fn folder_path(&self) -> String {
        format!(
            "{}/{}/{}",
            normalize_component(&self.client_name),
            normalize_component(&self.order_id),
            normalize_component(&self.model_id)
        )
    }

    /// Full destination path for one upload, with a timestamped filename.
    pub fn remote_path(&self) -> String {
        let filename = format!("{}.jpg", Utc::now().timestamp_millis());
        format!("{}/{}", self.folder_path(), filename)
    }

    /// Free-text metadata line stored alongside the image.
    pub fn metadata_line(&self) -> String {
        format!(
            "model={} order={} client={} color={} operator={}",
            self.model_id, self.order_id, self.client_name, self.color_tag, self.operator_name
        )
    }
}

/// Normalize a value into a safe path component: lowercase, non-alphanumeric
/// runs collapsed to a single `_`, trimmed at the edges. Empty input maps to
/// the sentinel `sin_especificar`.
pub fn normalize_component(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_sep = false;

    for c in text.trim().chars() {
        let lower = c.to_ascii_lowercase();
        if lower.is_ascii_lowercase() || lower.is_ascii_digit() {
            out.push(lower);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "sin_especificar".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_and_replaces() {
        assert_eq!(normalize_component("Acme Corp"), "acme_corp");
        assert_eq!(normalize_component("Order-2024/08"), "order_2024_08");
    }

    #[test]
    fn test_normalize_collapses_repeats_and_trims() {
        assert_eq!(normalize_component("  --model--X--  "), "model_x");
        assert_eq!(normalize_component("a!!!b"), "a_b");
    }

    #[test]
    fn test_normalize_empty_uses_sentinel() {
        assert_eq!(normalize_component(""), "sin_especificar");
        assert_eq!(normalize_component("***"), "sin_especificar");
    }

    #[test]
    fn test_folder_path_layout() {
        let info = ProductionInfo {
            model_id: "T-Shirt 42".to_string(),
            order_id: "ORD 001".to_string(),
            client_name: "Acme".to_string(),
            color_tag: "red".to_string(),
            operator_name: "op".to_string(),
        };
        assert_eq!(info.folder_path(), "acme/ord_001/t_shirt_42");
    }

    #[test]
    fn test_remote_path_ends_with_jpg() {
        let info = ProductionInfo::default();
        let path = info.remote_path();
        assert!(path.starts_with("sin_especificar/sin_especificar/sin_especificar/"));
        assert!(path.ends_with(".jpg"));
    }
}
