use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagInfo {
    pub id: String,
    pub name: String,
    pub unread: u32,
    pub pinned: u32,
}

/// Normalize a user tag name into its flag form: lowercase, spaces
/// collapsed to dashes. Built-in tags (leading `#`) and system flags
/// (leading `\`) pass through unchanged.
pub fn tag_id(name: &str) -> String {
    if name.starts_with('#') || name.starts_with('\\') {
        return name.to_string();
    }
    let mut id = String::with_capacity(name.len());
    for part in name.split_whitespace() {
        if !id.is_empty() {
            id.push('-');
        }
        id.push_str(&part.to_lowercase());
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_id_normalizes_user_names() {
        assert_eq!(tag_id("Invoices"), "invoices");
        assert_eq!(tag_id("Mailing  Lists"), "mailing-lists");
    }

    #[test]
    fn tag_id_keeps_builtin_and_system_forms() {
        assert_eq!(tag_id("#inbox"), "#inbox");
        assert_eq!(tag_id("\\Flagged"), "\\Flagged");
    }
}
