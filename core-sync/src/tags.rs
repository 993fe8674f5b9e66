//! Object tags attached to every uploaded artifact.
//!
//! Tag values are restricted to Latin and Cyrillic letters, digits, space and
//! `+ - = . : / @`. Anything else is replaced with `_`.

use crate::state::format_timestamp;
use bridge_traits::{ContentItem, ObjectTags};
use regex::Regex;
use std::sync::LazyLock;

pub const TAG_OWNER: &str = "owner";
pub const TAG_SOURCE_ID: &str = "source_id";
pub const TAG_CREATED_AT: &str = "created_at";
pub const TAG_UPDATED_AT: &str = "updated_at";
pub const TAG_DESCRIPTION: &str = "description";

pub const MAX_TAG_VALUE_CHARS: usize = 256;

const PLACEHOLDER: &str = "_";

static UNSAFE_TAG_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^а-яА-Яa-zA-Z0-9 +\-=.:/@]").expect("UNSAFE_TAG_CHARS is a valid regex pattern")
});

pub fn sanitize_tag_value(value: &str) -> String {
    UNSAFE_TAG_CHARS.replace_all(value, PLACEHOLDER).into_owned()
}

/// Truncates on a character boundary.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

pub fn build_tags(item: &ContentItem, owner_name: Option<&str>) -> ObjectTags {
    let description = item
        .description
        .as_deref()
        .map(|d| truncate_chars(&sanitize_tag_value(d), MAX_TAG_VALUE_CHARS))
        .unwrap_or_default();

    let mut tags = ObjectTags::new();
    tags.insert(
        TAG_OWNER.to_string(),
        sanitize_tag_value(owner_name.unwrap_or_default()),
    );
    tags.insert(TAG_SOURCE_ID.to_string(), sanitize_tag_value(&item.id));
    tags.insert(
        TAG_CREATED_AT.to_string(),
        sanitize_tag_value(&format_timestamp(&item.created_at)),
    );
    tags.insert(
        TAG_UPDATED_AT.to_string(),
        sanitize_tag_value(&format_timestamp(&item.updated_at)),
    );
    tags.insert(TAG_DESCRIPTION.to_string(), description);
    tags
}
