//! Per-recipient message personalization
//!
//! Recipients see the literal output, so the layout is fixed:
//! `"{salutation} {name},\n\n{plain body}"` where `name` is the recipient's
//! custom name (or empty) and the body has every markup tag removed.

use crate::types::{MessageTemplate, Recipient};
use regex::Regex;
use std::sync::OnceLock;

fn markup_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("static markup pattern"))
}

/// Remove all markup tags, keeping the text between them
pub fn strip_markup(body: &str) -> String {
    markup_pattern().replace_all(body, "").into_owned()
}

/// Whether the template has no message content once markup is removed
pub fn is_blank(template: &MessageTemplate) -> bool {
    strip_markup(&template.raw_body).trim().is_empty()
}

/// Render the final message body for one recipient
pub fn personalize(template: &MessageTemplate, recipient: &Recipient) -> String {
    let name = if template.use_custom_name {
        recipient.custom_name.as_deref().unwrap_or_default()
    } else {
        ""
    };

    format!(
        "{} {},\n\n{}",
        template.salutation,
        name,
        strip_markup(&template.raw_body)
    )
}
