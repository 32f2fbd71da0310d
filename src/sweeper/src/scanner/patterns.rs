use common::model::MediaId;
use common::store::Matcher;
use regex::Regex;

/// Markup that embeds a media ID in post bodies: the editor image class,
/// the attachment class, block JSON, data attributes and gallery id lists.
/// Each alternative is literal-escaped and bounded so `12` never matches
/// inside `120`.
pub fn content_markup_pattern(id: MediaId) -> Result<Regex, regex::Error> {
    let id = id.to_string();
    let bounded = |literal: String| format!("{}(?:[^0-9]|$)", regex::escape(&literal));

    let alternatives = [
        bounded(format!("wp-image-{id}")),
        bounded(format!("attachment_{id}")),
        bounded(format!("\"id\":{id}")),
        regex::escape(&format!("data-id=\"{id}\"")),
        format!(r#"{}[^"]*\b{id}\b"#, regex::escape("ids=\"")),
    ];

    Regex::new(&alternatives.join("|"))
}

pub fn content_markup_matcher(id: MediaId) -> Result<Matcher, regex::Error> {
    Ok(Matcher::Pattern {
        needle: id.to_string(),
        pattern: content_markup_pattern(id)?,
    })
}
