use scraper::{Html, Selector};

use crate::errors::{DriverError, Result};
use crate::task::ExtractTarget;

pub fn parse_selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|_| DriverError::Selector(raw.to_string()))
}

/// Pull a value out of the first element matching `selector`, or `None`
/// when nothing matches (missing attributes on a matched element also
/// yield `None`).
pub fn extract(html: &str, selector: &str, target: &ExtractTarget) -> Result<Option<String>> {
    let document = Html::parse_document(html);
    let selector = parse_selector(selector)?;

    let element = match document.select(&selector).next() {
        Some(element) => element,
        None => return Ok(None),
    };

    let value = match target {
        ExtractTarget::Text => Some(normalize_whitespace(
            &element.text().collect::<Vec<_>>().join(" "),
        )),
        ExtractTarget::Html => Some(element.html()),
        ExtractTarget::Attribute(name) => element.value().attr(name).map(|v| v.to_string()),
    };

    Ok(value)
}

pub fn element_exists(html: &str, selector: &str) -> Result<bool> {
    let document = Html::parse_document(html);
    let selector = parse_selector(selector)?;
    Ok(document.select(&selector).next().is_some())
}

/// All text content of the document, whitespace-collapsed.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    normalize_whitespace(&document.root_element().text().collect::<Vec<_>>().join(" "))
}

pub fn text_matches(html: &str, pattern: &regex::Regex) -> bool {
    pattern.is_match(&visible_text(html))
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
