//! Submit-target discovery.
//!
//! Strict priority order: a `/submit` URL anywhere in the raw HTML, then a
//! JSON object inside a `<pre>` block whose top-level string values mention
//! `/submit`, then the same pattern against the visible text. First match
//! wins; the pipeline resolves the target exactly once per run.

use crate::payload;
use regex::Regex;

fn submit_url_pattern() -> Option<Regex> {
    Regex::new(r#"(?i)(https?://[^\s'"<>]+/submit[^\s'"<>]*)"#).ok()
}

pub fn find_submit_target(html: &str, visible_text: &str) -> Option<String> {
    let re = submit_url_pattern()?;

    if let Some(c) = re.captures(html) {
        return Some(c[1].to_string());
    }

    if let Some(url) = submit_target_in_pre_blocks(html) {
        return Some(url);
    }

    re.captures(visible_text).map(|c| c[1].to_string())
}

fn submit_target_in_pre_blocks(html: &str) -> Option<String> {
    let doc = html_scraper::Html::parse_document(html);
    let sel = html_scraper::Selector::parse("pre").ok()?;
    for pre in doc.select(&sel) {
        let text = pre.text().collect::<Vec<_>>().join("");
        let Some(serde_json::Value::Object(map)) = payload::parse_json_lenient(&text) else {
            continue;
        };
        for value in map.values() {
            if let Some(s) = value.as_str() {
                if s.contains("/submit") {
                    return Some(s.to_string());
                }
            }
        }
    }
    None
}
