//! Numeric aggregation over tabular content (CSV bytes, PDF pages, DOM
//! tables) plus free-text number inference.
//!
//! Everything here degrades to "no candidate" on malformed input; parse
//! failures never escape to the pipeline.

use quizpipe_core::{Error, Result};
use regex::Regex;

/// The column a sum was taken from, for the diagnostic trace.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSum {
    pub column: String,
    pub sum: f64,
}

/// Parse one numeric field. Tolerates thousands-separator commas and an
/// en-dash standing in for a minus sign.
pub fn parse_number(s: &str) -> Option<f64> {
    let cleaned = s.trim().replace(',', "").replace('\u{2013}', "-");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// Column selection + sum shared by the CSV path and the DOM-table path.
///
/// Order: a column literally named "value" (case-insensitive) → the first
/// column whose non-empty fields are all numeric → coerce the first column,
/// dropping non-numeric entries. Absent when nothing parses.
pub fn sum_selected_column(headers: &[String], rows: &[Vec<String>]) -> Option<ColumnSum> {
    if headers.is_empty() {
        return None;
    }

    let column =
        |idx: usize| -> Vec<&str> { rows.iter().filter_map(|r| r.get(idx)).map(|s| s.as_str()).collect() };

    let mut pick = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("value"));

    if pick.is_none() {
        pick = (0..headers.len()).find(|&idx| {
            let vals: Vec<&str> = column(idx).into_iter().filter(|v| !v.trim().is_empty()).collect();
            !vals.is_empty() && vals.iter().all(|v| parse_number(v).is_some())
        });
    }

    // Last resort: coerce the first column, dropping what doesn't parse.
    let idx = pick.unwrap_or(0);

    let parsed: Vec<f64> = column(idx)
        .into_iter()
        .filter_map(parse_number)
        .collect();
    if parsed.is_empty() {
        return None;
    }
    Some(ColumnSum {
        column: headers[idx].trim().to_string(),
        sum: parsed.iter().sum(),
    })
}

/// Sum a CSV document per the column-selection rule. Malformed bytes → None.
pub fn csv_sum(bytes: &[u8]) -> Option<ColumnSum> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let headers: Vec<String> = rdr.headers().ok()?.iter().map(str::to_string).collect();
    let mut rows: Vec<Vec<String>> = Vec::new();
    for rec in rdr.records() {
        // Skip unreadable records instead of abandoning the whole document.
        let Ok(rec) = rec else { continue };
        rows.push(rec.iter().map(str::to_string).collect());
    }
    if rows.is_empty() {
        return None;
    }
    sum_selected_column(&headers, &rows)
}

/// All digit-like substrings of a text, as numbers, in order of appearance.
pub fn numbers_in_text(text: &str) -> Vec<f64> {
    let Ok(re) = Regex::new(r"[-+]?\d{1,3}(?:,\d{3})*(?:\.\d+)?|\d+\.\d+|\d+") else {
        return Vec::new();
    };
    let normalized = text.replace('\u{2013}', "-");
    re.find_iter(&normalized)
        .filter_map(|m| parse_number(m.as_str()))
        .collect()
}

/// Locate a likely answer in free text.
///
/// If the surrounding text carries a sum-like clue, prefer the largest
/// number (most likely a grand total); otherwise the first one.
pub fn number_from_text(text: &str) -> Option<f64> {
    let nums = numbers_in_text(text);
    if nums.is_empty() {
        return None;
    }
    let Ok(clue) = Regex::new(r"(?i)\b(sum|total|subtotal|aggregate|answer)\b") else {
        return nums.first().copied();
    };
    if clue.is_match(text) {
        nums.into_iter().fold(None, |acc: Option<f64>, x| {
            Some(acc.map_or(x, |a| a.max(x)))
        })
    } else {
        nums.first().copied()
    }
}

/// Per-page text of a PDF document (index 0 = page 1).
pub fn pdf_pages_text(bytes: &[u8]) -> Result<Vec<String>> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| Error::Parse(e.to_string()))
}

/// Text of the requested 1-based pages, joined. Out-of-range pages are
/// silently skipped (matching lenient page-range handling upstream).
pub fn pdf_page_text(bytes: &[u8], pages: &[usize]) -> Result<String> {
    let all = pdf_pages_text(bytes)?;
    let mut parts = Vec::new();
    for &p in pages {
        if p >= 1 {
            if let Some(t) = all.get(p - 1) {
                parts.push(t.clone());
            }
        }
    }
    Ok(parts.join("\n"))
}

/// Candidate sums for one page of extracted PDF text.
///
/// Two independent sources: table-ish line groups (runs of lines with at
/// least two numeric tokens; each group contributes the sum of its lines'
/// last tokens) and the flat sum of every number in the page text.
pub fn page_candidate_sums(text: &str) -> Vec<f64> {
    let mut candidates = Vec::new();

    let mut group: Vec<f64> = Vec::new();
    for line in text.lines() {
        let nums = numbers_in_text(line);
        if nums.len() >= 2 {
            if let Some(last) = nums.last() {
                group.push(*last);
            }
            continue;
        }
        if group.len() >= 2 {
            candidates.push(group.iter().sum());
        }
        group.clear();
    }
    if group.len() >= 2 {
        candidates.push(group.iter().sum());
    }

    let all = numbers_in_text(text);
    if !all.is_empty() {
        candidates.push(all.iter().sum());
    }

    candidates
}

/// Reduce a PDF (restricted to 1-based `pages`) to a single sum: the maximum
/// of every candidate produced by every page. Deliberately crude — several
/// total-looking numbers may appear and the largest is taken as the grand
/// total. Absent when no page yields a numeric candidate.
pub fn pdf_sum(bytes: &[u8], pages: &[usize]) -> Option<f64> {
    let all = pdf_pages_text(bytes).ok()?;
    let mut candidates = Vec::new();
    for &p in pages {
        if p < 1 {
            continue;
        }
        if let Some(text) = all.get(p - 1) {
            candidates.extend(page_candidate_sums(text));
        }
    }
    candidates
        .into_iter()
        .fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.max(x))))
}
