//! First-table extraction from rendered HTML.
//!
//! The DOM-table heuristic only ever looks at the first `<table>` on the
//! page and applies the same column-selection rule as the CSV path.

use crate::tabular::{self, ColumnSum};

/// Header row + data rows of the first table, as trimmed cell text.
///
/// The header row is the first `<tr>`; `<th>` and `<td>` cells are treated
/// alike so header-less tables still produce something to coerce.
pub fn first_table_columns(html: &str) -> Option<(Vec<String>, Vec<Vec<String>>)> {
    let doc = html_scraper::Html::parse_document(html);
    let table_sel = html_scraper::Selector::parse("table").ok()?;
    let row_sel = html_scraper::Selector::parse("tr").ok()?;
    let cell_sel = html_scraper::Selector::parse("th, td").ok()?;

    let table = doc.select(&table_sel).next()?;
    let mut rows: Vec<Vec<String>> = Vec::new();
    for tr in table.select(&row_sel) {
        let cells: Vec<String> = tr
            .select(&cell_sel)
            .map(|c| {
                c.text()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        if !cells.is_empty() {
            rows.push(cells);
        }
    }
    if rows.is_empty() {
        return None;
    }
    let headers = rows.remove(0);
    Some((headers, rows))
}

/// Sum the first table per the shared column-selection rule.
pub fn first_table_sum(html: &str) -> Option<ColumnSum> {
    let (headers, rows) = first_table_columns(html)?;
    tabular::sum_selected_column(&headers, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_the_value_column_of_the_first_table() {
        let html = r#"
        <html><body>
          <table>
            <tr><th>label</th><th>value</th></tr>
            <tr><td>a</td><td>3</td></tr>
            <tr><td>b</td><td>4</td></tr>
          </table>
          <table><tr><th>value</th></tr><tr><td>999</td></tr></table>
        </body></html>"#;
        let sum = first_table_sum(html).unwrap();
        assert_eq!(sum.column, "value");
        assert_eq!(sum.sum, 7.0);
    }

    #[test]
    fn headerless_numeric_table_is_coerced() {
        let html = "<table><tr><td>5</td><td>x</td></tr><tr><td>6</td><td>y</td></tr></table>";
        // First row becomes the header; the remaining row coerces to 6.
        let sum = first_table_sum(html).unwrap();
        assert_eq!(sum.sum, 6.0);
    }

    #[test]
    fn page_without_tables_yields_nothing() {
        assert_eq!(first_table_columns("<html><body><p>hi</p></body></html>"), None);
        assert_eq!(first_table_sum("<table></table>"), None);
    }
}
