//! Parser for one page of the results site.
//!
//! The results table is an ASP.NET grid (`table#resultsTable`) whose paging
//! is driven by postback: the "Next >" link submits the page's whole form
//! back to the server. Everything the crawler needs from a page is extracted
//! here in one pass, so no parsed DOM is held across an `.await`.

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::db::models::RaceResult;
use crate::services::parsing::{parse_chip_time, resolve_race_date};

/// Minimum number of cells in a data row.
pub const MIN_ROW_CELLS: usize = 13;

/// Link text of the pager's "next page" anchor.
pub const NEXT_LINK_TEXT: &str = "Next >";

/// Postback event fired by the pager's "next page" anchor.
pub const NEXT_EVENT_TARGET: &str = "ctl00$ContentPlaceHolder1$btnNext";

struct Selectors {
    table_rows: Selector,
    cells: Selector,
    anchors: Selector,
    inputs: Selector,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| Selectors {
        table_rows: Selector::parse("table#resultsTable tr").expect("valid row selector"),
        cells: Selector::parse("td").expect("valid cell selector"),
        anchors: Selector::parse("a").expect("valid anchor selector"),
        inputs: Selector::parse("input[name]").expect("valid input selector"),
    })
}

/// The complete server-assigned form state of a page, resubmitted verbatim to
/// page forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostbackForm {
    fields: BTreeMap<String, String>,
}

impl PostbackForm {
    /// Collect every named `<input>` on the page. Inputs without a `value`
    /// submit an empty string; a repeated name keeps the last value.
    fn from_document(document: &Html) -> Self {
        let fields = document
            .select(&selectors().inputs)
            .filter_map(|input| {
                let name = input.value().attr("name")?;
                let value = input.value().attr("value").unwrap_or_default();
                Some((name.to_string(), value.to_string()))
            })
            .collect();
        Self { fields }
    }

    /// The form with the postback event fields set for `event_target`.
    pub fn with_event(mut self, event_target: &str, event_argument: &str) -> Self {
        self.fields
            .insert("__EVENTTARGET".to_string(), event_target.to_string());
        self.fields
            .insert("__EVENTARGUMENT".to_string(), event_argument.to_string());
        self
    }

    /// The form that advances the pager by one page.
    pub fn next_page(self) -> Self {
        self.with_event(NEXT_EVENT_TARGET, "")
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

/// Everything extracted from one results page.
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub rows: Vec<RaceResult>,
    /// Form state for the next page, present only when the page links to one.
    pub next_page: Option<PostbackForm>,
}

/// Parse a results page fetched for `year`. Rows carry no race date; the
/// crawler stamps the one resolved from the landing page.
pub fn parse_page(html: &str, year: i32) -> ParsedPage {
    let document = Html::parse_document(html);
    let rows = parse_results_table(&document, year);
    let next_page = has_next_link(&document).then(|| PostbackForm::from_document(&document));
    ParsedPage { rows, next_page }
}

/// Resolve the race date from the visible text of a page.
pub fn race_date_from_html(html: &str) -> Option<NaiveDate> {
    let document = Html::parse_document(html);
    let text: String = document.root_element().text().collect();
    resolve_race_date(&text)
}

fn parse_results_table(document: &Html, year: i32) -> Vec<RaceResult> {
    let mut rows = document.select(&selectors().table_rows).peekable();
    if rows.peek().is_none() {
        tracing::warn!(year, "Results table not found");
        return Vec::new();
    }

    // First row is the header.
    rows.skip(1)
        .enumerate()
        .filter_map(|(index, row)| parse_row(row, year, index))
        .collect()
}

fn parse_row(row: ElementRef<'_>, year: i32, index: usize) -> Option<RaceResult> {
    let cells: Vec<String> = row
        .select(&selectors().cells)
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .collect();

    if cells.len() < MIN_ROW_CELLS {
        tracing::warn!(
            year,
            row = index,
            cells = cells.len(),
            "Skipping short results row"
        );
        return None;
    }

    let chip_time_text = cells[9].clone();
    Some(RaceResult {
        year,
        race_date: None,
        place: parse_numeric_cell(&cells[0]),
        name: cells[1].clone(),
        team: cells[2].clone(),
        city_state: cells[3].clone(),
        gender: cells[4].clone(),
        gender_place: cells[5].clone(),
        age: parse_numeric_cell(&cells[6]),
        age_place: cells[7].clone(),
        chip_time_seconds: parse_chip_time(&chip_time_text),
        chip_time_text,
        pace: cells[10].clone(),
        start_time: cells[12].clone(),
    })
}

/// An integer only when the cell is purely ASCII digits.
fn parse_numeric_cell(cell: &str) -> Option<i32> {
    if cell.is_empty() || !cell.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    cell.parse().ok()
}

fn has_next_link(document: &Html) -> bool {
    document
        .select(&selectors().anchors)
        .any(|a| a.text().collect::<String>().trim() == NEXT_LINK_TEXT)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a results page with the given data rows, optional pager link and
    /// a `__VIEWSTATE` marker.
    pub(crate) fn results_page_html(
        rows: &[[&str; 13]],
        with_next: bool,
        viewstate: &str,
    ) -> String {
        let body_rows: String = rows
            .iter()
            .map(|cells| {
                let tds: String = cells.iter().map(|c| format!("<td>{}</td>", c)).collect();
                format!("<tr>{}</tr>", tds)
            })
            .collect();
        let pager = if with_next {
            r#"<a href="javascript:__doPostBack('ctl00$ContentPlaceHolder1$btnNext','')">Next &gt;</a>"#
        } else {
            ""
        };
        format!(
            r#"<html><body>
<h1>Mount Diablo Challenge</h1><p>Sunday, October 6, 2024</p>
<form method="post" id="form1">
<input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="{viewstate}" />
<input type="hidden" name="__EVENTVALIDATION" value="ev-{viewstate}" />
<input type="hidden" name="__EVENTTARGET" value="" />
<input type="text" name="ctl00$ContentPlaceHolder1$txtSearch" />
<table id="resultsTable">
<tr><th>Place</th><th>Name</th><th>Team</th><th>City</th><th>Gender</th><th>G Place</th><th>Age</th><th>A Place</th><th>Bib</th><th>Chip</th><th>Pace</th><th>Gun</th><th>Start</th></tr>
{body_rows}
</table>
{pager}
</form></body></html>"#
        )
    }

    pub(crate) fn row<'a>(place: &'a str, name: &'a str, chip: &'a str) -> [&'a str; 13] {
        [
            place,
            name,
            "Diablo Cyclists",
            "Danville, CA",
            "F",
            "1",
            "42",
            "1 / 12",
            "101",
            chip,
            "9.8 mph",
            "1:10:00.0",
            "7:30:00 AM",
        ]
    }

    #[test]
    fn test_parse_rows_maps_columns() {
        let html = results_page_html(
            &[row("1", "Ada Climber", "1:02:03.5"), row("2", "Bo Spinner", "58:10")],
            false,
            "vs1",
        );
        let page = parse_page(&html, 2024);

        assert_eq!(page.rows.len(), 2);
        let first = &page.rows[0];
        assert_eq!(first.year, 2024);
        assert_eq!(first.place, Some(1));
        assert_eq!(first.name, "Ada Climber");
        assert_eq!(first.team, "Diablo Cyclists");
        assert_eq!(first.city_state, "Danville, CA");
        assert_eq!(first.gender, "F");
        assert_eq!(first.gender_place, "1");
        assert_eq!(first.age, Some(42));
        assert_eq!(first.age_place, "1 / 12");
        assert_eq!(first.chip_time_text, "1:02:03.5");
        assert_eq!(first.chip_time_seconds, Some(3723.5));
        assert_eq!(first.pace, "9.8 mph");
        assert_eq!(first.start_time, "7:30:00 AM");
        assert_eq!(first.race_date, None);
        assert_eq!(page.rows[1].chip_time_seconds, Some(3490.0));
    }

    #[test]
    fn test_non_numeric_place_and_age_are_null() {
        let mut cells = row("DNF", "Cy Coaster", "");
        cells[6] = "";
        let html = results_page_html(&[cells], false, "vs");
        let page = parse_page(&html, 2023);

        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].place, None);
        assert_eq!(page.rows[0].age, None);
        assert_eq!(page.rows[0].chip_time_seconds, None);
    }

    #[test]
    fn test_short_row_skipped_without_stopping() {
        let html = results_page_html(&[row("1", "Ada", "1:00:00")], false, "vs")
            .replace("</table>", "<tr><td>2</td><td>Short</td></tr></table>")
            .replace(
                "</table>",
                "<tr><td>3</td><td>Cy</td><td></td><td></td><td>M</td><td>2</td><td>50</td><td>1 / 3</td><td></td><td>bad</td><td></td><td></td><td>7:31 AM</td></tr></table>",
            );
        let page = parse_page(&html, 2024);

        let names: Vec<&str> = page.rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "Cy"]);
        assert_eq!(page.rows[1].chip_time_seconds, None);
    }

    #[test]
    fn test_missing_table_yields_no_rows() {
        let page = parse_page("<html><body><p>No results</p></body></html>", 2024);
        assert!(page.rows.is_empty());
        assert!(page.next_page.is_none());
    }

    #[test]
    fn test_header_only_table_yields_no_rows() {
        let html = results_page_html(&[], true, "vs");
        let page = parse_page(&html, 2024);
        assert!(page.rows.is_empty());
    }

    #[test]
    fn test_next_link_collects_full_form_state() {
        let html = results_page_html(&[row("1", "Ada", "1:00:00")], true, "page-1-state");
        let form = parse_page(&html, 2024).next_page.expect("next page form");

        assert_eq!(form.get("__VIEWSTATE"), Some("page-1-state"));
        assert_eq!(form.get("__EVENTVALIDATION"), Some("ev-page-1-state"));
        assert_eq!(form.get("ctl00$ContentPlaceHolder1$txtSearch"), Some(""));

        let form = form.next_page();
        assert_eq!(form.get("__EVENTTARGET"), Some(NEXT_EVENT_TARGET));
        assert_eq!(form.get("__EVENTARGUMENT"), Some(""));
        assert_eq!(form.get("__VIEWSTATE"), Some("page-1-state"));
        assert_eq!(form.field_count(), 5);
    }

    #[test]
    fn test_no_next_link() {
        let html = results_page_html(&[row("1", "Ada", "1:00:00")], false, "vs");
        assert!(parse_page(&html, 2024).next_page.is_none());

        let prev_only = html.replace("</form>", r##"<a href="#">&lt; Prev</a></form>"##);
        assert!(parse_page(&prev_only, 2024).next_page.is_none());
    }

    #[test]
    fn test_race_date_from_html() {
        let html = results_page_html(&[], false, "vs");
        assert_eq!(
            race_date_from_html(&html),
            NaiveDate::from_ymd_opt(2024, 10, 6)
        );
        assert_eq!(race_date_from_html("<p>TBD</p>"), None);
    }
}
