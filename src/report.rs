//! Summary assembly: injury records → markdown table.
//!
//! Pure and deterministic. Records are sorted by `date_of_visit` descending;
//! because dates are normalised to `YYYY-MM-DD`, plain string order is date
//! order. The sort is stable, so records sharing a date keep batch order.

use crate::output::InjuryRecord;

/// File name of the cross-document summary table.
pub const SUMMARY_FILE_NAME: &str = "summary_of_injuries.md";

const TABLE_HEADER: &str = "| Date of Visit | Diagnosis | ICD-10 Code | Reference |";
const TABLE_DIVIDER: &str = "|---|---|---|---|";

/// Sort records newest first.
pub fn sort_records(records: &mut [InjuryRecord]) {
    records.sort_by(|a, b| b.date_of_visit.cmp(&a.date_of_visit));
}

/// Render the summary table, sorting a copy of `records` first.
///
/// An empty input still produces the header and divider rows.
pub fn render_summary_table(records: &[InjuryRecord]) -> String {
    let mut sorted = records.to_vec();
    sort_records(&mut sorted);

    let mut out = String::with_capacity(64 * (sorted.len() + 2));
    out.push_str(TABLE_HEADER);
    out.push('\n');
    out.push_str(TABLE_DIVIDER);
    out.push('\n');
    for r in &sorted {
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            cell(&r.date_of_visit),
            cell(&r.diagnosis),
            cell(&r.icd10_code),
            cell(&r.reference)
        ));
    }
    out
}

/// Escape pipes and fold line breaks so a value stays in one cell.
fn cell(value: &str) -> String {
    value
        .trim()
        .replace('|', "\\|")
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: &str, diagnosis: &str) -> InjuryRecord {
        InjuryRecord {
            date_of_visit: date.into(),
            diagnosis: diagnosis.into(),
            reference: format!("{diagnosis} - p. 1"),
            icd10_code: "R51".into(),
        }
    }

    #[test]
    fn rows_sorted_newest_first() {
        let table = render_summary_table(&[
            record("2023-01-10", "a"),
            record("2024-05-01", "b"),
            record("2022-12-31", "c"),
        ]);
        let dates: Vec<&str> = table
            .lines()
            .skip(2)
            .map(|l| l.split(" | ").next().unwrap().trim_start_matches("| "))
            .collect();
        assert_eq!(dates, vec!["2024-05-01", "2023-01-10", "2022-12-31"]);
    }

    #[test]
    fn header_present_when_empty() {
        let table = render_summary_table(&[]);
        assert_eq!(table.lines().next(), Some(TABLE_HEADER));
        assert_eq!(table.lines().count(), 2);
    }

    #[test]
    fn same_date_keeps_input_order() {
        let mut records = vec![record("2023-01-10", "first"), record("2023-01-10", "second")];
        sort_records(&mut records);
        assert_eq!(records[0].diagnosis, "first");
    }

    #[test]
    fn cells_are_escaped() {
        assert_eq!(cell("a | b\nc"), "a \\| b c");
    }
}
