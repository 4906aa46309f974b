// CSV reading and writing for member import/export

use crate::error::{PledgeError, Result};
use crate::member::{Frequency, Member, MemberFields};

/// Header row of the import template and of exports.
pub const TEMPLATE_HEADER: &str = "Name,Phone,Email,Committed Amount,Frequency,Notes";

const TEMPLATE_EXAMPLE: &str = "Ahmed Ali,555-123-4567,ahmed@example.com,1200,Yearly,New neighbor";

/// Candidates read from a CSV file, plus per-row warnings for skipped rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCsv {
    pub candidates: Vec<MemberFields>,
    pub warnings: Vec<String>,
}

/// Split one line into trimmed cells.
///
/// A `"` toggles quoted mode, commas inside quotes are kept, and `""` inside
/// a quoted cell is a literal quote.
pub fn parse_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                cells.push(cell.trim().to_string());
                cell.clear();
            }
            _ => cell.push(c),
        }
    }
    cells.push(cell.trim().to_string());
    cells
}

/// Parse an amount cell: drop everything but digits and dots, then read the
/// leading number. Anything unreadable is 0.
pub fn parse_amount(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let mut seen_dot = false;
    let prefix: String = cleaned
        .chars()
        .take_while(|c| {
            if *c == '.' {
                if seen_dot {
                    return false;
                }
                seen_dot = true;
            }
            true
        })
        .collect();

    prefix.parse().unwrap_or(0.0)
}

/// Column positions found in the header row.
struct Columns {
    name: usize,
    phone: Option<usize>,
    email: Option<usize>,
    amount: Option<usize>,
    frequency: Option<usize>,
    notes: Option<usize>,
}

impl Columns {
    fn from_header(header: &str) -> Result<Self> {
        let headers: Vec<String> = parse_line(header)
            .into_iter()
            .map(|h| h.to_lowercase())
            .collect();
        let find = |key: &str| headers.iter().position(|h| h.contains(key));

        let name = find("name").ok_or_else(|| {
            PledgeError::Csv("\"Name\" column is required".into())
        })?;

        Ok(Columns {
            name,
            phone: find("phone"),
            email: find("email"),
            amount: find("amount"),
            frequency: find("frequency"),
            notes: find("note"),
        })
    }
}

fn cell(row: &[String], idx: Option<usize>) -> &str {
    idx.and_then(|i| row.get(i)).map(String::as_str).unwrap_or("")
}

/// Parse CSV text into member candidates.
///
/// A missing name column fails the whole parse. Rows without a name are
/// skipped with a warning; blank lines are ignored.
pub fn parse_members(text: &str) -> Result<ParsedCsv> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.lines();
    let columns = Columns::from_header(lines.next().unwrap_or(""))?;

    let mut parsed = ParsedCsv::default();
    for (i, line) in lines.enumerate() {
        // header is row 1
        let row_number = i + 2;
        if line.trim().is_empty() {
            continue;
        }
        let row = parse_line(line);

        let name = cell(&row, Some(columns.name));
        if name.is_empty() {
            parsed
                .warnings
                .push(format!("Row {row_number}: Name is missing. Skipped."));
            continue;
        }

        parsed.candidates.push(MemberFields {
            name: name.to_string(),
            phone: cell(&row, columns.phone).to_string(),
            email: cell(&row, columns.email).to_string(),
            committed_amount: parse_amount(cell(&row, columns.amount)),
            frequency: Frequency::from_loose(cell(&row, columns.frequency)),
            notes: cell(&row, columns.notes).to_string(),
        });
    }

    log::debug!(
        "Parsed {} CSV candidates ({} warnings)",
        parsed.candidates.len(),
        parsed.warnings.len()
    );
    Ok(parsed)
}

fn escape_field(value: &str) -> String {
    let flat = value.replace(['\r', '\n'], " ");
    if flat.contains(',') || flat.contains('"') {
        format!("\"{}\"", flat.replace('"', "\"\""))
    } else {
        flat
    }
}

/// The downloadable import template: header plus one example row.
pub fn template() -> String {
    format!("{TEMPLATE_HEADER}\n{TEMPLATE_EXAMPLE}\n")
}

/// Write members in template format. Line breaks inside fields become spaces.
pub fn export_members(members: &[Member]) -> String {
    let mut out = String::from(TEMPLATE_HEADER);
    out.push('\n');
    for m in members {
        let row = [
            escape_field(&m.name),
            escape_field(&m.phone),
            escape_field(&m.email),
            m.committed_amount.to_string(),
            m.frequency.to_string(),
            escape_field(&m.notes),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}
