//! Golden-set files: one product description and its expected HTS code per row
//!
//! The file is comma-separated with a header row. Fields may be double-quoted,
//! with `""` standing for a literal quote. Quoted fields cannot span lines.

use super::EvalError;
use serde::Serialize;
use std::path::Path;

const QUERY_COLUMNS: &[&str] = &["sku", "description", "query", "product"];
const NOTES_COLUMNS: &[&str] = &["notes", "details"];
const EXPECTED_COLUMNS: &[&str] = &["expected_code", "hts_code", "code"];

/// One labelled query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoldenCase {
    pub query: String,
    pub expected_code: String,
}

pub fn load_golden(path: &Path) -> Result<Vec<GoldenCase>, EvalError> {
    let content = std::fs::read_to_string(path).map_err(|source| EvalError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_golden(&content)
}

pub fn parse_golden(content: &str) -> Result<Vec<GoldenCase>, EvalError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header) = lines.next().ok_or(EvalError::EmptyGoldenSet)?;
    let header: Vec<String> = split_record(header)
        .into_iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let column = |names: &[&str]| header.iter().position(|h| names.contains(&h.as_str()));
    let query_col = column(QUERY_COLUMNS).ok_or(EvalError::MissingColumn("sku"))?;
    let expected_col = column(EXPECTED_COLUMNS).ok_or(EvalError::MissingColumn("expected_code"))?;
    let notes_col = column(NOTES_COLUMNS);

    let mut cases = Vec::new();
    for (idx, line) in lines {
        let fields = split_record(line);
        let field = |col: usize| fields.get(col).map(|f| f.trim()).unwrap_or("");

        let mut query = field(query_col).to_string();
        if let Some(notes) = notes_col.map(field).filter(|n| !n.is_empty()) {
            query.push(' ');
            query.push_str(notes);
        }
        let expected_code = field(expected_col).to_string();

        if query.trim().is_empty() {
            return Err(EvalError::MalformedRow {
                line: idx + 1,
                message: "empty description".to_string(),
            });
        }
        if !looks_like_code(&expected_code) {
            return Err(EvalError::MalformedRow {
                line: idx + 1,
                message: format!("'{}' is not an HTS code", expected_code),
            });
        }

        cases.push(GoldenCase {
            query,
            expected_code,
        });
    }

    if cases.is_empty() {
        return Err(EvalError::EmptyGoldenSet);
    }
    Ok(cases)
}

/// Golden files carry codes at any depth, from heading to statistical suffix
fn looks_like_code(code: &str) -> bool {
    code.chars().all(|c| c.is_ascii_digit() || c == '.')
        && code.chars().filter(char::is_ascii_digit).count() >= 4
}

fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}
