//! LaTeX tabular parsing and fixed-width text rendering

use regex::Regex;
use std::sync::OnceLock;

use super::encoder::TextEncoder;
use crate::error::{Error, Result};

fn tabular_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\\begin\{tabular\}\{([^}]*)\}(.*?)\\end\{tabular\}")
            .expect("valid tabular pattern")
    })
}

fn multicolumn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\\multicolumn\{(\d+)\}\{.*\}\{(.*)\}").expect("valid multicolumn pattern")
    })
}

fn multirow_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\\multirow\{(\d+)\}\{.*\}\{(.*)\}").expect("valid multirow pattern")
    })
}

fn caption_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\caption\{([^}]*)\}").expect("valid caption pattern"))
}

/// Column alignment inferred from the tabular spec
#[derive(Debug, Clone, Copy, PartialEq)]
enum Align {
    Left,
    Center,
    Right,
}

/// Parse a LaTeX table and render it as a fixed-width text table.
///
/// `\multicolumn{N}{..}{content}` expands to N duplicate cells and
/// `\multirow{N}{..}{content}` propagates its content down the column for the
/// following N-1 rows. A `\caption{...}` found anywhere in the source is
/// appended as a trailing caption line. Fails (so the caller can fall back to
/// raw source) when no tabular body is present.
pub fn parse_table(encoder: &TextEncoder, latex_src: &str) -> Result<String> {
    let captures = tabular_re()
        .captures(latex_src)
        .ok_or_else(|| Error::internal("No table content found"))?;
    let col_spec = captures.get(1).map_or("", |m| m.as_str());
    let body = captures.get(2).map_or("", |m| m.as_str()).trim();

    // Rows split on \\ breaks, columns on unescaped & separators
    let rows: Vec<&str> = body.split("\\\\").collect();
    let mut data: Vec<Vec<String>> = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let split_cols = split_unescaped(row, '&');
        if split_cols.len() == 1 && i == rows.len() - 1 {
            // Trailing fragment after the final row break
            continue;
        }

        let mut cols = Vec::new();
        for col in split_cols {
            match multicolumn_re().captures(&col) {
                Some(m) => {
                    let n: usize = m[1].parse().unwrap_or(1);
                    let content = m[2].to_string();
                    cols.extend(vec![content; n]);
                }
                None => cols.push(col),
            }
        }
        data.push(cols);
    }

    if data.is_empty() {
        return Err(Error::internal("Table has no rows"));
    }

    // Expand multirow cells downward, then clean and encode every cell
    for i in 0..data.len() {
        for j in 0..data[i].len() {
            if let Some(m) = multirow_re().captures(&data[i][j]) {
                let n: usize = m[1].parse().unwrap_or(1);
                let content = m[2].to_string();
                for k in 0..n {
                    if let Some(row) = data.get_mut(i + k) {
                        if let Some(cell) = row.get_mut(j) {
                            *cell = content.clone();
                        }
                    }
                }
            }
            let encoded = encoder.clean(&encoder.encode(&data[i][j]));
            data[i][j] = encoded.replace('\n', " ");
        }
    }

    let num_cols = data[0].len();
    let alignment = infer_alignment(col_spec, num_cols);
    let mut output = render(&data, &alignment);

    output.push_str("\nTable");
    if let Some(caption) = caption_re().captures(latex_src) {
        output.push_str(": ");
        output.push_str(&caption[1]);
    }

    Ok(output)
}

/// Split on a separator character unless it is backslash-escaped
fn split_unescaped(s: &str, sep: char) -> Vec<String> {
    let mut parts = vec![String::new()];
    let mut prev_backslash = false;
    for c in s.chars() {
        if c == sep && !prev_backslash {
            parts.push(String::new());
        } else {
            parts.last_mut().expect("non-empty parts").push(c);
        }
        prev_backslash = c == '\\' && !prev_backslash;
    }
    parts
}

/// Alignment letters from the column spec; centered throughout when the
/// letter count does not match the actual column count.
fn infer_alignment(col_spec: &str, num_cols: usize) -> Vec<Align> {
    let parsed: Vec<Align> = col_spec
        .chars()
        .filter_map(|c| match c {
            'l' => Some(Align::Left),
            'c' => Some(Align::Center),
            'r' => Some(Align::Right),
            _ => None,
        })
        .collect();

    if parsed.len() == num_cols {
        parsed
    } else {
        vec![Align::Center; num_cols]
    }
}

/// Render rows as fixed-width text with a separator under the header row
fn render(data: &[Vec<String>], alignment: &[Align]) -> String {
    let num_cols = alignment.len();
    let mut widths = vec![0usize; num_cols];
    for row in data {
        for (j, cell) in row.iter().enumerate().take(num_cols) {
            widths[j] = widths[j].max(cell.chars().count());
        }
    }

    let mut lines = Vec::with_capacity(data.len() + 1);
    for (i, row) in data.iter().enumerate() {
        let cells: Vec<String> = (0..num_cols)
            .map(|j| {
                let cell = row.get(j).map(String::as_str).unwrap_or("");
                pad(cell, widths[j], alignment[j])
            })
            .collect();
        lines.push(cells.join("  ").trim_end().to_string());

        if i == 0 && data.len() > 1 {
            let rule: Vec<String> = widths.iter().map(|w| "=".repeat(*w)).collect();
            lines.push(rule.join("  "));
        }
    }
    lines.join("\n")
}

fn pad(cell: &str, width: usize, align: Align) -> String {
    let len = cell.chars().count();
    let total = width.saturating_sub(len);
    match align {
        Align::Left => format!("{}{}", cell, " ".repeat(total)),
        Align::Right => format!("{}{}", " ".repeat(total), cell),
        Align::Center => {
            let left = total / 2;
            format!("{}{}{}", " ".repeat(left), cell, " ".repeat(total - left))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> TextEncoder {
        TextEncoder::default()
    }

    #[test]
    fn test_multicolumn_duplicates_cells() {
        let src = "\\begin{table}\\begin{tabular}{cc}\n\
                   \\multicolumn{2}{c}{Results} \\\\\n\
                   a & b \\\\\n\
                   \\end{tabular}\\end{table}";
        let table = parse_table(&encoder(), src).unwrap();
        let first_line = table.lines().next().unwrap();
        assert_eq!(first_line.matches("Results").count(), 2);
    }

    #[test]
    fn test_multirow_propagates_down() {
        let src = "\\begin{tabular}{ll}\n\
                   \\multirow{2}{*}{span} & x \\\\\n\
                   & y \\\\\n\
                   \\end{tabular}";
        let table = parse_table(&encoder(), src).unwrap();
        assert_eq!(table.matches("span").count(), 2);
    }

    #[test]
    fn test_alignment_fallback_on_mismatch() {
        // Three columns of data but only two alignment letters
        let src = "\\begin{tabular}{lc}\na & b & c \\\\\nd & e & f \\\\\n\\end{tabular}";
        let table = parse_table(&encoder(), src).unwrap();
        assert!(table.contains('a'));
        assert!(table.contains('f'));
    }

    #[test]
    fn test_caption_appended() {
        let src = "\\begin{table}\\caption{Measured results}\\begin{tabular}{ll}\n\
                   a & b \\\\\nc & d \\\\\n\\end{tabular}\\end{table}";
        let table = parse_table(&encoder(), src).unwrap();
        assert!(table.ends_with("Table: Measured results"));
    }

    #[test]
    fn test_missing_tabular_fails() {
        assert!(parse_table(&encoder(), "no table here").is_err());
    }

    #[test]
    fn test_header_separator() {
        let src = "\\begin{tabular}{ll}\nh1 & h2 \\\\\nv1 & v2 \\\\\n\\end{tabular}";
        let table = parse_table(&encoder(), src).unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[1].contains("=="));
    }
}
