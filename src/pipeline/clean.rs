//! Text cleaning: deterministic cleanup of extracted page text and of
//! vision-model descriptions.
//!
//! ## Why two entry points?
//!
//! Page text comes from pdfium's text layer and only needs whitespace and
//! invisible-character normalisation. Descriptions come from vision models
//! and carry model quirks as well: outer ```` ```markdown ```` fences despite
//! the prompt, table separator rows in the wrong place, invented image links.
//! Both share the same whitespace rules so the merged document is uniform.
//!
//! ## Rule Order
//!
//! Normalise line endings before trimming, and strip fences before the
//! table rules so table detection sees clean input.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean text extracted from a PDF page.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Replace `<br>` tags with a space
/// 4. Trim trailing whitespace per line
/// 5. Collapse 3+ consecutive newlines to one blank line
/// 6. Trim leading and trailing blank space
pub fn clean_page_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = replace_br_tags(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

/// Clean a description returned by a vision backend.
///
/// Everything [`clean_page_text`] does, plus:
/// - strip outer markdown fences
/// - insert a missing header separator in pipe tables
/// - drop separator rows in table bodies
/// - drop image links pointing at placeholder URLs, keeping their alt text
pub fn clean_description(input: &str) -> String {
    let s = strip_markdown_fences(&normalise_line_endings(input));
    let s = fix_broken_tables(&s);
    let s = remove_mid_table_separators(&s);
    let s = remove_hallucinated_images(&s);
    clean_page_text(&s)
}

// ── Outer markdown fences ────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").expect("valid regex"));

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Whitespace ───────────────────────────────────────────────────────────────

pub(crate) fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

pub(crate) fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

static RE_BR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));

fn replace_br_tags(input: &str) -> String {
    RE_BR.replace_all(input, " ").to_string()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Tables ───────────────────────────────────────────────────────────────────

/// Ensure a separator row follows the first row of every pipe table.
fn fix_broken_tables(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut result = Vec::with_capacity(lines.len() + 4);
    let mut prev_was_table = false;

    for (i, line) in lines.iter().enumerate() {
        result.push(line.to_string());
        let starts_table = is_table_row(line) && !is_separator_row(line) && !prev_was_table;
        if starts_table {
            let next = lines.get(i + 1).copied().unwrap_or("");
            if is_table_row(next) && !is_separator_row(next) {
                let col_count = line.matches('|').count().saturating_sub(1).max(1);
                let sep: String = std::iter::once("|")
                    .chain(std::iter::repeat_n(" --- |", col_count))
                    .collect();
                result.push(sep);
            }
        }
        prev_was_table = is_table_row(line);
    }

    result.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed
            .chars()
            .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

/// Keep only the separator in second position of each table block.
fn remove_mid_table_separators(input: &str) -> String {
    let mut result: Vec<&str> = Vec::new();
    let mut table_line_count = 0usize;

    for line in input.lines() {
        if is_table_row(line) {
            table_line_count += 1;
            if is_separator_row(line) && table_line_count != 2 {
                continue;
            }
        } else {
            table_line_count = 0;
        }
        result.push(line);
    }

    result.join("\n")
}

// ── Invented image links ─────────────────────────────────────────────────────

static RE_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").expect("valid regex"));

fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    if !u.starts_with("http://") && !u.starts_with("https://") {
        return true;
    }
    ["example.com", "placeholder.com", "dummyimage.com", "placehold.it"]
        .iter()
        .any(|d| u.contains(d))
}

fn remove_hallucinated_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if is_placeholder_url(&caps[2]) {
                if alt.is_empty() {
                    String::new()
                } else {
                    format!("*{alt}*")
                }
            } else {
                caps[0].to_string()
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_text_whitespace() {
        let input = "\u{FEFF}Gói SD70   \r\n\r\n\r\n\r\nGiá: 70.000đ<br/>/tháng  \n";
        assert_eq!(clean_page_text(input), "Gói SD70\n\nGiá: 70.000đ /tháng");
    }

    #[test]
    fn page_text_blank_is_empty() {
        assert_eq!(clean_page_text(" \n\t\n "), "");
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_markdown_fences("```markdown\n# Hello\nWorld\n```"), "# Hello\nWorld");
        assert_eq!(strip_markdown_fences("```\n# Hello\n```"), "# Hello");
        assert_eq!(strip_markdown_fences("# Hello"), "# Hello");
    }

    #[test]
    fn test_fix_broken_table() {
        let result = fix_broken_tables("| A | B |\n| 1 | 2 |\n| 3 | 4 |");
        let lines: Vec<&str> = result.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(is_separator_row(lines[1]));
        assert!(!is_separator_row(lines[3]));
    }

    #[test]
    fn test_table_with_separator_unchanged() {
        let input = "| A | B |\n| --- | --- |\n| 1 | 2 |";
        assert_eq!(fix_broken_tables(input), input);
    }

    #[test]
    fn test_remove_mid_table_separator() {
        let input = "| A | B |\n| --- | --- |\n| 1 | 2 |\n| --- | --- |\n| 3 | 4 |";
        let result = remove_mid_table_separators(input);
        assert_eq!(result.lines().filter(|l| is_separator_row(l)).count(), 1);
        assert!(result.contains("| 3 | 4 |"));
    }

    #[test]
    fn test_hallucinated_image() {
        assert_eq!(remove_hallucinated_images("![Chart](chart.png)"), "*Chart*");
        let real = "![Fig](https://cdn.viettel.vn/f.png)";
        assert_eq!(remove_hallucinated_images(real), real);
    }

    #[test]
    fn description_full_pipeline() {
        let input = "```markdown\n| Gói | Giá |\r\n| SD70 | 70.000 |\n\n\n\n![x](img.png)\n```";
        let out = clean_description(input);
        assert!(out.starts_with("| Gói | Giá |\n| --- | --- |\n| SD70 | 70.000 |"));
        assert!(out.ends_with("*x*"));
        assert!(!out.contains("```"));
    }
}
