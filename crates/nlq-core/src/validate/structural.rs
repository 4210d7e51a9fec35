//! Hand-written SQL tokenizer and structural safety checks.
//!
//! A regex-only scan over raw SQL text is unsafe here: a denylisted word
//! sitting inside a string literal or a quoted identifier must not trip the
//! denylist, and a `$$...$$` dollar-quoted body must not be scanned as code
//! at all. The tokenizer below walks the input once, classifying each
//! character as belonging to a `Code`, `StringLiteral`, `QuotedIdent`,
//! `DollarQuoted`, `LineComment`, or `BlockComment` span.

use std::collections::{HashMap, HashSet};

use crate::config::StructuralConfig;
use crate::schema::packet::SchemaContextPacket;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Code(String),
    StringLiteral(String),
    QuotedIdent(String),
    DollarQuoted(String),
    LineComment(String),
    BlockComment(String),
}

/// Split `sql` into classified spans. Unterminated quotes/comments at end
/// of input are kept as their own span rather than panicking -- the
/// structural validator will reject them as malformed on its own.
pub fn tokenize(sql: &str) -> Vec<Span> {
    let chars: Vec<char> = sql.chars().collect();
    let mut spans = Vec::new();
    let mut i = 0;
    let mut code_buf = String::new();

    macro_rules! flush_code {
        () => {
            if !code_buf.is_empty() {
                spans.push(Span::Code(std::mem::take(&mut code_buf)));
            }
        };
    }

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            flush_code!();
            let (content, next) = scan_until_unescaped(&chars, i + 1, '\'');
            spans.push(Span::StringLiteral(content));
            i = next;
            continue;
        }

        if c == '"' {
            flush_code!();
            let (content, next) = scan_until_unescaped(&chars, i + 1, '"');
            spans.push(Span::QuotedIdent(content));
            i = next;
            continue;
        }

        if c == '$' {
            if let Some((tag_end, tag)) = scan_dollar_tag(&chars, i) {
                flush_code!();
                let closing = format!("${}$", tag);
                let (content, next) = scan_until_tag(&chars, tag_end, &closing);
                spans.push(Span::DollarQuoted(content));
                i = next;
                continue;
            }
        }

        if c == '-' && chars.get(i + 1) == Some(&'-') {
            flush_code!();
            let start = i;
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            spans.push(Span::LineComment(chars[start..i].iter().collect()));
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'*') {
            flush_code!();
            let start = i;
            i += 2;
            while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            spans.push(Span::BlockComment(chars[start..i].iter().collect()));
            continue;
        }

        code_buf.push(c);
        i += 1;
    }
    flush_code!();
    spans
}

fn scan_until_unescaped(chars: &[char], start: usize, quote: char) -> (String, usize) {
    let mut i = start;
    let mut content = String::new();
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                content.push(quote);
                i += 2;
                continue;
            }
            return (content, i + 1);
        }
        content.push(chars[i]);
        i += 1;
    }
    (content, i)
}

fn scan_dollar_tag(chars: &[char], start: usize) -> Option<(usize, String)> {
    let mut i = start + 1;
    let mut tag = String::new();
    while i < chars.len() && chars[i] != '$' {
        if !(chars[i].is_alphanumeric() || chars[i] == '_') {
            return None;
        }
        tag.push(chars[i]);
        i += 1;
    }
    if i >= chars.len() {
        return None;
    }
    Some((i + 1, tag))
}

fn scan_until_tag(chars: &[char], start: usize, closing: &str) -> (String, usize) {
    let closing_chars: Vec<char> = closing.chars().collect();
    let mut i = start;
    while i < chars.len() {
        if chars[i..].starts_with(closing_chars.as_slice()) {
            return (chars[start..i].iter().collect(), i + closing_chars.len());
        }
        i += 1;
    }
    (chars[start..].iter().collect(), chars.len())
}

/// Concatenation of all `Code` spans, used for keyword/structure scanning.
fn code_only(spans: &[Span]) -> String {
    spans
        .iter()
        .filter_map(|s| match s {
            Span::Code(c) => Some(c.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralIssue {
    MultipleStatements,
    NotASelect,
    DeniedKeyword(String),
    UnknownTable(String),
    UnknownColumn(String, String),
}

impl std::fmt::Display for StructuralIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StructuralIssue::MultipleStatements => write!(f, "multiple statements are not allowed"),
            StructuralIssue::NotASelect => write!(f, "statement is not a single SELECT"),
            StructuralIssue::DeniedKeyword(kw) => write!(f, "use of denied keyword: {}", kw),
            StructuralIssue::UnknownTable(t) => write!(f, "unknown table: {}", t),
            StructuralIssue::UnknownColumn(t, c) => write!(f, "unknown column {}.{}", t, c),
        }
    }
}

/// Validate `sql` against the denylist and the packet's table/column
/// whitelist, returning every issue found (not just the first) so the
/// repair controller can build one delta covering all of them. Also
/// returns a possibly-rewritten SQL string with `LIMIT {max_rows}` injected
/// when one was missing -- an informational auto-fix, not an error.
pub fn validate_structural(
    sql: &str,
    packet: &SchemaContextPacket,
    config: &StructuralConfig,
    max_rows: u64,
) -> (Vec<StructuralIssue>, String) {
    let spans = tokenize(sql);
    let code = code_only(&spans);
    let mut issues = Vec::new();

    let statement_count = code
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .count();
    if statement_count > 1 {
        issues.push(StructuralIssue::MultipleStatements);
    }

    let trimmed = code.trim_start();
    if !trimmed.to_uppercase().starts_with("SELECT") {
        issues.push(StructuralIssue::NotASelect);
    }

    let upper_code = code.to_uppercase();
    let code_words: HashSet<&str> = upper_code
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .collect();
    for denied in &config.denylist {
        if code_words.contains(denied.to_uppercase().as_str()) {
            issues.push(StructuralIssue::DeniedKeyword(denied.clone()));
        }
    }

    let known_tables: HashSet<&str> = packet.table_names().into_iter().collect();
    for table in extract_table_refs(&code) {
        if !known_tables.contains(table.as_str()) {
            issues.push(StructuralIssue::UnknownTable(table));
        }
    }

    let aliases = extract_table_aliases(&code, &known_tables);
    let columns = column_sets(packet);
    for (prefix, column) in extract_qualified_columns(&code) {
        if column == "*" {
            continue;
        }
        let Some(table) = aliases.get(prefix.as_str()) else { continue };
        let Some(table_columns) = columns.get(table.as_str()) else { continue };
        if !table_columns.contains(column.as_str()) {
            issues.push(StructuralIssue::UnknownColumn(table.clone(), column));
        }
    }

    let rewritten = inject_limit_if_missing(sql, &upper_code, max_rows);

    (issues, rewritten)
}

/// The column names a table candidate's rendered M-schema string carries,
/// e.g. `"companies(company_id integer [PK], name text)"` ->
/// `{"company_id", "name"}`.
fn column_sets(packet: &SchemaContextPacket) -> HashMap<&str, HashSet<String>> {
    packet
        .tables
        .iter()
        .map(|t| {
            let inner = t
                .m_schema
                .split_once('(')
                .map(|(_, rest)| rest.trim_end_matches(')'))
                .unwrap_or("");
            let names = inner
                .split(", ")
                .filter_map(|part| part.split_whitespace().next())
                .map(str::to_string)
                .collect();
            (t.table_name.as_str(), names)
        })
        .collect()
}

/// Map every alias and bare table name introduced in a `FROM`/`JOIN` clause
/// to the real table it names, so `alias.column` references can be checked
/// against that table's columns. Only covers tables already in the packet's
/// whitelist -- an alias on an unknown table is reported once via
/// [`StructuralIssue::UnknownTable`] and not chased further here.
fn extract_table_aliases(code: &str, known_tables: &HashSet<&str>) -> HashMap<String, String> {
    const CLAUSE_WORDS: &[&str] = &[
        "ON", "WHERE", "GROUP", "ORDER", "LIMIT", "HAVING", "JOIN", "INNER", "LEFT", "RIGHT",
        "FULL", "CROSS", "UNION", "OFFSET",
    ];

    let upper = code.to_uppercase();
    let words: Vec<&str> = code.split_whitespace().collect();
    let upper_words: Vec<&str> = upper.split_whitespace().collect();
    let mut aliases = HashMap::new();

    for (i, word) in upper_words.iter().enumerate() {
        if *word != "FROM" && *word != "JOIN" {
            continue;
        }
        let Some(raw) = words.get(i + 1) else { continue };
        let raw = raw.trim_matches(|c: char| c == ',' || c == '(' || c == ')');
        let table = raw.split('.').next_back().unwrap_or(raw).to_string();
        if table.is_empty() || !known_tables.contains(table.as_str()) {
            continue;
        }
        aliases.insert(table.clone(), table.clone());

        let mut j = i + 2;
        if upper_words.get(j) == Some(&"AS") {
            j += 1;
        }
        if let Some(candidate) = words.get(j) {
            let candidate = candidate.trim_matches(|c: char| c == ',' || c == '(' || c == ')');
            let candidate_upper = candidate.to_uppercase();
            if !candidate.is_empty() && !CLAUSE_WORDS.contains(&candidate_upper.as_str()) {
                aliases.insert(candidate.to_string(), table);
            }
        }
    }
    aliases
}

/// `alias.column` / `table.column` tokens anywhere in the code spans.
fn extract_qualified_columns(code: &str) -> Vec<(String, String)> {
    code.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '.' && c != '*')
        .filter(|tok| !tok.is_empty())
        .filter_map(|tok| {
            let mut parts = tok.split('.');
            let prefix = parts.next()?;
            let suffix = parts.next()?;
            if parts.next().is_some() || prefix.is_empty() || suffix.is_empty() {
                return None;
            }
            if prefix.chars().next()?.is_ascii_digit() {
                return None;
            }
            Some((prefix.to_string(), suffix.to_string()))
        })
        .collect()
}

fn extract_table_refs(code: &str) -> Vec<String> {
    let upper = code.to_uppercase();
    let words: Vec<&str> = code.split_whitespace().collect();
    let upper_words: Vec<&str> = upper.split_whitespace().collect();
    let mut refs = Vec::new();
    for (i, word) in upper_words.iter().enumerate() {
        if (*word == "FROM" || *word == "JOIN") && i + 1 < words.len() {
            let raw = words[i + 1].trim_matches(|c: char| c == ',' || c == '(' || c == ')');
            let name = raw.split('.').next_back().unwrap_or(raw);
            if !name.is_empty() {
                refs.push(name.to_string());
            }
        }
    }
    refs
}

fn inject_limit_if_missing(sql: &str, upper_code: &str, max_rows: u64) -> String {
    if upper_code.contains("LIMIT") {
        return sql.to_string();
    }
    let trimmed = sql.trim_end();
    let body = trimmed.trim_end_matches(';');
    format!("{} LIMIT {};", body, max_rows)
}
