//! Semantic validator: checks that generated SQL actually addresses the
//! entities and intent in the natural-language question. Ported from a
//! Python reference implementation's entity-extraction and intent
//! classification passes, keeping the same suffix lists, stopword set, and
//! regex cascade order so the behavior doesn't silently drift.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticIssue {
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    LookupByName,
    LookupState,
    Count,
    List,
    Aggregate,
    Compare,
    Rank,
    General,
}

static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"['"]([^'"]+)['"]"#).unwrap());

const BUSINESS_SUFFIXES: &[&str] = &[
    "LLC", "Inc", "Corp", "Co", "Ltd", "Services", "Systems", "Technologies", "Solutions",
    "Group", "Partners", "Holdings", "Enterprises", "Industries", "International", "Medical",
    "Financial", "Energy", "Distribution", "Logistics", "Manufacturing", "Consulting",
    "Analytics", "Software", "Networks", "Communications", "Healthcare",
];

static SUFFIX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let suffixes = BUSINESS_SUFFIXES.join("|");
    Regex::new(&format!(
        r"([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*(?:\s+(?:{})))\b",
        suffixes
    ))
    .unwrap()
});

static GENERAL_PHRASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+){1,5})\b").unwrap());

static STATE_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(AL|AK|AZ|AR|CA|CO|CT|DE|FL|GA|HI|ID|IL|IN|IA|KS|KY|LA|ME|MD|MA|MI|MN|MS|MO|MT|NE|NV|NH|NJ|NM|NY|NC|ND|OH|OK|OR|PA|RI|SC|SD|TN|TX|UT|VT|VA|WA|WV|WI|WY)\b")
        .unwrap()
});

static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(20[0-3][0-9])\b").unwrap());

fn common_phrases() -> &'static HashSet<&'static str> {
    static SET: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
        [
            "New York", "Los Angeles", "San Francisco", "San Diego", "San Jose", "Las Vegas",
            "Salt Lake", "Kansas City", "New Orleans", "New Jersey", "North Carolina",
            "South Carolina", "North Dakota", "South Dakota", "West Virginia", "Rhode Island",
            "New Hampshire", "New Mexico", "United States", "How Many", "Show Me", "Tell Me",
            "What Is", "Which State", "What Company", "Find All", "List All", "Get All",
            "January", "February", "March", "April", "May", "June", "July", "August",
            "September", "October", "November", "December", "Monday", "Tuesday", "Wednesday",
            "Thursday", "Friday", "Saturday", "Sunday",
        ]
        .into_iter()
        .collect()
    });
    &SET
}

fn state_names() -> &'static [(&'static str, &'static str)] {
    &[
        ("california", "CA"), ("texas", "TX"), ("new york", "NY"), ("florida", "FL"),
        ("ohio", "OH"), ("illinois", "IL"), ("michigan", "MI"), ("pennsylvania", "PA"),
        ("georgia", "GA"), ("missouri", "MO"), ("indiana", "IN"), ("kentucky", "KY"),
        ("maryland", "MD"), ("vermont", "VT"),
    ]
}

/// Extract candidate entity names: quoted strings first (highest
/// confidence), then business-suffix proper nouns, then general
/// capitalized multi-word phrases filtered against a stopword set,
/// deduplicated case-insensitively while preserving first-seen order.
pub fn extract_entity_names(text: &str) -> Vec<String> {
    let mut found = Vec::new();

    for cap in QUOTED.captures_iter(text) {
        found.push(cap[1].to_string());
    }
    for cap in SUFFIX_PATTERN.captures_iter(text) {
        found.push(cap[1].to_string());
    }
    for cap in GENERAL_PHRASE.captures_iter(text) {
        let candidate = cap[1].to_string();
        if !common_phrases().contains(candidate.as_str()) && candidate.len() > 5 {
            found.push(candidate);
        }
    }

    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for name in found {
        let key = name.to_lowercase();
        if seen.insert(key) {
            unique.push(name);
        }
    }
    unique
}

pub fn extract_state_codes(text: &str) -> Vec<String> {
    STATE_CODE.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

/// Years in the 2000-2039 range; the window the reference implementation
/// uses, not an arbitrary round number.
pub fn extract_years(text: &str) -> Vec<i32> {
    YEAR.find_iter(text).filter_map(|m| m.as_str().parse().ok()).collect()
}

pub fn classify_intent(question: &str) -> Intent {
    let q = question.to_lowercase();

    if Regex::new(r"which state|what state|where is .* located").unwrap().is_match(&q) {
        return Intent::LookupState;
    }
    if Regex::new(r"how many|count|number of|total (?:number|count)").unwrap().is_match(&q) {
        return Intent::Count;
    }
    if Regex::new(r"top \d+|bottom \d+|highest|lowest|most|least|best|worst").unwrap().is_match(&q) {
        return Intent::Rank;
    }
    if Regex::new(r"compare|difference|between .* and|vs\.?|versus").unwrap().is_match(&q) {
        return Intent::Compare;
    }
    if Regex::new(r"average|avg|sum|total|mean|median").unwrap().is_match(&q) {
        return Intent::Aggregate;
    }
    if Regex::new(r"show|list|display|get|find|all").unwrap().is_match(&q) {
        return Intent::List;
    }
    if !extract_entity_names(question).is_empty() {
        return Intent::LookupByName;
    }
    Intent::General
}

/// Run all five semantic checks and report every issue found. `is_valid`
/// (no `Error`-severity issues) is left to the caller to derive from the
/// returned list so the repair controller can decide what counts as a hard
/// failure versus an informational delta.
pub fn validate_semantic_match(question: &str, sql: &str) -> Vec<SemanticIssue> {
    let mut issues = Vec::new();
    let sql_upper = sql.to_uppercase();

    for entity in extract_entity_names(question) {
        let quoted_single = format!("'{}'", entity);
        let quoted_double = format!("\"{}\"", entity);
        if !sql.contains(&quoted_single) && !sql.contains(&quoted_double) && !sql.to_lowercase().contains(&entity.to_lowercase()) {
            issues.push(SemanticIssue {
                code: "MISSING_ENTITY",
                severity: Severity::Error,
                message: format!("question mentions '{}' but SQL doesn't reference it", entity),
                suggestion: Some(format!("add WHERE name = '{}' or similar filter", entity)),
            });
        }
    }

    let intent = classify_intent(question);

    if intent == Intent::LookupState {
        let select_clause = sql_upper.split("FROM").next().unwrap_or(&sql_upper);
        if !select_clause.contains("STATE") {
            issues.push(SemanticIssue {
                code: "WRONG_SELECT",
                severity: Severity::Warning,
                message: "question asks 'which state' but SQL doesn't SELECT state".into(),
                suggestion: Some("SELECT state FROM companies WHERE ...".into()),
            });
        }
    }

    if intent == Intent::Count && !sql_upper.contains("COUNT(") {
        issues.push(SemanticIssue {
            code: "MISSING_AGGREGATION",
            severity: Severity::Warning,
            message: "question asks 'how many' but SQL doesn't use COUNT()".into(),
            suggestion: Some("use SELECT COUNT(*) FROM ...".into()),
        });
    }

    let mut question_states: HashSet<String> = extract_state_codes(question).into_iter().map(|s| s.to_uppercase()).collect();
    for (name, code) in state_names() {
        if question.to_lowercase().contains(name) {
            question_states.insert(code.to_string());
        }
    }
    for state in extract_state_codes(sql) {
        let state_upper = state.to_uppercase();
        if !question_states.contains(&state_upper)
            && (sql.contains(&format!("= '{}'", state_upper)) || sql.contains(&format!("= '{}'", state)))
        {
            issues.push(SemanticIssue {
                code: "HALLUCINATED_VALUE",
                severity: Severity::Error,
                message: format!("SQL filters by state '{}' but question doesn't mention this state", state_upper),
                suggestion: Some("remove hardcoded state filter or use the correct state from the question".into()),
            });
        }
    }

    let question_years: HashSet<i32> = extract_years(question).into_iter().collect();
    if !question_years.is_empty() {
        for year in extract_years(sql) {
            if !question_years.contains(&year) {
                issues.push(SemanticIssue {
                    code: "WRONG_YEAR",
                    severity: Severity::Warning,
                    message: format!("SQL uses year {} but question mentions {:?}", year, question_years),
                    suggestion: Some(format!("use year(s) from the question: {:?}", question_years)),
                });
            }
        }
    }

    issues
}

pub fn is_valid(issues: &[SemanticIssue]) -> bool {
    !issues.iter().any(|i| i.severity == Severity::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_quoted_company_name() {
        let names = extract_entity_names("show revenue for 'Acme Corp'");
        assert!(names.contains(&"Acme Corp".to_string()));
    }

    #[test]
    fn filters_common_phrases_from_general_extraction() {
        let names = extract_entity_names("What companies are in New York");
        assert!(!names.iter().any(|n| n == "New York"));
    }

    #[test]
    fn classifies_count_intent() {
        assert_eq!(classify_intent("how many companies are in CA?"), Intent::Count);
    }

    #[test]
    fn classifies_lookup_state_intent() {
        assert_eq!(classify_intent("which state is Acme Corp in?"), Intent::LookupState);
    }

    #[test]
    fn missing_entity_flagged_as_error() {
        let issues = validate_semantic_match("show revenue for 'Acme Corp'", "SELECT * FROM companies;");
        assert!(issues.iter().any(|i| i.code == "MISSING_ENTITY" && i.severity == Severity::Error));
    }

    #[test]
    fn count_without_count_function_is_warning() {
        let issues = validate_semantic_match("how many companies are there?", "SELECT * FROM companies;");
        assert!(issues.iter().any(|i| i.code == "MISSING_AGGREGATION"));
        assert!(is_valid(&issues));
    }

    #[test]
    fn hallucinated_state_literal_is_error() {
        let issues = validate_semantic_match(
            "how many companies are there?",
            "SELECT COUNT(*) FROM companies WHERE state = 'CA';",
        );
        assert!(issues.iter().any(|i| i.code == "HALLUCINATED_VALUE"));
        assert!(!is_valid(&issues));
    }

    #[test]
    fn state_mentioned_in_question_is_not_hallucinated() {
        let issues = validate_semantic_match(
            "how many companies are in California?",
            "SELECT COUNT(*) FROM companies WHERE state = 'CA';",
        );
        assert!(!issues.iter().any(|i| i.code == "HALLUCINATED_VALUE"));
    }

    #[test]
    fn wrong_year_only_flagged_when_question_mentions_years() {
        let issues = validate_semantic_match(
            "what was revenue in 2020?",
            "SELECT revenue_millions FROM company_revenue_annual WHERE year = 2021;",
        );
        assert!(issues.iter().any(|i| i.code == "WRONG_YEAR"));
    }
}
