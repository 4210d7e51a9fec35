//! Prompt composer: an immutable base prompt plus ephemeral repair delta
//! blocks, joined by pure string concatenation. The base prompt is a pure
//! function of the schema-context packet and the question — identical
//! inputs always produce a byte-identical base, independent of repair
//! history.

use crate::config::JoinHintFormat;
use crate::schema::packet::SchemaContextPacket;

pub const BASE_PROMPT_VERSION: &str = "v1.0.0";

/// PostgreSQL-specific generation rules. Kept as a `const` so it
/// participates unmodified in the base-prompt byte-identity invariant.
const POSTGRES_RULES: &str = r#"PostgreSQL-specific rules:
1. Decade grouping: use (year / 10) * 10, NOT EXTRACT(DECADE FROM year) --
   PostgreSQL has no DECADE field for EXTRACT. Example:
   SELECT (founding_year / 10) * 10 AS decade, COUNT(*) FROM companies GROUP BY decade;
2. Prefer ORDER BY ... LIMIT 1 over bare MIN()/MAX() without GROUP BY.
   Wrong:  SELECT MAX(revenue_millions) FROM company_revenue_annual;
   Right:  SELECT revenue_millions FROM company_revenue_annual ORDER BY revenue_millions DESC LIMIT 1;
3. Always single-quote string literals; double quotes are for identifiers.
4. Use short table aliases (companies -> c, company_revenue_annual -> r).
5. Generate exactly one SELECT statement, no trailing statements.
"#;

const OUTPUT_RULES: &str = r#"Output rules:
- Output SQL only, no explanations, no markdown, no commentary.
- The output must start with SELECT.
- If you cannot generate a valid query, output exactly: CANNOT_GENERATE
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeltaPriority {
    Semantic = 0,
    Structural = 1,
    Planner = 2,
}

#[derive(Debug, Clone)]
pub struct DeltaBlock {
    pub priority: DeltaPriority,
    pub text: String,
}

pub struct PromptComposer;

impl PromptComposer {
    /// Render the immutable base prompt: system instructions, PostgreSQL
    /// rules, schema tables (M-schema), join hints, the question, and the
    /// output-format footer.
    pub fn base_prompt(packet: &SchemaContextPacket) -> String {
        Self::base_prompt_with_format(packet, JoinHintFormat::Edges)
    }

    /// Same as [`Self::base_prompt`] but picks which of the packet's join
    /// representations (edge list, resolved paths, both, or neither) to
    /// render. Still a pure function of its inputs.
    pub fn base_prompt_with_format(packet: &SchemaContextPacket, format: JoinHintFormat) -> String {
        let tables_block = packet
            .tables
            .iter()
            .map(|t| t.m_schema.clone())
            .collect::<Vec<_>>()
            .join("\n");

        let mut sections: Vec<String> = Vec::new();
        if matches!(format, JoinHintFormat::Edges | JoinHintFormat::Both) && !packet.join_hints.is_empty() {
            sections.push(format!("Join hints:\n{}", packet.join_hints.join("\n")));
        }
        if matches!(format, JoinHintFormat::Paths | JoinHintFormat::Both) && !packet.join_paths.is_empty() {
            let rendered = packet
                .join_paths
                .iter()
                .map(|path| path.join(" -> "))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("Join paths:\n{}", rendered));
        }
        let join_hints_block = if sections.is_empty() {
            String::new()
        } else {
            format!("\n\n{}", sections.join("\n\n"))
        };

        format!(
            "You are an expert PostgreSQL query generator. Given a database schema \
             and a question, output ONLY a single SELECT query.\n\n\
             Schema:\n{tables}\n{joins}\n\n{rules}\n{outputs}\nQuestion: {question}",
            tables = tables_block,
            joins = join_hints_block,
            rules = POSTGRES_RULES,
            outputs = OUTPUT_RULES,
            question = packet.question,
        )
    }

    /// Compose the base prompt with ordered repair deltas: semantic issues
    /// first, then structural issues, then the planner error -- only the
    /// most recent attempt's deltas are included, never accumulated history.
    pub fn compose(packet: &SchemaContextPacket, deltas: Vec<DeltaBlock>) -> String {
        Self::compose_with_format(packet, deltas, JoinHintFormat::Edges)
    }

    pub fn compose_with_format(
        packet: &SchemaContextPacket,
        mut deltas: Vec<DeltaBlock>,
        format: JoinHintFormat,
    ) -> String {
        deltas.sort_by_key(|d| d.priority);
        let base = Self::base_prompt_with_format(packet, format);
        if deltas.is_empty() {
            return base;
        }
        let delta_text = deltas.into_iter().map(|d| d.text).collect::<Vec<_>>().join("\n\n");
        format!("{}\n\n{}", base, delta_text)
    }
}
