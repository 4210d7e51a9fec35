//! Compact textual schema rendering used both as the dense-embedding input
//! and as the table block the prompt composer places in the base prompt.
//!
//! `table(col1 TYPE [PK], col2 TYPE [FK->other.col], ...)`

use super::catalog::TableEntry;

pub fn render_m_schema(table: &TableEntry) -> String {
    let columns = table
        .columns
        .iter()
        .map(|col| {
            let mut rendered = format!("{} {}", col.name, col.data_type);
            if col.is_primary_key {
                rendered.push_str(" [PK]");
            }
            if let Some(fk) = &col.references {
                rendered.push_str(&format!(" [FK->{}.{}]", fk.to_table, fk.to_column));
            }
            rendered
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!("{}({})", table.table_name, columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::catalog::{ColumnEntry, FkEdge};

    #[test]
    fn renders_pk_and_fk_annotations() {
        let table = TableEntry {
            table_name: "company_revenue_annual".into(),
            table_schema: "public".into(),
            module: None,
            gloss: None,
            is_hub: false,
            columns: vec![
                ColumnEntry {
                    name: "company_id".into(),
                    data_type: "integer".into(),
                    is_primary_key: true,
                    references: Some(FkEdge {
                        from_table: "company_revenue_annual".into(),
                        from_column: "company_id".into(),
                        to_table: "companies".into(),
                        to_column: "company_id".into(),
                    }),
                    gloss: None,
                },
                ColumnEntry {
                    name: "revenue_millions".into(),
                    data_type: "numeric".into(),
                    is_primary_key: false,
                    references: None,
                    gloss: None,
                },
            ],
        };

        let rendered = render_m_schema(&table);
        assert_eq!(
            rendered,
            "company_revenue_annual(company_id integer [PK] [FK->companies.company_id], revenue_millions numeric)"
        );
    }
}
