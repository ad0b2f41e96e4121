//! SQL statement builders for operations the control plane cannot do.
//!
//! Tables and functions are created with full DDL; row filters, column
//! masks, and ABAC policies are applied with ALTER/CREATE POLICY
//! statements. Identifiers are backtick-quoted per segment; literals are
//! single-quoted with embedded quotes doubled.

use brickkit_core::{
    AbacPolicyType, FunctionSpec, TableSpec, TableType,
};

use crate::backend::PolicyRecord;

/// Quotes a dotted identifier, backticking each segment.
#[must_use]
pub fn quote_ident(full_name: &str) -> String {
    full_name
        .split('.')
        .map(|segment| format!("`{}`", segment.replace('`', "``")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Quotes a string literal.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Builds the CREATE statement for a table.
#[must_use]
pub fn create_table(full_name: &str, spec: &TableSpec, comment: Option<&str>) -> String {
    if matches!(spec.table_type, TableType::View) {
        let definition = spec.view_definition.as_deref().unwrap_or("SELECT 1");
        return format!(
            "CREATE OR REPLACE VIEW {} AS {definition}",
            quote_ident(full_name)
        );
    }

    let mut sql = String::from("CREATE TABLE IF NOT EXISTS ");
    sql.push_str(&quote_ident(full_name));

    if !spec.columns.is_empty() {
        let columns: Vec<String> = spec
            .columns
            .iter()
            .map(|column| {
                let mut definition =
                    format!("`{}` {}", column.name, column.type_name);
                if !column.nullable {
                    definition.push_str(" NOT NULL");
                }
                if let Some(comment) = &column.comment {
                    definition.push_str(" COMMENT ");
                    definition.push_str(&quote_literal(comment));
                }
                definition
            })
            .collect();
        sql.push_str(" (");
        sql.push_str(&columns.join(", "));
        sql.push(')');
    }

    sql.push_str(" USING DELTA");

    if !spec.partition_columns.is_empty() {
        let partitions: Vec<String> = spec
            .partition_columns
            .iter()
            .map(|column| format!("`{column}`"))
            .collect();
        sql.push_str(" PARTITIONED BY (");
        sql.push_str(&partitions.join(", "));
        sql.push(')');
    }

    if let Some(location) = &spec.storage_location {
        sql.push_str(" LOCATION ");
        sql.push_str(&quote_literal(location));
    }

    if let Some(comment) = comment {
        sql.push_str(" COMMENT ");
        sql.push_str(&quote_literal(comment));
    }

    if !spec.properties.is_empty() {
        let properties: Vec<String> = spec
            .properties
            .iter()
            .map(|(key, value)| format!("{} = {}", quote_literal(key), quote_literal(value)))
            .collect();
        sql.push_str(" TBLPROPERTIES (");
        sql.push_str(&properties.join(", "));
        sql.push(')');
    }

    sql
}

/// Builds the CREATE statement for a function.
#[must_use]
pub fn create_function(full_name: &str, spec: &FunctionSpec) -> String {
    let parameters: Vec<String> = spec
        .parameters
        .iter()
        .map(|parameter| format!("{} {}", parameter.name, parameter.type_name))
        .collect();
    let returns = match spec.kind {
        brickkit_core::FunctionKind::Scalar => format!("RETURNS {}", spec.return_type),
        brickkit_core::FunctionKind::Table => format!("RETURNS TABLE ({})", spec.return_type),
    };
    format!(
        "CREATE OR REPLACE FUNCTION {} ({}) {} RETURN {}",
        quote_ident(full_name),
        parameters.join(", "),
        returns,
        spec.definition
    )
}

/// Builds `ALTER TABLE … SET ROW FILTER`.
#[must_use]
pub fn set_row_filter(full_name: &str, filter: &brickkit_core::RowFilterSpec) -> String {
    let columns: Vec<String> = filter
        .input_columns
        .iter()
        .map(|column| format!("`{column}`"))
        .collect();
    format!(
        "ALTER TABLE {} SET ROW FILTER {} ON ({})",
        quote_ident(full_name),
        quote_ident(&filter.function),
        columns.join(", ")
    )
}

/// Builds `ALTER TABLE … DROP ROW FILTER`.
#[must_use]
pub fn drop_row_filter(full_name: &str) -> String {
    format!("ALTER TABLE {} DROP ROW FILTER", quote_ident(full_name))
}

/// Builds `ALTER TABLE … SET MASK` for one column.
#[must_use]
pub fn set_column_mask(full_name: &str, mask: &brickkit_core::ColumnMaskSpec) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ALTER COLUMN `{}` SET MASK {}",
        quote_ident(full_name),
        mask.column,
        quote_ident(&mask.function)
    );
    if !mask.using_columns.is_empty() {
        let using: Vec<String> = mask
            .using_columns
            .iter()
            .map(|column| format!("`{column}`"))
            .collect();
        sql.push_str(&format!(" USING COLUMNS ({})", using.join(", ")));
    }
    sql
}

/// Builds `ALTER TABLE … DROP MASK` for one column.
#[must_use]
pub fn drop_column_mask(full_name: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} ALTER COLUMN `{column}` DROP MASK",
        quote_ident(full_name)
    )
}

/// Builds `CREATE OR REPLACE POLICY` on a container.
#[must_use]
pub fn create_or_replace_policy(container_full_name: &str, policy: &PolicyRecord) -> String {
    let kind = match policy.policy_type {
        AbacPolicyType::RowFilter => "ROW FILTER",
        AbacPolicyType::ColumnMask => "COLUMN MASK",
    };
    let mut sql = format!(
        "CREATE OR REPLACE POLICY `{}` ON SCHEMA {} COMMENT '' {kind} {}",
        policy.name,
        quote_ident(container_full_name),
        quote_ident(&policy.function_ref)
    );
    if !policy.target_principals.is_empty() {
        let principals: Vec<String> = policy
            .target_principals
            .iter()
            .map(|p| quote_literal(p))
            .collect();
        sql.push_str(&format!(" TO {}", principals.join(", ")));
    }
    if !policy.except_principals.is_empty() {
        let principals: Vec<String> = policy
            .except_principals
            .iter()
            .map(|p| quote_literal(p))
            .collect();
        sql.push_str(&format!(" EXCEPT {}", principals.join(", ")));
    }
    let conditions: Vec<String> = policy
        .match_conditions
        .iter()
        .map(|condition| match &condition.tag_value {
            Some(value) => format!(
                "hasTagValue({}, {})",
                quote_literal(&condition.tag_key),
                quote_literal(value)
            ),
            None => format!("hasTag({})", quote_literal(&condition.tag_key)),
        })
        .collect();
    match policy.policy_type {
        AbacPolicyType::RowFilter => {
            sql.push_str(&format!(" MATCH TABLES {}", conditions.join(" AND ")));
        }
        AbacPolicyType::ColumnMask => {
            let column = policy.target_column.as_deref().unwrap_or_default();
            sql.push_str(&format!(
                " MATCH COLUMNS {} AS `{column}`",
                conditions.join(" AND ")
            ));
        }
    }
    sql
}

/// Builds `DROP POLICY` on a container.
#[must_use]
pub fn drop_policy(container_full_name: &str, name: &str) -> String {
    format!(
        "DROP POLICY IF EXISTS `{name}` ON SCHEMA {}",
        quote_ident(container_full_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use brickkit_core::{ColumnSpec, RowFilterSpec};

    #[test]
    fn table_ddl_covers_columns_partitions_and_location() {
        let spec = TableSpec {
            columns: vec![
                ColumnSpec::new("id", "bigint"),
                ColumnSpec {
                    nullable: false,
                    ..ColumnSpec::new("region", "string")
                },
            ],
            partition_columns: vec!["region".into()],
            storage_location: Some("s3://bucket/orders".into()),
            ..TableSpec::default()
        };
        let sql = create_table("cat.sch.orders", &spec, Some("orders table"));
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `cat`.`sch`.`orders` ("));
        assert!(sql.contains("`id` BIGINT"));
        assert!(sql.contains("`region` STRING NOT NULL"));
        assert!(sql.contains("PARTITIONED BY (`region`)"));
        assert!(sql.contains("LOCATION 's3://bucket/orders'"));
        assert!(sql.contains("COMMENT 'orders table'"));
    }

    #[test]
    fn row_filter_statements() {
        let filter = RowFilterSpec {
            function: "cat.sch.pii_row_filter".into(),
            input_columns: vec!["region".into()],
        };
        assert_eq!(
            set_row_filter("cat.sch.orders", &filter),
            "ALTER TABLE `cat`.`sch`.`orders` SET ROW FILTER \
             `cat`.`sch`.`pii_row_filter` ON (`region`)"
        );
        assert_eq!(
            drop_row_filter("cat.sch.orders"),
            "ALTER TABLE `cat`.`sch`.`orders` DROP ROW FILTER"
        );
    }

    #[test]
    fn policy_statement_includes_match_conditions() {
        let policy = PolicyRecord {
            name: "hide_pii_rows".into(),
            policy_type: AbacPolicyType::RowFilter,
            function_ref: "pii_row_filter".into(),
            target_principals: vec![],
            except_principals: vec!["privacy_office".into()],
            match_conditions: vec![brickkit_core::MatchCondition::has_tag_value("pii", "true")],
            target_column: None,
        };
        let sql = create_or_replace_policy("cat.customers", &policy);
        assert!(sql.contains("CREATE OR REPLACE POLICY `hide_pii_rows`"));
        assert!(sql.contains("EXCEPT 'privacy_office'"));
        assert!(sql.contains("hasTagValue('pii', 'true')"));
    }

    #[test]
    fn literals_are_escaped() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_ident("a.b`c"), "`a`.`b``c`");
    }
}
