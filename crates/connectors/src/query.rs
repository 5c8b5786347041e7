use crate::requests::ScanRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Postgres,
}

impl Dialect {
    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
            Dialect::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::MySql => "?".to_string(),
            Dialect::Postgres => format!("${index}"),
        }
    }
}

/// Renders the handful of statements the adapters need. Transform
/// expressions from the table mapping are spliced into the select list
/// verbatim; plain columns are quoted.
pub struct QueryRenderer {
    dialect: Dialect,
}

impl QueryRenderer {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Keyset-pagination scan. Parameter order: lo, hi[, cursor].
    pub fn scan(&self, request: &ScanRequest) -> String {
        let d = self.dialect;
        let pk = d.quote_ident(&request.pk_column);
        let select_list = request
            .columns
            .iter()
            .map(|col| {
                if col.is_plain() {
                    d.quote_ident(&col.expr)
                } else {
                    format!("{} AS {}", col.expr, d.quote_ident(&col.alias))
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let upper_op = if request.upper_inclusive { "<=" } else { "<" };
        let mut sql = format!(
            "SELECT {select_list} FROM {table} WHERE {pk} >= {p1} AND {pk} {upper_op} {p2}",
            table = d.quote_ident(&request.table),
            p1 = d.placeholder(1),
            p2 = d.placeholder(2),
        );
        if request.cursor.is_some() {
            sql.push_str(&format!(" AND {pk} > {}", d.placeholder(3)));
        }
        sql.push_str(&format!(" ORDER BY {pk} LIMIT {}", request.limit));
        sql
    }

    /// Multi-row parameterized insert for `row_count` rows.
    pub fn insert(&self, table: &str, columns: &[String], row_count: usize) -> String {
        let d = self.dialect;
        let column_list = columns
            .iter()
            .map(|c| d.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut tuples = Vec::with_capacity(row_count);
        let mut index = 1;
        for _ in 0..row_count {
            let tuple = (0..columns.len())
                .map(|_| {
                    let p = d.placeholder(index);
                    index += 1;
                    p
                })
                .collect::<Vec<_>>()
                .join(", ");
            tuples.push(format!("({tuple})"));
        }
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            d.quote_ident(table),
            column_list,
            tuples.join(", ")
        )
    }

    /// Count of rows inside a pk range. Parameter order: lo, hi.
    pub fn count_range(&self, table: &str, pk: &str, upper_inclusive: bool) -> String {
        let d = self.dialect;
        let pk = d.quote_ident(pk);
        let upper_op = if upper_inclusive { "<=" } else { "<" };
        format!(
            "SELECT COUNT(*) AS n FROM {} WHERE {pk} >= {} AND {pk} {upper_op} {}",
            d.quote_ident(table),
            d.placeholder(1),
            d.placeholder(2),
        )
    }

    /// Min/max of the pk, widened to a signed 64-bit value so the driver
    /// mapping is uniform across integer column widths.
    pub fn pk_bounds(&self, table: &str, pk: &str) -> String {
        let d = self.dialect;
        let pk = d.quote_ident(pk);
        match d {
            Dialect::Postgres => format!(
                "SELECT MIN({pk})::BIGINT AS min_pk, MAX({pk})::BIGINT AS max_pk FROM {}",
                d.quote_ident(table)
            ),
            Dialect::MySql => format!(
                "SELECT CAST(MIN({pk}) AS SIGNED) AS min_pk, \
                 CAST(MAX({pk}) AS SIGNED) AS max_pk FROM {}",
                d.quote_ident(table)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requests::SelectColumn;

    fn request(cursor: Option<i64>) -> ScanRequest {
        ScanRequest {
            table: "users".into(),
            pk_column: "id".into(),
            columns: vec![
                SelectColumn::plain("id"),
                SelectColumn::transformed("UPPER(name)", "name"),
            ],
            pk_start: 1,
            pk_end: 100,
            upper_inclusive: false,
            cursor,
            limit: 500,
        }
    }

    #[test]
    fn scan_quotes_plain_columns_and_splices_transforms() {
        let sql = QueryRenderer::new(Dialect::Postgres).scan(&request(None));
        assert_eq!(
            sql,
            "SELECT \"id\", UPPER(name) AS \"name\" FROM \"users\" \
             WHERE \"id\" >= $1 AND \"id\" < $2 ORDER BY \"id\" LIMIT 500"
        );
    }

    #[test]
    fn scan_with_cursor_adds_keyset_predicate() {
        let sql = QueryRenderer::new(Dialect::MySql).scan(&request(Some(42)));
        assert!(sql.contains("AND `id` > ?"));
        assert!(sql.ends_with("ORDER BY `id` LIMIT 500"));
    }

    #[test]
    fn insert_renders_one_tuple_per_row() {
        let sql = QueryRenderer::new(Dialect::Postgres).insert(
            "t",
            &["a".to_string(), "b".to_string()],
            2,
        );
        assert_eq!(
            sql,
            "INSERT INTO \"t\" (\"a\", \"b\") VALUES ($1, $2), ($3, $4)"
        );
    }

    #[test]
    fn last_chunk_count_is_inclusive() {
        let sql = QueryRenderer::new(Dialect::MySql).count_range("t", "id", true);
        assert!(sql.contains("`id` <= ?"));
    }
}
