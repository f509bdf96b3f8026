use duckdb::types::ToSqlOutput;
use duckdb::ToSql;

/// Columns `sort_by` may reference; anything else silently falls back
/// to `id ASC` (§4.6).
const SORTABLE_COLUMNS: &[&str] = &["id", "file_name", "width", "height", "split"];

#[derive(Clone, Debug, Default)]
pub struct SampleFilter {
    pub dataset_id: String,
    pub split: Option<String>,
    pub category: Option<String>,
    pub file_name_contains: Option<String>,
    pub tags: Vec<String>,
    pub id_allow_list: Option<Vec<String>>,
    pub annotation_source: Option<String>,
    pub sort_by: Option<String>,
    pub sort_desc: bool,
}

/// A composed, parameter-bound query fragment: `SELECT ... FROM samples s
/// {join} WHERE {where} ORDER BY {order}`. Every user-supplied value is
/// carried in `params`, never concatenated into the SQL text.
pub struct BuiltFilter {
    pub join_clause: String,
    pub where_clause: String,
    pub order_clause: String,
    pub params: Vec<Box<dyn ToSql>>,
}

impl SampleFilter {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            ..Default::default()
        }
    }

    pub fn build(&self) -> BuiltFilter {
        let mut join = String::new();
        let mut conds: Vec<String> = vec!["s.dataset_id = ?".to_string()];
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(self.dataset_id.clone())];

        if let Some(split) = &self.split {
            conds.push("s.split = ?".to_string());
            params.push(Box::new(split.clone()));
        }

        if let Some(category) = &self.category {
            join.push_str(
                " JOIN annotations ca ON ca.dataset_id = s.dataset_id AND ca.sample_id = s.id",
            );
            conds.push("ca.category_name = ?".to_string());
            params.push(Box::new(category.clone()));
        }

        if let Some(needle) = &self.file_name_contains {
            conds.push("lower(s.file_name) LIKE ?".to_string());
            params.push(Box::new(format!("%{}%", needle.to_lowercase())));
        }

        // tags is a JSON-array string column (e.g. `["a","b"]`); matching
        // the quoted element avoids a dependency on DuckDB's json extension.
        for tag in &self.tags {
            conds.push("s.tags LIKE ?".to_string());
            params.push(Box::new(format!("%\"{tag}\"%")));
        }

        if let Some(ids) = &self.id_allow_list {
            if ids.is_empty() {
                conds.push("FALSE".to_string());
            } else {
                let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                conds.push(format!("s.id IN ({placeholders})"));
                for id in ids {
                    params.push(Box::new(id.clone()));
                }
            }
        }

        if let Some(source) = &self.annotation_source {
            join.push_str(
                " JOIN annotations sa ON sa.dataset_id = s.dataset_id AND sa.sample_id = s.id",
            );
            conds.push("sa.source = ?".to_string());
            params.push(Box::new(source.clone()));
        }

        let sort_col = self
            .sort_by
            .as_deref()
            .filter(|c| SORTABLE_COLUMNS.contains(c))
            .unwrap_or("id");
        let direction = if self.sort_desc { "DESC" } else { "ASC" };

        BuiltFilter {
            join_clause: join,
            where_clause: conds.join(" AND "),
            order_clause: format!("s.{sort_col} {direction}"),
            params,
        }
    }
}

impl BuiltFilter {
    pub fn param_refs(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

/// `ToSqlOutput` is re-exported for callers building ad-hoc predicates
/// outside `SampleFilter` (e.g. the evaluator's per-source queries).
pub type SqlValue<'a> = ToSqlOutput<'a>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_id_is_always_present() {
        let built = SampleFilter::new("d1").build();
        assert!(built.where_clause.contains("s.dataset_id = ?"));
        assert_eq!(built.params.len(), 1);
    }

    #[test]
    fn unknown_sort_column_falls_back_to_id_asc() {
        let mut filter = SampleFilter::new("d1");
        filter.sort_by = Some("not_a_column".to_string());
        let built = filter.build();
        assert_eq!(built.order_clause, "s.id ASC");
    }

    #[test]
    fn recognised_sort_column_is_honoured() {
        let mut filter = SampleFilter::new("d1");
        filter.sort_by = Some("width".to_string());
        filter.sort_desc = true;
        let built = filter.build();
        assert_eq!(built.order_clause, "s.width DESC");
    }

    #[test]
    fn empty_id_allow_list_yields_no_rows() {
        let mut filter = SampleFilter::new("d1");
        filter.id_allow_list = Some(vec![]);
        let built = filter.build();
        assert!(built.where_clause.contains("FALSE"));
    }

    #[test]
    fn category_filter_adds_join_and_param() {
        let mut filter = SampleFilter::new("d1");
        filter.category = Some("car".to_string());
        let built = filter.build();
        assert!(built.join_clause.contains("JOIN annotations"));
        assert_eq!(built.params.len(), 2);
    }

    #[test]
    fn tag_filters_are_anded() {
        let mut filter = SampleFilter::new("d1");
        filter.tags = vec!["triage:fp".to_string(), "reviewed".to_string()];
        let built = filter.build();
        assert_eq!(built.where_clause.matches("s.tags LIKE ?").count(), 2);
        assert_eq!(built.params.len(), 3);
    }
}
