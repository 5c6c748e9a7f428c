// versioned_store/src/query.rs

use serde_json::Value;

/// Boolean predicate tree over indexed document fields. Field names use
/// the documents' camelCase wire names; dotted names address nested
/// objects (`additionalFields.owlExpression`, `attr.all`).
#[derive(Debug, Clone, Default)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub must_not: Vec<Query>,
    pub should: Vec<Query>,
}

impl BoolQuery {
    pub fn new() -> Self {
        BoolQuery::default()
    }

    pub fn must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    pub fn must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn should(mut self, query: Query) -> Self {
        self.should.push(query);
        self
    }

    pub fn build(self) -> Query {
        Query::Bool(Box::new(self))
    }
}

#[derive(Debug, Clone)]
pub enum Query {
    MatchAll,
    Term { field: String, value: Value },
    Terms { field: String, values: Vec<Value> },
    Range { field: String, gt: Option<i64>, gte: Option<i64>, lt: Option<i64>, lte: Option<i64> },
    Exists { field: String },
    Bool(Box<BoolQuery>),
}

pub fn term<V: Into<Value>>(field: &str, value: V) -> Query {
    Query::Term {
        field: field.to_string(),
        value: value.into(),
    }
}

pub fn terms<V: Into<Value>, I: IntoIterator<Item = V>>(field: &str, values: I) -> Query {
    Query::Terms {
        field: field.to_string(),
        values: values.into_iter().map(Into::into).collect(),
    }
}

pub fn range_gt(field: &str, value: i64) -> Query {
    Query::Range {
        field: field.to_string(),
        gt: Some(value),
        gte: None,
        lt: None,
        lte: None,
    }
}

pub fn range_gte(field: &str, value: i64) -> Query {
    Query::Range {
        field: field.to_string(),
        gt: None,
        gte: Some(value),
        lt: None,
        lte: None,
    }
}

pub fn range_lte(field: &str, value: i64) -> Query {
    Query::Range {
        field: field.to_string(),
        gt: None,
        gte: None,
        lt: None,
        lte: Some(value),
    }
}

pub fn exists(field: &str) -> Query {
    Query::Exists {
        field: field.to_string(),
    }
}

pub fn not_exists(field: &str) -> Query {
    BoolQuery::new().must_not(exists(field)).build()
}

impl Query {
    /// Evaluate the predicate against one document.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Query::MatchAll => true,
            Query::Term { field, value } => {
                field_values(doc, field).iter().any(|v| values_equal(v, value))
            }
            Query::Terms { field, values } => {
                let resolved = field_values(doc, field);
                resolved.iter().any(|v| values.iter().any(|qv| values_equal(v, qv)))
            }
            Query::Range { field, gt, gte, lt, lte } => field_values(doc, field)
                .iter()
                .filter_map(|v| value_as_i64(v))
                .any(|n| {
                    gt.map_or(true, |bound| n > bound)
                        && gte.map_or(true, |bound| n >= bound)
                        && lt.map_or(true, |bound| n < bound)
                        && lte.map_or(true, |bound| n <= bound)
                }),
            Query::Exists { field } => !field_values(doc, field).is_empty(),
            Query::Bool(bool_query) => {
                bool_query.must.iter().all(|q| q.matches(doc))
                    && !bool_query.must_not.iter().any(|q| q.matches(doc))
                    && (bool_query.should.is_empty() || bool_query.should.iter().any(|q| q.matches(doc)))
            }
        }
    }
}

/// Resolve a (possibly dotted) field name to its scalar values. Arrays are
/// flattened one level, so a `terms` query against an array field matches
/// any element.
fn field_values<'a>(doc: &'a Value, field: &str) -> Vec<&'a Value> {
    let mut current = doc;
    for segment in field.split('.') {
        match current.get(segment) {
            Some(value) => current = value,
            None => return Vec::new(),
        }
    }
    match current {
        Value::Null => Vec::new(),
        Value::Array(elements) => elements.iter().filter(|v| !v.is_null()).collect(),
        other => vec![other],
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.parse::<i64>().ok(),
        _ => None,
    }
}

/// Equality with number/string coercion, so queries may address numeric
/// identifiers either way.
fn values_equal(doc_value: &Value, query_value: &Value) -> bool {
    if doc_value == query_value {
        return true;
    }
    match (doc_value, query_value) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            stringified(doc_value) == stringified(query_value)
        }
        _ => false,
    }
}

fn stringified(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bool_query_requires_all_must_and_one_should() {
        let doc = json!({"active": true, "typeId": "116680003", "sourceId": "100"});
        let query = BoolQuery::new()
            .must(term("active", true))
            .must(
                BoolQuery::new()
                    .should(term("sourceId", "100"))
                    .should(term("destinationId", "100"))
                    .build(),
            )
            .build();
        assert!(query.matches(&doc));

        let inactive = json!({"active": false, "sourceId": "100"});
        assert!(!query.matches(&inactive));
    }

    #[test]
    fn terms_match_array_fields_and_coerce_numbers() {
        let doc = json!({"attr": {"all": [100000, 116680003]}});
        assert!(terms("attr.all", vec![100000_i64]).matches(&doc));
        assert!(term("attr.all", "116680003").matches(&doc));
        assert!(!terms("attr.all", vec![999_i64]).matches(&doc));
    }

    #[test]
    fn range_and_exists_handle_missing_fields() {
        let released = json!({"effectiveTime": 20230131});
        let unreleased = json!({"active": true});
        assert!(range_gte("effectiveTime", 20230131).matches(&released));
        assert!(!range_gt("effectiveTime", 20230131).matches(&released));
        assert!(!range_gte("effectiveTime", 1).matches(&unreleased));
        assert!(not_exists("effectiveTime").matches(&unreleased));
        assert!(!not_exists("effectiveTime").matches(&released));
    }
}
