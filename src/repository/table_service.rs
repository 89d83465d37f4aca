use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, PgExecutor, PgPool, Postgres, QueryBuilder, Row};

use crate::{db::map_db_error, error::AppError};

const ALLOWED_TABLES: &[&str] = &[
    "blog_posts",
    "maintenance_requests",
    "owner_profiles",
    "payment_history",
    "properties",
    "tenant_profiles",
    "tickets",
    "units",
    "users",
];

pub async fn list_rows(
    pool: &PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    query.push(" ORDER BY t.").push(order_name);
    query.push(if ascending { " ASC" } else { " DESC" });
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, 1000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn get_row(
    pool: &PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    find_row(pool, table, row_id, id_field)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} record not found.", table.trim())))
}

pub async fn find_row(
    pool: &PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Option<Value>, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_scalar_filter(
        &mut query,
        id_name,
        &infer_scalar_filter(id_name, &Value::String(row_id.to_string())),
    );
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
    Ok(row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten()))
}

/// Inserts one row. Runs on a pool or inside a transaction (`&mut *tx`).
pub async fn create_row<'e, E>(
    executor: E,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError>
where
    E: PgExecutor<'e>,
{
    let table_name = validate_table(table)?;
    let mut query = build_insert(table_name, payload, None)?;
    let row = query
        .build()
        .fetch_optional(executor)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

/// Inserts, or on a `conflict_column` clash overwrites the supplied columns.
pub async fn upsert_row(
    pool: &PgPool,
    table: &str,
    payload: &Map<String, Value>,
    conflict_column: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let conflict_name = validate_identifier(conflict_column)?;
    let mut query = build_insert(table_name, payload, Some(conflict_name))?;
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not save {table_name} record.")))
}

pub async fn update_row(
    pool: &PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;
    let mut query = build_update(table_name, payload)?;
    query.push(" WHERE ");
    push_scalar_filter(
        &mut query,
        id_name,
        &infer_scalar_filter(id_name, &Value::String(row_id.to_string())),
    );
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn delete_row(
    pool: &PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let existing = get_row(pool, table, row_id, id_field).await?;
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE ");
    push_scalar_filter(
        &mut query,
        id_name,
        &infer_scalar_filter(id_name, &Value::String(row_id.to_string())),
    );
    query.build().execute(pool).await.map_err(map_db_error)?;

    Ok(existing)
}

// jsonb_populate_record lets PostgreSQL resolve column types (uuid, numeric,
// jsonb, boolean) from the table definition.
fn build_insert<'a>(
    table_name: &'a str,
    payload: &Map<String, Value>,
    conflict_column: Option<&str>,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }
    let keys = sorted_columns(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" AS t (");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(*key);
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push("r.");
            separated.push_unseparated(*key);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r");

    if let Some(conflict) = conflict_column {
        query.push(" ON CONFLICT (").push(conflict).push(") DO UPDATE SET ");
        let mut separated = query.separated(", ");
        for key in keys.iter().filter(|key| **key != conflict) {
            separated.push(*key);
            separated.push_unseparated(" = EXCLUDED.");
            separated.push_unseparated(*key);
        }
        if keys.iter().all(|key| *key == conflict) {
            separated.push(conflict);
            separated.push_unseparated(" = EXCLUDED.");
            separated.push_unseparated(conflict);
        }
    }
    query.push(" RETURNING row_to_json(t) AS row");
    Ok(query)
}

fn build_update<'a>(
    table_name: &'a str,
    payload: &Map<String, Value>,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    let keys = sorted_columns(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(*key);
            separated.push_unseparated(" = r.");
            separated.push_unseparated(*key);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r");
    Ok(query)
}

fn sorted_columns(payload: &Map<String, Value>) -> Result<Vec<&str>, AppError> {
    let mut keys = payload
        .keys()
        .map(|key| validate_identifier(key))
        .collect::<Result<Vec<_>, _>>()?;
    keys.sort_unstable();
    Ok(keys)
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    let well_formed = trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    }) && !trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_digit());
    if !well_formed {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

#[derive(Debug, Clone, PartialEq)]
enum ScalarFilter {
    Text(String),
    Uuid(uuid::Uuid),
    Bool(bool),
    I64(i64),
}

#[derive(Debug, Clone, PartialEq)]
enum ArrayFilter {
    Text(Vec<String>),
    Uuid(Vec<uuid::Uuid>),
}

impl ArrayFilter {
    fn is_empty(&self) -> bool {
        match self {
            Self::Text(values) => values.is_empty(),
            Self::Uuid(values) => values.is_empty(),
        }
    }
}

/// `column` matches by equality, `column__in` (or an array value) by
/// membership and `column__is_null` by nullness.
fn push_filter_clause(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    if let Some(column) = filter_key.strip_suffix("__is_null") {
        let column = validate_identifier(column)?;
        query.push(" AND t.").push(column);
        query.push(if value.as_bool().unwrap_or(true) {
            " IS NULL"
        } else {
            " IS NOT NULL"
        });
        return Ok(());
    }

    let column = validate_identifier(filter_key.strip_suffix("__in").unwrap_or(filter_key))?;
    match value {
        Value::Null => Ok(()),
        Value::Array(items) => {
            let filter = infer_array_filter(column, items);
            if filter.is_empty() {
                // Membership in an empty set matches nothing.
                query.push(" AND FALSE");
                return Ok(());
            }
            query.push(" AND ");
            push_array_filter(query, column, &filter);
            Ok(())
        }
        _ => {
            query.push(" AND ");
            push_scalar_filter(query, column, &infer_scalar_filter(column, value));
            Ok(())
        }
    }
}

fn push_scalar_filter(query: &mut QueryBuilder<Postgres>, column: &str, value: &ScalarFilter) {
    query.push("t.").push(column);
    match value {
        ScalarFilter::Text(text) => {
            query.push("::text = ").push_bind(text.clone());
        }
        ScalarFilter::Uuid(id) => {
            query.push(" = ").push_bind(*id);
        }
        ScalarFilter::Bool(flag) => {
            query.push(" = ").push_bind(*flag);
        }
        ScalarFilter::I64(number) => {
            query.push(" = ").push_bind(*number);
        }
    }
}

fn push_array_filter(query: &mut QueryBuilder<Postgres>, column: &str, value: &ArrayFilter) {
    query.push("t.").push(column);
    match value {
        ArrayFilter::Text(values) => {
            query
                .push("::text = ANY(")
                .push_bind(values.clone())
                .push(")");
        }
        ArrayFilter::Uuid(values) => {
            query.push(" = ANY(").push_bind(values.clone()).push(")");
        }
    }
}

fn infer_scalar_filter(column: &str, value: &Value) -> ScalarFilter {
    match value {
        Value::Bool(flag) => ScalarFilter::Bool(*flag),
        Value::Number(number) => number
            .as_i64()
            .map(ScalarFilter::I64)
            .unwrap_or_else(|| ScalarFilter::Text(number.to_string())),
        Value::String(text) => {
            if is_uuid_identifier(column) {
                if let Ok(parsed) = uuid::Uuid::parse_str(text.trim()) {
                    return ScalarFilter::Uuid(parsed);
                }
            }
            ScalarFilter::Text(text.clone())
        }
        other => ScalarFilter::Text(other.to_string()),
    }
}

fn infer_array_filter(column: &str, values: &[Value]) -> ArrayFilter {
    if is_uuid_identifier(column) {
        let parsed = values
            .iter()
            .map(|value| value.as_str().and_then(|text| uuid::Uuid::parse_str(text.trim()).ok()))
            .collect::<Option<Vec<_>>>();
        if let Some(ids) = parsed {
            return ArrayFilter::Uuid(ids);
        }
    }
    ArrayFilter::Text(
        values
            .iter()
            .map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect(),
    )
}

fn is_uuid_identifier(identifier: &str) -> bool {
    let normalized = identifier.trim();
    normalized == "id" || normalized.ends_with("_id")
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};
    use sqlx::{Postgres, QueryBuilder};

    use super::{
        build_insert, build_update, infer_array_filter, infer_scalar_filter, push_filter_clause,
        validate_identifier, validate_table, ArrayFilter, ScalarFilter,
    };
    use crate::error::AppError;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object payload")
    }

    #[test]
    fn rejects_unknown_tables_and_odd_identifiers() {
        assert!(validate_table("units").is_ok());
        assert!(matches!(
            validate_table("invoices"),
            Err(AppError::Forbidden(_))
        ));
        assert!(validate_identifier("tenant_id").is_ok());
        assert!(validate_identifier("tenant-id").is_err());
        assert!(validate_identifier("1column").is_err());
        assert!(validate_identifier("Name").is_err());
        assert!(validate_identifier("  ").is_err());
    }

    #[test]
    fn insert_sql_uses_jsonb_populate_record() {
        let record = payload(json!({
            "number": "A-1",
            "property_id": "550e8400-e29b-41d4-a716-446655440000",
            "rent": 1000
        }));
        let query = build_insert("units", &record, None).expect("query");
        let sql = query.sql();
        assert!(
            sql.starts_with("INSERT INTO units AS t (number, property_id, rent) SELECT r.number, r.property_id, r.rent"),
            "unexpected SQL: {sql}"
        );
        assert!(sql.contains("jsonb_populate_record(NULL::units, $1) r"));
        assert!(sql.ends_with("RETURNING row_to_json(t) AS row"));
    }

    #[test]
    fn upsert_sql_overwrites_everything_but_the_key() {
        let record = payload(json!({ "user_id": "u", "address": "x", "id_proof": "y" }));
        let query = build_insert("tenant_profiles", &record, Some("user_id")).expect("query");
        let sql = query.sql();
        assert!(
            sql.contains(
                "ON CONFLICT (user_id) DO UPDATE SET address = EXCLUDED.address, id_proof = EXCLUDED.id_proof RETURNING"
            ),
            "unexpected SQL: {sql}"
        );
    }

    #[test]
    fn update_sql_assigns_from_populated_record() {
        let record = payload(json!({ "rent": 1200, "number": "B-2" }));
        let query = build_update("units", &record).expect("query");
        assert!(query
            .sql()
            .starts_with("UPDATE units t SET number = r.number, rent = r.rent FROM jsonb_populate_record(NULL::units, $1) r"));
        assert!(matches!(
            build_update("units", &Map::new()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn infers_filter_types_from_column_names() {
        let id = "550e8400-e29b-41d4-a716-446655440000";
        assert!(matches!(
            infer_scalar_filter("owner_id", &json!(id)),
            ScalarFilter::Uuid(_)
        ));
        assert_eq!(
            infer_scalar_filter("status", &json!("open")),
            ScalarFilter::Text("open".to_string())
        );
        assert_eq!(infer_scalar_filter("rooms", &json!(2)), ScalarFilter::I64(2));
        assert!(matches!(
            infer_array_filter("unit_id", &[json!(id)]),
            ArrayFilter::Uuid(ids) if ids.len() == 1
        ));
        assert!(matches!(
            infer_array_filter("unit_id", &[json!("nope")]),
            ArrayFilter::Text(_)
        ));
    }

    #[test]
    fn filter_clauses() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM units t WHERE 1=1");
        push_filter_clause(&mut query, "tenant_id__is_null", &json!(false)).expect("is_null");
        push_filter_clause(&mut query, "unit_id__in", &json!([])).expect("empty in");
        push_filter_clause(&mut query, "status", &json!("open")).expect("eq");
        assert_eq!(
            query.sql(),
            "SELECT 1 FROM units t WHERE 1=1 AND t.tenant_id IS NOT NULL AND FALSE AND t.status::text = $1"
        );
    }
}
