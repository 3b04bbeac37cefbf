//! Table and column names of the work-item relation, plus the SQL built from them.
//!
//! Identifiers come from configuration and end up spliced into statements, so
//! every name is checked against a conservative identifier grammar first.

use adprompt_core::{DomainError, DomainResult};

/// Names of the table and of every column the job touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkTable {
    table: String,
    id: String,
    title: String,
    payload: String,
    ready: String,
    claim: String,
    result: String,
    updated_at: String,
}

impl Default for WorkTable {
    fn default() -> Self {
        Self {
            table: "products_ai".to_string(),
            id: "id".to_string(),
            title: "title".to_string(),
            payload: "image_data".to_string(),
            ready: "image_status".to_string(),
            claim: "crawl_status".to_string(),
            result: "prompt_veo3".to_string(),
            updated_at: "updated_at".to_string(),
        }
    }
}

/// Builder-style overrides for [`WorkTable`]; `None` keeps the default name.
#[derive(Debug, Clone, Default)]
pub struct WorkTableOverrides {
    pub table: Option<String>,
    pub id: Option<String>,
    pub title: Option<String>,
    pub payload: Option<String>,
    pub ready: Option<String>,
    pub claim: Option<String>,
    pub result: Option<String>,
    pub updated_at: Option<String>,
}

impl WorkTable {
    /// Default names with the given overrides applied, all validated.
    pub fn with_overrides(overrides: WorkTableOverrides) -> DomainResult<Self> {
        let defaults = Self::default();
        let table = Self {
            table: overrides.table.unwrap_or(defaults.table),
            id: overrides.id.unwrap_or(defaults.id),
            title: overrides.title.unwrap_or(defaults.title),
            payload: overrides.payload.unwrap_or(defaults.payload),
            ready: overrides.ready.unwrap_or(defaults.ready),
            claim: overrides.claim.unwrap_or(defaults.claim),
            result: overrides.result.unwrap_or(defaults.result),
            updated_at: overrides.updated_at.unwrap_or(defaults.updated_at),
        };
        table.validate()?;
        Ok(table)
    }

    /// Same columns, different table. Used by integration tests to isolate runs.
    pub fn for_table(table: impl Into<String>) -> DomainResult<Self> {
        Self::with_overrides(WorkTableOverrides {
            table: Some(table.into()),
            ..Default::default()
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn result_column(&self) -> &str {
        &self.result
    }

    fn validate(&self) -> DomainResult<()> {
        validate_qualified(&self.table)?;
        for column in [
            &self.id,
            &self.title,
            &self.payload,
            &self.ready,
            &self.claim,
            &self.result,
            &self.updated_at,
        ] {
            validate_identifier(column)?;
        }
        Ok(())
    }

    /// Claim up to `$1` eligible rows and return their original values.
    ///
    /// The inner `FOR UPDATE SKIP LOCKED` keeps concurrent claimers disjoint.
    pub fn claim_sql(&self) -> String {
        let Self {
            table,
            id,
            title,
            payload,
            ready,
            claim,
            result,
            ..
        } = self;
        format!(
            "UPDATE {table} SET {claim} = TRUE \
             WHERE {id} IN ( \
                 SELECT {id} FROM {table} \
                 WHERE {result} IS NULL AND {ready} = TRUE AND {claim} IS NULL \
                 ORDER BY {id} ASC \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {id}::bigint AS id, {title}::text AS title, {payload}::text AS payload"
        )
    }

    /// Fill the result of row `$2` with `$1`, only while it is still empty.
    pub fn persist_sql(&self) -> String {
        let Self {
            table,
            id,
            result,
            updated_at,
            ..
        } = self;
        format!(
            "UPDATE {table} SET {result} = $1, {updated_at} = NOW() \
             WHERE {id} = $2 AND {result} IS NULL"
        )
    }

    /// Whether row `$1` exists, and whether it already has a result.
    pub fn lookup_sql(&self) -> String {
        let Self {
            table, id, result, ..
        } = self;
        format!("SELECT ({result} IS NOT NULL) AS completed FROM {table} WHERE {id} = $1")
    }

    /// Set the claim flag of row `$2` to `$1` (NULL releases), only for rows
    /// that are claimed and still without a result.
    pub fn settle_sql(&self) -> String {
        let Self {
            table,
            id,
            claim,
            result,
            updated_at,
            ..
        } = self;
        format!(
            "UPDATE {table} SET {claim} = $1, {updated_at} = NOW() \
             WHERE {id} = $2 AND {claim} = TRUE AND {result} IS NULL"
        )
    }
}

fn validate_identifier(name: &str) -> DomainResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "'{name}' is not a valid SQL identifier"
        )))
    }
}

fn validate_qualified(name: &str) -> DomainResult<()> {
    match name.split_once('.') {
        Some((schema, table)) => {
            validate_identifier(schema)?;
            validate_identifier(table)
        }
        None => validate_identifier(name),
    }
}
