//! Table-level operations on arbitrary store tables.
//!
//! The backup archiver uses these to capture and replay tables a plugin
//! owns without knowing anything about their schema. Table names are
//! validated identifiers before they reach SQL; column names come from the
//! store and are quoted.

use plugctl_core::models::validate_identifier;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params, params_from_iter, ToSql};
use serde::{Deserialize, Serialize};

use crate::{Db, DbError};

/// One SQLite value, typed the way the store reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(#[serde(with = "real_cell")] f64),
    Text(String),
    /// TEXT whose bytes are not valid UTF-8, kept as stored.
    #[serde(rename = "raw_text")]
    RawText(Vec<u8>),
    Blob(Vec<u8>),
}

impl From<ValueRef<'_>> for CellValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(v) => Self::Integer(v),
            ValueRef::Real(v) => Self::Real(v),
            ValueRef::Text(v) => match std::str::from_utf8(v) {
                Ok(text) => Self::Text(text.to_string()),
                Err(_) => Self::RawText(v.to_vec()),
            },
            ValueRef::Blob(v) => Self::Blob(v.to_vec()),
        }
    }
}

impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Self::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Self::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Self::RawText(v) => ToSqlOutput::Borrowed(ValueRef::Text(v)),
            Self::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

/// JSON numbers cannot hold infinities or NaN; those travel as strings.
mod real_cell {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("nan")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Word(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Word(word) => match word.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => Err(de::Error::invalid_value(
                    de::Unexpected::Str(other),
                    &"a number, \"inf\", \"-inf\" or \"nan\"",
                )),
            },
        }
    }
}

/// Schema and full contents of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCapture {
    pub name: String,
    pub create_sql: String,
    #[serde(default)]
    pub index_sql: Vec<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl TableCapture {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

pub struct TableStore<'a> {
    db: &'a Db,
}

impl<'a> TableStore<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, DbError> {
        let exists: bool = self.db.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// User tables, sorted by name.
    pub fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self.db.conn().prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn row_count(&self, table: &str) -> Result<i64, DbError> {
        let quoted = self.checked(table)?;
        let count: i64 =
            self.db
                .conn()
                .query_row(&format!("SELECT COUNT(*) FROM {quoted}"), [], |row| {
                    row.get(0)
                })?;
        Ok(count)
    }

    /// Reads the CREATE statement, index statements and every row.
    pub fn capture(&self, table: &str) -> Result<TableCapture, DbError> {
        let quoted = self.checked(table)?;
        let create_sql: String = self.db.conn().query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;

        let mut stmt = self.db.conn().prepare(
            "SELECT sql FROM sqlite_master
             WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL
             ORDER BY name",
        )?;
        let index_rows = stmt.query_map(params![table], |row| row.get::<_, String>(0))?;
        let mut index_sql = Vec::new();
        for row in index_rows {
            index_sql.push(row?);
        }

        let columns = self.stored_columns(&quoted)?;
        if columns.is_empty() {
            return Err(DbError::Validation(format!(
                "table {table} has no stored columns"
            )));
        }
        let select_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let mut stmt = self.db.conn().prepare(&format!(
            "SELECT {} FROM {quoted}",
            select_list.join(", ")
        ))?;
        let mut rows = stmt.query([])?;
        let mut data = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(CellValue::from(row.get_ref(idx)?));
            }
            data.push(values);
        }

        Ok(TableCapture {
            name: table.to_string(),
            create_sql,
            index_sql,
            columns,
            rows: data,
        })
    }

    /// Drops the table; returns whether it existed.
    pub fn drop_table(&self, table: &str) -> Result<bool, DbError> {
        validate_identifier(table)?;
        if !self.table_exists(table)? {
            return Ok(false);
        }
        self.db
            .conn()
            .execute_batch(&format!("DROP TABLE {}", quote_ident(table)))?;
        Ok(true)
    }

    /// Recreates every captured table from scratch and reloads its rows, all
    /// inside one transaction. Existing tables with the same name are
    /// replaced. Nothing changes if any statement fails.
    pub fn restore(&self, captures: &[TableCapture]) -> Result<(), DbError> {
        for capture in captures {
            validate_identifier(&capture.name)?;
        }
        self.db.atomic(|db| {
            for capture in captures {
                restore_one(db, capture)?;
            }
            Ok(())
        })
    }

    /// Columns that hold written values, in declaration order. Generated
    /// columns are recomputed by SQLite and cannot be inserted into.
    fn stored_columns(&self, quoted: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self
            .db
            .conn()
            .prepare(&format!("PRAGMA table_xinfo({quoted})"))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>("name")?, row.get::<_, i64>("hidden")?))
        })?;
        let mut columns = Vec::new();
        for row in rows {
            let (name, hidden) = row?;
            if hidden == 0 {
                columns.push(name);
            }
        }
        Ok(columns)
    }

    fn checked(&self, table: &str) -> Result<String, DbError> {
        validate_identifier(table)?;
        if !self.table_exists(table)? {
            return Err(DbError::TableNotFound(table.to_string()));
        }
        Ok(quote_ident(table))
    }
}

fn restore_one(db: &Db, capture: &TableCapture) -> Result<(), DbError> {
    let quoted = quote_ident(&capture.name);
    let conn = db.conn();
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {quoted}"))?;
    conn.execute_batch(&capture.create_sql)?;

    if !capture.rows.is_empty() {
        let columns: Vec<String> = capture.columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {quoted} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        for (line, row) in capture.rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DbError::Validation(format!(
                    "table {}: row {line} has {} values for {} columns",
                    capture.name,
                    row.len(),
                    columns.len()
                )));
            }
            stmt.execute(params_from_iter(row.iter()))?;
        }
    }

    for index in &capture.index_sql {
        conn.execute_batch(index)?;
    }
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn non_finite_reals_survive_json() {
        let cells = vec![
            CellValue::Real(f64::INFINITY),
            CellValue::Real(f64::NEG_INFINITY),
            CellValue::Real(2.5),
        ];
        let json = match serde_json::to_string(&cells) {
            Ok(json) => json,
            Err(err) => panic!("encode: {err}"),
        };
        assert!(json.contains(r#""value":"inf""#), "{json}");
        let back: Vec<CellValue> = match serde_json::from_str(&json) {
            Ok(back) => back,
            Err(err) => panic!("decode: {err}"),
        };
        assert_eq!(back, cells);

        let nan: CellValue = match serde_json::from_str(r#"{"type":"real","value":"nan"}"#) {
            Ok(cell) => cell,
            Err(err) => panic!("decode nan: {err}"),
        };
        assert!(matches!(nan, CellValue::Real(v) if v.is_nan()));
        assert!(serde_json::from_str::<CellValue>(r#"{"type":"real","value":"huge"}"#).is_err());
    }

    #[test]
    fn invalid_utf8_text_is_kept_as_bytes() {
        let bytes: &[u8] = &[0x66, 0xff, 0x6f];
        assert_eq!(
            CellValue::from(ValueRef::Text(bytes)),
            CellValue::RawText(bytes.to_vec())
        );
        assert_eq!(
            CellValue::from(ValueRef::Text(b"plain")),
            CellValue::Text("plain".into())
        );
    }

    #[test]
    fn cell_value_json_is_tagged() {
        let json = match serde_json::to_string(&vec![
            CellValue::Null,
            CellValue::Integer(3),
            CellValue::Text("x".into()),
        ]) {
            Ok(json) => json,
            Err(err) => panic!("encode: {err}"),
        };
        assert_eq!(
            json,
            r#"[{"type":"null"},{"type":"integer","value":3},{"type":"text","value":"x"}]"#
        );
    }
}
