use crate::catalog::{ProductGroup, ProductRecord};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, Row, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ','now')";

pub struct CatalogStore {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    pub id: String,
    pub code: String,
    pub name: String,
    pub timezone: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

/// Partial update of a store; `None` leaves the column as it is.
#[derive(Debug, Clone, Default)]
pub struct StoreChanges {
    pub code: Option<String>,
    pub name: Option<String>,
    pub timezone: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalRole {
    Admin,
    Manager,
    Associate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StoreRole {
    Associate,
    Manager,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub role: GlobalRole,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == GlobalRole::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProduct {
    pub id: String,
    #[serde(flatten)]
    pub record: ProductRecord,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfMetadata {
    pub id: String,
    pub store_id: String,
    pub page_count: i64,
    pub title: Option<String>,
    pub file_name: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: Option<String>,
}

/// Body of `POST /api/pdf-metadata`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfMetadataInput {
    #[serde(default)]
    pub page_count: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub store_id: Option<&'a str>,
    pub user_id: &'a str,
    pub action: &'a str,
    pub entity: &'a str,
    pub entity_id: Option<&'a str>,
    pub payload: Option<serde_json::Value>,
}

impl CatalogStore {
    /// Open (or create) the SQLite database and make sure the schema exists.
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        Self::init(Connection::open(db_path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqliteResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS stores (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                timezone TEXT NOT NULL DEFAULT 'America/Los_Angeles',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT ({NOW}),
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL DEFAULT 'associate',
                created_at TEXT NOT NULL DEFAULT ({NOW})
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token_hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL DEFAULT ({NOW})
            );

            CREATE TABLE IF NOT EXISTS user_stores (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                store_id TEXT NOT NULL REFERENCES stores(id) ON DELETE CASCADE,
                role TEXT NOT NULL DEFAULT 'ASSOCIATE'
                    CHECK (role IN ('ASSOCIATE', 'MANAGER', 'ADMIN')),
                created_at TEXT NOT NULL DEFAULT ({NOW}),
                UNIQUE (user_id, store_id)
            );

            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                product_number TEXT NOT NULL UNIQUE,
                product_name TEXT NOT NULL,
                unit TEXT NOT NULL,
                w38 TEXT NOT NULL,
                w39 TEXT NOT NULL,
                w40 TEXT NOT NULL,
                w41 TEXT NOT NULL,
                conversion TEXT,
                grp TEXT,
                created_at TEXT NOT NULL DEFAULT ({NOW}),
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS pdf_metadata (
                id TEXT PRIMARY KEY,
                store_id TEXT NOT NULL UNIQUE REFERENCES stores(id) ON DELETE CASCADE,
                page_count INTEGER NOT NULL DEFAULT 0,
                title TEXT,
                file_name TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL DEFAULT ({NOW}),
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS audit_events (
                id TEXT PRIMARY KEY,
                store_id TEXT,
                user_id TEXT NOT NULL,
                action TEXT NOT NULL,
                entity TEXT NOT NULL,
                entity_id TEXT,
                payload TEXT,
                created_at TEXT NOT NULL DEFAULT ({NOW})
            );

            CREATE INDEX IF NOT EXISTS idx_products_group ON products(grp);
            CREATE INDEX IF NOT EXISTS idx_user_stores_store ON user_stores(store_id, role);
            CREATE INDEX IF NOT EXISTS idx_audit_store ON audit_events(store_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_events(entity, entity_id);"
        ))?;

        info!("Database initialized successfully");
        Ok(Self { conn })
    }

    /// SHA-256 of a session token; only the hash is stored.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    // ------------------------------------------------------------------
    // Stores
    // ------------------------------------------------------------------

    pub fn create_store(
        &self,
        code: &str,
        name: &str,
        timezone: Option<&str>,
        is_active: bool,
    ) -> SqliteResult<Store> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO stores (id, code, name, timezone, is_active)
             VALUES (?1, ?2, ?3, COALESCE(?4, 'America/Los_Angeles'), ?5)",
            params![id, code, name, timezone, is_active],
        )?;
        info!(store_id = %id, code = %code, "Store created");
        self.get_store(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_store(&self, id: &str) -> SqliteResult<Option<Store>> {
        self.conn
            .query_row(
                "SELECT id, code, name, timezone, is_active, created_at, updated_at
                 FROM stores WHERE id = ?1",
                params![id],
                Self::row_to_store,
            )
            .optional()
    }

    pub fn get_store_by_code(&self, code: &str) -> SqliteResult<Option<Store>> {
        self.conn
            .query_row(
                "SELECT id, code, name, timezone, is_active, created_at, updated_at
                 FROM stores WHERE code = ?1",
                params![code],
                Self::row_to_store,
            )
            .optional()
    }

    /// One page of stores ordered by code, plus the total count. With
    /// `visible_to` only stores granted to that user are returned.
    pub fn list_stores(
        &self,
        visible_to: Option<&str>,
        page: u32,
        limit: u32,
    ) -> SqliteResult<(Vec<Store>, u64)> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);
        let filter = "(?1 IS NULL OR id IN (SELECT store_id FROM user_stores WHERE user_id = ?1))";

        let total: u64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM stores WHERE {filter}"),
            params![visible_to],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, code, name, timezone, is_active, created_at, updated_at
             FROM stores WHERE {filter}
             ORDER BY code LIMIT ?2 OFFSET ?3"
        ))?;
        let stores = stmt
            .query_map(params![visible_to, limit, offset], Self::row_to_store)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok((stores, total))
    }

    pub fn update_store(&self, id: &str, changes: &StoreChanges) -> SqliteResult<Option<Store>> {
        let updated = self.conn.execute(
            &format!(
                "UPDATE stores SET
                    code = COALESCE(?2, code),
                    name = COALESCE(?3, name),
                    timezone = COALESCE(?4, timezone),
                    is_active = COALESCE(?5, is_active),
                    updated_at = {NOW}
                 WHERE id = ?1"
            ),
            params![
                id,
                changes.code,
                changes.name,
                changes.timezone,
                changes.is_active
            ],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        info!(store_id = %id, "Store updated");
        self.get_store(id)
    }

    pub fn delete_store(&self, id: &str) -> SqliteResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM stores WHERE id = ?1", params![id])?;
        if deleted > 0 {
            info!(store_id = %id, "Store deleted");
        }
        Ok(deleted > 0)
    }

    fn row_to_store(row: &Row<'_>) -> SqliteResult<Store> {
        Ok(Store {
            id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            timezone: row.get(3)?,
            is_active: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    // ------------------------------------------------------------------
    // Users, sessions and store grants
    // ------------------------------------------------------------------

    pub fn create_user(&self, email: &str, role: GlobalRole) -> SqliteResult<User> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO users (id, email, role) VALUES (?1, ?2, ?3)",
            params![id, email, role.as_str()],
        )?;
        info!(user_id = %id, email = %email, role = %role, "User created");
        Ok(User {
            id,
            email: email.to_string(),
            role,
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> SqliteResult<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, email, role FROM users WHERE email = ?1",
                params![email],
                Self::row_to_user,
            )
            .optional()
    }

    /// Issue a new session token for the user. The plain token is returned
    /// once and never stored.
    pub fn create_session(&self, user_id: &str) -> SqliteResult<String> {
        let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        self.conn.execute(
            "INSERT INTO sessions (token_hash, user_id) VALUES (?1, ?2)",
            params![Self::hash_token(&token), user_id],
        )?;
        info!(user_id = %user_id, "Session issued");
        Ok(token)
    }

    pub fn user_for_session(&self, token: &str) -> SqliteResult<Option<User>> {
        self.conn
            .query_row(
                "SELECT u.id, u.email, u.role
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token_hash = ?1",
                params![Self::hash_token(token)],
                Self::row_to_user,
            )
            .optional()
    }

    fn row_to_user(row: &Row<'_>) -> SqliteResult<User> {
        let role: String = row.get(2)?;
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            role: role
                .parse()
                .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?,
        })
    }

    pub fn grant_store_access(
        &self,
        user_id: &str,
        store_id: &str,
        role: StoreRole,
    ) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO user_stores (id, user_id, store_id, role)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, store_id) DO UPDATE SET role = excluded.role",
            params![Uuid::new_v4().to_string(), user_id, store_id, role.as_str()],
        )?;
        info!(user_id = %user_id, store_id = %store_id, role = %role, "Store access granted");
        Ok(())
    }

    pub fn store_role(&self, user_id: &str, store_id: &str) -> SqliteResult<Option<StoreRole>> {
        let role: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM user_stores WHERE user_id = ?1 AND store_id = ?2",
                params![user_id, store_id],
                |row| row.get(0),
            )
            .optional()?;
        role.map(|r| {
            r.parse()
                .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into()))
        })
        .transpose()
    }

    // ------------------------------------------------------------------
    // Products
    // ------------------------------------------------------------------

    /// Insert or update a product keyed by its product number.
    pub fn upsert_product(&self, product: &ProductRecord) -> SqliteResult<StoredProduct> {
        let conversion = Some(product.conversion.as_str()).filter(|c| !c.is_empty());
        self.conn.execute(
            &format!(
                "INSERT INTO products
                    (id, product_number, product_name, unit, w38, w39, w40, w41, conversion, grp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(product_number) DO UPDATE SET
                    product_name = excluded.product_name,
                    unit = excluded.unit,
                    w38 = excluded.w38,
                    w39 = excluded.w39,
                    w40 = excluded.w40,
                    w41 = excluded.w41,
                    conversion = excluded.conversion,
                    grp = excluded.grp,
                    updated_at = {NOW}"
            ),
            params![
                Uuid::new_v4().to_string(),
                product.product_number,
                product.product_name,
                product.unit,
                product.w38,
                product.w39,
                product.w40,
                product.w41,
                conversion,
                product.group.as_str(),
            ],
        )?;
        self.get_product(&product.product_number)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn list_products(&self) -> SqliteResult<Vec<StoredProduct>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, product_number, product_name, unit, w38, w39, w40, w41, conversion, grp,
                    created_at, updated_at
             FROM products
             ORDER BY product_number ASC",
        )?;
        let rows = stmt.query_map([], Self::row_to_product)?;
        rows.collect()
    }

    /// Look a product up by row id or by product number.
    pub fn get_product(&self, id_or_number: &str) -> SqliteResult<Option<StoredProduct>> {
        self.conn
            .query_row(
                "SELECT id, product_number, product_name, unit, w38, w39, w40, w41, conversion, grp,
                        created_at, updated_at
                 FROM products
                 WHERE id = ?1 OR product_number = ?1",
                params![id_or_number],
                Self::row_to_product,
            )
            .optional()
    }

    /// Helper: map the 12-column product projection to `StoredProduct`.
    /// A missing or unknown group reads back as `Others`.
    fn row_to_product(row: &Row<'_>) -> SqliteResult<StoredProduct> {
        let conversion: Option<String> = row.get(8)?;
        let group: Option<String> = row.get(9)?;
        Ok(StoredProduct {
            id: row.get(0)?,
            record: ProductRecord {
                product_number: row.get(1)?,
                product_name: row.get(2)?,
                unit: row.get(3)?,
                w38: row.get(4)?,
                w39: row.get(5)?,
                w40: row.get(6)?,
                w41: row.get(7)?,
                conversion: conversion.unwrap_or_default(),
                group: group
                    .and_then(|g| g.parse().ok())
                    .unwrap_or(ProductGroup::Others),
            },
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    // ------------------------------------------------------------------
    // PDF metadata
    // ------------------------------------------------------------------

    pub fn pdf_metadata_for_store(&self, store_id: &str) -> SqliteResult<Option<PdfMetadata>> {
        self.conn
            .query_row(
                "SELECT id, store_id, page_count, title, file_name, metadata, created_at, updated_at
                 FROM pdf_metadata
                 WHERE store_id = ?1
                 ORDER BY created_at DESC
                 LIMIT 1",
                params![store_id],
                Self::row_to_pdf_metadata,
            )
            .optional()
    }

    /// Delete the store's previous metadata and insert the new record in a
    /// single transaction, so there is never more than one row per store.
    pub fn replace_pdf_metadata(
        &mut self,
        store_id: &str,
        input: &PdfMetadataInput,
    ) -> SqliteResult<PdfMetadata> {
        let id = Uuid::new_v4().to_string();
        let metadata = input
            .metadata
            .as_ref()
            .filter(|m| !m.is_null())
            .map(|m| m.to_string());

        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM pdf_metadata WHERE store_id = ?1",
            params![store_id],
        )?;
        tx.execute(
            "INSERT INTO pdf_metadata (id, store_id, page_count, title, file_name, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                store_id,
                input.page_count.unwrap_or(0),
                input.title,
                input.file_name,
                metadata,
            ],
        )?;
        tx.commit()?;

        info!(
            store_id = %store_id,
            removed,
            file_name = ?input.file_name,
            "PDF metadata replaced"
        );
        self.pdf_metadata_for_store(store_id)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    fn row_to_pdf_metadata(row: &Row<'_>) -> SqliteResult<PdfMetadata> {
        let metadata: Option<String> = row.get(5)?;
        Ok(PdfMetadata {
            id: row.get(0)?,
            store_id: row.get(1)?,
            page_count: row.get(2)?,
            title: row.get(3)?,
            file_name: row.get(4)?,
            metadata: metadata
                .and_then(|m| serde_json::from_str(&m).ok())
                .unwrap_or(serde_json::Value::Null),
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    pub fn record_audit(&self, entry: &AuditEntry<'_>) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO audit_events (id, store_id, user_id, action, entity, entity_id, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                entry.store_id,
                entry.user_id,
                entry.action,
                entry.entity,
                entry.entity_id,
                entry.payload.as_ref().map(|p| p.to_string()),
            ],
        )?;
        Ok(())
    }

    /// Number of rows per table, for the startup log line.
    pub fn get_counts(&self) -> SqliteResult<(usize, usize, usize)> {
        let stores: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM stores", [], |row| row.get(0))?;
        let products: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
        let uploads: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM pdf_metadata", [], |row| row.get(0))?;
        Ok((stores, products, uploads))
    }

    #[cfg(test)]
    pub(crate) fn drop_audit_log(&self) -> SqliteResult<()> {
        self.conn.execute_batch("DROP TABLE audit_events")
    }

    #[cfg(test)]
    pub(crate) fn audit_actions(&self) -> SqliteResult<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT action, entity FROM audit_events ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }
}

impl GlobalRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalRole::Admin => "admin",
            GlobalRole::Manager => "manager",
            GlobalRole::Associate => "associate",
        }
    }
}

impl fmt::Display for GlobalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GlobalRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(GlobalRole::Admin),
            "manager" => Ok(GlobalRole::Manager),
            "associate" => Ok(GlobalRole::Associate),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

impl StoreRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreRole::Associate => "ASSOCIATE",
            StoreRole::Manager => "MANAGER",
            StoreRole::Admin => "ADMIN",
        }
    }

    pub fn can_manage(&self) -> bool {
        matches!(self, StoreRole::Manager | StoreRole::Admin)
    }
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASSOCIATE" => Ok(StoreRole::Associate),
            "MANAGER" => Ok(StoreRole::Manager),
            "ADMIN" => Ok(StoreRole::Admin),
            other => Err(format!("unknown store role '{other}'")),
        }
    }
}
