//! SQLite persistence for inventory, history, audit, and comments
//!
//! The in-memory inventory stays authoritative; these tables are durable
//! mirrors. History and audit are append-only; inventory rows are upserted
//! by node key; comments are upserted by audit id. Writes touching more
//! than one table run inside a single transaction.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::inventory::{Node, SubModule};
use crate::registry::Definition;

/// Errors from the persistence layer
#[derive(Debug, Snafu)]
pub enum DbError {
    /// A SQLite operation failed
    #[snafu(display("SQLite error: {source}"))]
    Sqlite {
        /// The underlying rusqlite error
        source: rusqlite::Error,
    },
    /// Serializing or deserializing a sub-module map failed
    #[snafu(display("JSON error: {source}"))]
    Json {
        /// The underlying serde_json error
        source: serde_json::Error,
    },
}

type Result<T> = std::result::Result<T, DbError>;

/// An audit entry not yet assigned a row id
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    /// Hex key of the edited node
    pub node_id: String,
    /// Sub-module index, when the edit targeted one
    pub sub_idx: Option<u8>,
    /// Name of the edited field, in operator-protocol spelling
    pub field: &'static str,
    /// JSON rendering of the value before the edit
    pub old_value: String,
    /// JSON rendering of the value after the edit
    pub new_value: String,
}

/// A stored audit entry joined with its optional comment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Row id, referenced by comment upserts
    pub id: i64,
    /// Unix ms when the edit was applied
    pub timestamp: u64,
    /// Hex key of the edited node
    pub node_id: String,
    /// Sub-module index, when the edit targeted one
    pub sub_idx: Option<u8>,
    /// Name of the edited field
    pub field: String,
    /// JSON rendering of the value before the edit
    pub old_value: String,
    /// JSON rendering of the value after the edit
    pub new_value: String,
    /// Free-text operator comment, if one was saved
    pub comment_text: Option<String>,
}

/// One archived snapshot of a node's state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Row id
    pub id: i64,
    /// Hex key of the archived node
    pub node_id: String,
    /// Node-type arbitration ID at archive time
    pub node_type_msg: u16,
    /// Sub-module count at archive time
    pub sub_mod_cnt: u8,
    /// Configuration CRC at archive time
    pub config_crc: Option<u16>,
    /// Unix ms the archived state was current
    pub recorded_at: u64,
    /// The archived sub-module table
    pub sub_modules: Vec<Option<SubModule>>,
}

/// Handle to the SQLite store, owned by the engine task
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating if necessary) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).context(SqliteSnafu)?;
        Self::init(conn)
    }

    /// Open a transient in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context(SqliteSnafu)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS node_inventory (
                node_id TEXT PRIMARY KEY,
                node_type_msg INTEGER NOT NULL,
                node_type_dlc INTEGER NOT NULL,
                sub_mod_cnt INTEGER NOT NULL,
                config_crc INTEGER,
                first_seen INTEGER,
                last_seen INTEGER NOT NULL,
                last_sub_mod_idx INTEGER NOT NULL,
                intro_complete INTEGER NOT NULL,
                full_data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS node_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL,
                node_type_msg INTEGER NOT NULL,
                sub_mod_cnt INTEGER NOT NULL,
                config_crc INTEGER,
                recorded_at INTEGER NOT NULL,
                full_data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_node ON node_history(node_id);
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                node_id TEXT NOT NULL,
                sub_idx INTEGER,
                field TEXT NOT NULL,
                old_value TEXT NOT NULL,
                new_value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS config_comments (
                audit_id INTEGER PRIMARY KEY,
                comment_text TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS message_definitions (
                id_dec INTEGER PRIMARY KEY,
                id_hex TEXT NOT NULL,
                name TEXT NOT NULL,
                dlc INTEGER NOT NULL,
                category TEXT NOT NULL,
                description TEXT NOT NULL
            );",
        )
        .context(SqliteSnafu)?;
        Ok(Self { conn })
    }

    /// Upsert a node's durable mirror row
    pub fn upsert_node(&mut self, node: &Node) -> Result<()> {
        let full_data = serde_json::to_string(&node.sub_modules).context(JsonSnafu)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO node_inventory
                 (node_id, node_type_msg, node_type_dlc, sub_mod_cnt, config_crc,
                  first_seen, last_seen, last_sub_mod_idx, intro_complete, full_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    node.node_id.to_hex(),
                    node.node_type_msg,
                    node.node_type_dlc,
                    node.sub_mod_cnt,
                    node.config_crc,
                    node.first_seen.map(|v| v as i64),
                    node.last_seen as i64,
                    node.last_sub_mod_idx,
                    node.intro_complete,
                    full_data,
                ],
            )
            .context(SqliteSnafu)?;
        Ok(())
    }

    /// Delete a node's inventory row; history and audit stay untouched
    pub fn delete_node(&mut self, node_id: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM node_inventory WHERE node_id = ?1",
                params![node_id],
            )
            .context(SqliteSnafu)?;
        Ok(())
    }

    /// Append a snapshot of `node` to the history table
    pub fn insert_history(&mut self, node: &Node, recorded_at: u64) -> Result<()> {
        let full_data = serde_json::to_string(&node.sub_modules).context(JsonSnafu)?;
        self.conn
            .execute(
                "INSERT INTO node_history
                 (node_id, node_type_msg, sub_mod_cnt, config_crc, recorded_at, full_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    node.node_id.to_hex(),
                    node.node_type_msg,
                    node.sub_mod_cnt,
                    node.config_crc,
                    recorded_at as i64,
                    full_data,
                ],
            )
            .context(SqliteSnafu)?;
        Ok(())
    }

    /// Record an applied operator edit in one transaction
    ///
    /// Upserts the inventory row, appends one history snapshot of the
    /// post-edit state, and appends the audit entries.
    pub fn record_config_write(
        &mut self,
        node: &Node,
        audits: &[NewAuditEntry],
        now_ms: u64,
    ) -> Result<()> {
        let full_data = serde_json::to_string(&node.sub_modules).context(JsonSnafu)?;
        let tx = self.conn.transaction().context(SqliteSnafu)?;
        tx.execute(
            "INSERT OR REPLACE INTO node_inventory
             (node_id, node_type_msg, node_type_dlc, sub_mod_cnt, config_crc,
              first_seen, last_seen, last_sub_mod_idx, intro_complete, full_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                node.node_id.to_hex(),
                node.node_type_msg,
                node.node_type_dlc,
                node.sub_mod_cnt,
                node.config_crc,
                node.first_seen.map(|v| v as i64),
                node.last_seen as i64,
                node.last_sub_mod_idx,
                node.intro_complete,
                full_data,
            ],
        )
        .context(SqliteSnafu)?;
        tx.execute(
            "INSERT INTO node_history
             (node_id, node_type_msg, sub_mod_cnt, config_crc, recorded_at, full_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                node.node_id.to_hex(),
                node.node_type_msg,
                node.sub_mod_cnt,
                node.config_crc,
                now_ms as i64,
                full_data,
            ],
        )
        .context(SqliteSnafu)?;
        for entry in audits {
            tx.execute(
                "INSERT INTO audit_log
                 (timestamp, node_id, sub_idx, field, old_value, new_value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    now_ms as i64,
                    entry.node_id,
                    entry.sub_idx,
                    entry.field,
                    entry.old_value,
                    entry.new_value,
                ],
            )
            .context(SqliteSnafu)?;
        }
        tx.commit().context(SqliteSnafu)?;
        Ok(())
    }

    /// Upsert a free-text comment attached to an audit entry
    pub fn upsert_comment(&mut self, audit_id: i64, comment: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO config_comments (audit_id, comment_text)
                 VALUES (?1, ?2)",
                params![audit_id, comment],
            )
            .context(SqliteSnafu)?;
        Ok(())
    }

    /// Fetch the most recent audit entries, newest first, with comments
    pub fn recent_audit(&mut self, limit: u32) -> Result<Vec<AuditRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT a.id, a.timestamp, a.node_id, a.sub_idx, a.field,
                        a.old_value, a.new_value, c.comment_text
                 FROM audit_log a
                 LEFT JOIN config_comments c ON c.audit_id = a.id
                 ORDER BY a.id DESC LIMIT ?1",
            )
            .context(SqliteSnafu)?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(AuditRecord {
                    id: row.get(0)?,
                    timestamp: row.get::<_, i64>(1)? as u64,
                    node_id: row.get(2)?,
                    sub_idx: row.get(3)?,
                    field: row.get(4)?,
                    old_value: row.get(5)?,
                    new_value: row.get(6)?,
                    comment_text: row.get(7)?,
                })
            })
            .context(SqliteSnafu)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context(SqliteSnafu)?;
        Ok(rows)
    }

    /// Fetch all archived snapshots for a node, oldest first
    pub fn history_for(&mut self, node_id: &str) -> Result<Vec<HistoryRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, node_id, node_type_msg, sub_mod_cnt, config_crc,
                        recorded_at, full_data
                 FROM node_history WHERE node_id = ?1 ORDER BY id",
            )
            .context(SqliteSnafu)?;
        let rows = stmt
            .query_map(params![node_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u16>(2)?,
                    row.get::<_, u8>(3)?,
                    row.get::<_, Option<u16>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context(SqliteSnafu)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context(SqliteSnafu)?;

        rows.into_iter()
            .map(
                |(id, node_id, node_type_msg, sub_mod_cnt, config_crc, recorded_at, full)| {
                    Ok(HistoryRecord {
                        id,
                        node_id,
                        node_type_msg,
                        sub_mod_cnt,
                        config_crc,
                        recorded_at: recorded_at as u64,
                        sub_modules: serde_json::from_str(&full).context(JsonSnafu)?,
                    })
                },
            )
            .collect()
    }

    /// Replace the message definition table in one transaction
    pub fn replace_definitions(&mut self, definitions: &[Definition]) -> Result<()> {
        let tx = self.conn.transaction().context(SqliteSnafu)?;
        for def in definitions {
            tx.execute(
                "INSERT OR REPLACE INTO message_definitions
                 (id_dec, id_hex, name, dlc, category, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    def.id_dec,
                    def.id_hex,
                    def.name,
                    def.dlc,
                    def.category,
                    def.description,
                ],
            )
            .context(SqliteSnafu)?;
        }
        tx.commit().context(SqliteSnafu)?;
        Ok(())
    }

    /// Restore the inventory from the durable mirror at startup
    pub fn load_inventory(&mut self) -> Result<Vec<Node>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT node_id, node_type_msg, node_type_dlc, sub_mod_cnt, config_crc,
                        first_seen, last_seen, last_sub_mod_idx, intro_complete, full_data
                 FROM node_inventory",
            )
            .context(SqliteSnafu)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u16>(1)?,
                    row.get::<_, u8>(2)?,
                    row.get::<_, u8>(3)?,
                    row.get::<_, Option<u16>>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, u8>(7)?,
                    row.get::<_, bool>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })
            .context(SqliteSnafu)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context(SqliteSnafu)?;

        let mut nodes = Vec::with_capacity(rows.len());
        for (key, node_type_msg, node_type_dlc, sub_mod_cnt, config_crc, first, last, last_idx, complete, full) in rows {
            let node_id = match canhub_common::NodeId::from_hex(&key) {
                Ok(id) => id,
                Err(_) => {
                    log::warn!("Skipping inventory row with bad node key {key:?}");
                    continue;
                }
            };
            let sub_modules: Vec<Option<SubModule>> =
                serde_json::from_str(&full).context(JsonSnafu)?;
            let mut node = Node::new(node_id);
            node.node_type_msg = node_type_msg;
            node.node_type_dlc = node_type_dlc;
            node.sub_mod_cnt = sub_mod_cnt;
            node.config_crc = config_crc;
            node.first_seen = first.map(|v| v as u64);
            node.last_seen = last as u64;
            node.last_sub_mod_idx = last_idx;
            node.intro_complete = complete;
            for (i, slot) in sub_modules.into_iter().take(node.sub_modules.len()).enumerate() {
                node.sub_modules[i] = slot;
            }
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Count rows in the history table for a node (test support)
    pub fn history_count(&mut self, node_id: &str) -> Result<u32> {
        let count = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM node_history WHERE node_id = ?1",
                params![node_id],
                |row| row.get::<_, u32>(0),
            )
            .optional()
            .context(SqliteSnafu)?
            .unwrap_or(0);
        Ok(count)
    }
}
