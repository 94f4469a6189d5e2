//! SQLite registry of subnets and clients

use crate::registry::Registry;
use crate::types::{Client, Subnet};
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Database wrapper for registry persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

const SUBNET_COLUMNS: &str = "id, name, subnet_ip, subnet_mask, created_at";
const CLIENT_COLUMNS: &str =
    "id, name, client_ip, public_key, private_key, subnet_id, is_enabled, created_at";

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened registry at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS subnets (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                subnet_ip TEXT NOT NULL UNIQUE,
                subnet_mask INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                client_ip TEXT NOT NULL,
                public_key TEXT NOT NULL UNIQUE,
                private_key TEXT NOT NULL,
                subnet_id TEXT NOT NULL,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                FOREIGN KEY(subnet_id) REFERENCES subnets(id)
            );
            CREATE INDEX IF NOT EXISTS idx_clients_subnet ON clients(subnet_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_clients_subnet_ip ON clients(subnet_id, client_ip);
            "#,
        )?;

        debug!("Registry schema initialized");
        Ok(())
    }

    fn query_subnet(&self, column: &str, value: &str) -> Result<Option<Subnet>> {
        let conn = self.conn.lock();
        let subnet = conn
            .query_row(
                &format!("SELECT {} FROM subnets WHERE {} = ?1", SUBNET_COLUMNS, column),
                params![value],
                subnet_from_row,
            )
            .optional()?;
        Ok(subnet)
    }
}

/// Map a UNIQUE violation to `AlreadyExists`, pass anything else through
fn unique_violation(e: rusqlite::Error, kind: &str, id: impl ToString) -> Error {
    match e {
        rusqlite::Error::SqliteFailure(ref failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::already_exists(kind, id)
        }
        other => Error::Database(other),
    }
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn ipv4_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Ipv4Addr> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn subnet_from_row(row: &Row<'_>) -> rusqlite::Result<Subnet> {
    Ok(Subnet {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        subnet_ip: ipv4_at(row, 2)?,
        subnet_mask: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn client_from_row(row: &Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        client_ip: ipv4_at(row, 2)?,
        public_key: row.get(3)?,
        private_key: row.get(4)?,
        subnet_id: uuid_at(row, 5)?,
        is_enabled: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl Registry for Database {
    fn find_subnet_by_id(&self, id: Uuid) -> Result<Option<Subnet>> {
        self.query_subnet("id", &id.to_string())
    }

    fn find_subnet_by_ip(&self, ip: Ipv4Addr) -> Result<Option<Subnet>> {
        self.query_subnet("subnet_ip", &ip.to_string())
    }

    fn find_subnet_by_name(&self, name: &str) -> Result<Option<Subnet>> {
        self.query_subnet("name", name)
    }

    fn list_subnets(&self) -> Result<Vec<Subnet>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM subnets ORDER BY created_at, rowid",
            SUBNET_COLUMNS
        ))?;
        let rows = stmt.query_map([], subnet_from_row)?;

        let mut subnets = Vec::new();
        for row in rows {
            subnets.push(row?);
        }
        Ok(subnets)
    }

    fn find_client_by_id(&self, id: Uuid) -> Result<Option<Client>> {
        let conn = self.conn.lock();
        let client = conn
            .query_row(
                &format!("SELECT {} FROM clients WHERE id = ?1", CLIENT_COLUMNS),
                params![id.to_string()],
                client_from_row,
            )
            .optional()?;
        Ok(client)
    }

    fn list_clients_by_subnet(&self, subnet_id: Uuid) -> Result<Vec<Client>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM clients WHERE subnet_id = ?1 ORDER BY created_at, rowid",
            CLIENT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![subnet_id.to_string()], client_from_row)?;

        let mut clients = Vec::new();
        for row in rows {
            clients.push(row?);
        }
        Ok(clients)
    }

    fn list_clients(&self) -> Result<Vec<Client>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM clients ORDER BY created_at, rowid",
            CLIENT_COLUMNS
        ))?;
        let rows = stmt.query_map([], client_from_row)?;

        let mut clients = Vec::new();
        for row in rows {
            clients.push(row?);
        }
        Ok(clients)
    }

    fn insert_subnet(&self, subnet: &Subnet) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO subnets (id, name, subnet_ip, subnet_mask, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                subnet.id.to_string(),
                subnet.name,
                subnet.subnet_ip.to_string(),
                subnet.subnet_mask,
                subnet.created_at,
            ],
        )
        .map_err(|e| unique_violation(e, "subnet", &subnet.name))?;
        debug!("Inserted subnet {} ({})", subnet.name, subnet.id);
        Ok(())
    }

    fn update_subnet(&self, subnet: &Subnet) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE subnets SET name = ?1, subnet_ip = ?2, subnet_mask = ?3 WHERE id = ?4",
            params![
                subnet.name,
                subnet.subnet_ip.to_string(),
                subnet.subnet_mask,
                subnet.id.to_string(),
            ],
        )
        .map_err(|e| unique_violation(e, "subnet", &subnet.name))?;
        debug!("Updated subnet {}", subnet.id);
        Ok(())
    }

    fn delete_subnet(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let clients = tx.execute(
            "DELETE FROM clients WHERE subnet_id = ?1",
            params![id.to_string()],
        )?;
        let rows = tx.execute("DELETE FROM subnets WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;

        if rows > 0 {
            debug!("Deleted subnet {} and {} client(s)", id, clients);
        }
        Ok(rows > 0)
    }

    fn insert_client(&self, client: &Client) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO clients (id, name, client_ip, public_key, private_key, subnet_id, is_enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                client.id.to_string(),
                client.name,
                client.client_ip.to_string(),
                client.public_key,
                client.private_key,
                client.subnet_id.to_string(),
                client.is_enabled,
                client.created_at,
            ],
        )
        .map_err(|e| unique_violation(e, "client", client.client_ip))?;
        debug!("Inserted client {} ({})", client.name, client.id);
        Ok(())
    }

    fn update_client(&self, client: &Client) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE clients SET name = ?1, client_ip = ?2, is_enabled = ?3 WHERE id = ?4",
            params![
                client.name,
                client.client_ip.to_string(),
                client.is_enabled,
                client.id.to_string(),
            ],
        )
        .map_err(|e| unique_violation(e, "client", client.client_ip))?;
        debug!("Updated client {}", client.id);
        Ok(())
    }

    fn delete_client(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM clients WHERE id = ?1", params![id.to_string()])?;
        if rows > 0 {
            debug!("Deleted client {}", id);
        }
        Ok(rows > 0)
    }
}
