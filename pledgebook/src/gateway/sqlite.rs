use super::{
    apply_patch, ChangeEvent, ConfigSource, Gateway, Subscribers, Subscription, SubscriptionId,
};
use crate::error::{PledgeError, Result};
use crate::member::{Frequency, MemberId, Payment};
use crate::wire::MemberRecord;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A gateway backed by a local SQLite database.
/// Holds the member collection plus an `app_config` key/value table.
pub struct SqliteGateway {
    conn: Mutex<Connection>,
    subscribers: Subscribers,
}

/// A `members` row before its text columns are decoded.
struct RawRow {
    id: MemberId,
    name: String,
    phone: Option<String>,
    email: Option<String>,
    committed_amount: f64,
    frequency: String,
    payments_json: Option<String>,
    notes: Option<String>,
}

impl RawRow {
    fn decode(self) -> Result<MemberRecord> {
        let frequency: Frequency =
            serde_json::from_value(serde_json::Value::String(self.frequency.clone())).map_err(
                |_| {
                    PledgeError::Mapping(format!(
                        "Row {} has unknown frequency '{}'",
                        self.id, self.frequency
                    ))
                },
            )?;
        let payments: Option<Vec<Payment>> = match self.payments_json {
            Some(json) => Some(serde_json::from_str(&json).map_err(|e| {
                PledgeError::Mapping(format!("Row {} has malformed payments: {e}", self.id))
            })?),
            None => None,
        };

        Ok(MemberRecord {
            id: self.id,
            name: self.name,
            phone: self.phone,
            email: self.email,
            committed_amount: self.committed_amount,
            frequency,
            payments,
            notes: self.notes,
        })
    }
}

impl SqliteGateway {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let gateway = SqliteGateway {
            conn: Mutex::new(conn),
            subscribers: Subscribers::default(),
        };
        gateway.initialize_tables()?;
        Ok(gateway)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS members (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                phone TEXT,
                email TEXT,
                committed_amount REAL NOT NULL DEFAULT 0,
                frequency TEXT NOT NULL,
                payments TEXT,
                notes TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_members_name ON members(name);

            CREATE TABLE IF NOT EXISTS app_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Config ───────────────────────────────────────────────────────

    /// Store a config value, replacing any previous one.
    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO app_config (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // ── Members ──────────────────────────────────────────────────────

    fn get_record(conn: &Connection, id: MemberId) -> Result<Option<MemberRecord>> {
        let raw = conn
            .query_row(
                "SELECT id, name, phone, email, committed_amount, frequency, payments, notes
                 FROM members WHERE id = ?1",
                params![id],
                read_raw,
            )
            .optional()?;
        raw.map(RawRow::decode).transpose()
    }

    fn write_record(conn: &Connection, record: &MemberRecord) -> Result<()> {
        let payments = record
            .payments
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO members
                (id, name, phone, email, committed_amount, frequency, payments, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                phone = excluded.phone,
                email = excluded.email,
                committed_amount = excluded.committed_amount,
                frequency = excluded.frequency,
                payments = excluded.payments,
                notes = excluded.notes",
            params![
                record.id,
                record.name,
                record.phone,
                record.email,
                record.committed_amount,
                record.frequency.as_str(),
                payments,
                record.notes,
            ],
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM members", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        email: row.get(3)?,
        committed_amount: row.get(4)?,
        frequency: row.get(5)?,
        payments_json: row.get(6)?,
        notes: row.get(7)?,
    })
}

impl Gateway for SqliteGateway {
    fn fetch_all(&self) -> Result<Vec<MemberRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, phone, email, committed_amount, frequency, payments, notes
             FROM members ORDER BY name COLLATE NOCASE, id",
        )?;
        let rows = stmt.query_map([], read_raw)?;

        let mut records = Vec::new();
        for row in rows {
            match row?.decode() {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping unreadable member row: {e}"),
            }
        }
        Ok(records)
    }

    fn upsert(&self, records: &[MemberRecord]) -> Result<()> {
        let mut events = Vec::with_capacity(records.len());
        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            for record in records {
                let exists: bool = tx
                    .query_row(
                        "SELECT 1 FROM members WHERE id = ?1",
                        params![record.id],
                        |_| Ok(true),
                    )
                    .optional()?
                    .unwrap_or(false);
                Self::write_record(&tx, record)?;
                events.push(if exists {
                    ChangeEvent::Update(record.clone())
                } else {
                    ChangeEvent::Insert(record.clone())
                });
            }
            tx.commit()?;
        }
        self.subscribers.publish(events);
        Ok(())
    }

    fn update_fields(&self, id: MemberId, fields: &serde_json::Value) -> Result<()> {
        let updated = {
            let conn = self.conn();
            let existing = Self::get_record(&conn, id)?.ok_or(PledgeError::NotFound { id })?;
            let updated = apply_patch(&existing, fields)?;
            Self::write_record(&conn, &updated)?;
            updated
        };
        self.subscribers.publish(vec![ChangeEvent::Update(updated)]);
        Ok(())
    }

    fn delete(&self, id: MemberId) -> Result<()> {
        let removed = self
            .conn()
            .execute("DELETE FROM members WHERE id = ?1", params![id])?;
        if removed > 0 {
            self.subscribers.publish(vec![ChangeEvent::Delete { id }]);
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<Subscription> {
        Ok(self.subscribers.subscribe())
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }
}

impl ConfigSource for SqliteGateway {
    fn config_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM app_config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(id: MemberId, name: &str) -> MemberRecord {
        MemberRecord {
            id,
            name: name.into(),
            phone: Some("716-555-0100".into()),
            email: None,
            committed_amount: 1200.0,
            frequency: Frequency::OneTime,
            payments: Some(vec![Payment {
                id: "abc".into(),
                date: NaiveDate::from_ymd_opt(2024, 2, 3).unwrap(),
                amount: 50.0,
                note: String::new(),
            }]),
            notes: None,
        }
    }

    #[test]
    fn test_upsert_and_fetch() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        gw.upsert(&[record(2, "bilal"), record(1, "Adam")]).unwrap();

        let all = gw.fetch_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], record(1, "Adam"));
        assert_eq!(all[1].name, "bilal");
    }

    #[test]
    fn test_upsert_events() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        let sub = gw.subscribe().unwrap();

        gw.upsert(&[record(1, "Adam")]).unwrap();
        gw.upsert(&[record(1, "Adam K"), record(2, "Bilal")]).unwrap();

        let kinds: Vec<_> = sub.event_rx.try_iter().map(|e| e.kind()).collect();
        use crate::gateway::ChangeKind::*;
        assert_eq!(kinds, vec![Insert, Update, Insert]);
        assert_eq!(gw.count().unwrap(), 2);
    }

    #[test]
    fn test_update_fields_only_touches_given_keys() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        gw.upsert(&[record(1, "Adam")]).unwrap();

        gw.update_fields(1, &serde_json::json!({ "payments": [] })).unwrap();

        let stored = &gw.fetch_all().unwrap()[0];
        assert_eq!(stored.payments, Some(vec![]));
        assert_eq!(stored.phone.as_deref(), Some("716-555-0100"));
        assert!(gw.update_fields(9, &serde_json::json!({})).is_err());
    }

    #[test]
    fn test_delete() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        let sub = gw.subscribe().unwrap();
        gw.upsert(&[record(1, "Adam")]).unwrap();
        gw.delete(1).unwrap();
        gw.delete(1).unwrap();

        let events: Vec<_> = sub.event_rx.try_iter().collect();
        assert_eq!(events.last(), Some(&ChangeEvent::Delete { id: 1 }));
        assert_eq!(events.len(), 2);
        assert_eq!(gw.count().unwrap(), 0);
    }

    #[test]
    fn test_config_values() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        assert_eq!(gw.config_value("access_code").unwrap(), None);
        gw.set_config("access_code", "salaam").unwrap();
        assert_eq!(
            gw.config_value("access_code").unwrap().as_deref(),
            Some("salaam")
        );
    }

    #[test]
    fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pledgebook.db");
        {
            let gw = SqliteGateway::open(&path).unwrap();
            gw.upsert(&[record(5, "Samira")]).unwrap();
        }
        let gw = SqliteGateway::open(&path).unwrap();
        assert_eq!(gw.fetch_all().unwrap(), vec![record(5, "Samira")]);
    }

    #[test]
    fn test_unreadable_rows_are_skipped() {
        let gw = SqliteGateway::open_in_memory().unwrap();
        gw.conn()
            .execute(
                "INSERT INTO members (id, name, frequency) VALUES (1, 'X', 'Weekly')",
                [],
            )
            .unwrap();
        gw.upsert(&[record(2, "Adam")]).unwrap();

        let all = gw.fetch_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, 2);
        assert!(matches!(
            SqliteGateway::get_record(&gw.conn(), 1),
            Err(PledgeError::Mapping(_))
        ));
    }
}
