//! SQLite-based entity storage

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use rusqlite_migration::{M, Migrations};

use super::{EntityStore, ItemPredicate, StoreReader, StoreWriter};
use crate::models::{
    ContentReader, Highlight, HighlightId, Item, ItemId, Label, LabelId, SyncStatus,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE items (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                slug TEXT NOT NULL,
                author TEXT,
                description TEXT,
                image_url TEXT,
                created_at TEXT NOT NULL,
                saved_at TEXT NOT NULL,
                published_at TEXT,
                archived INTEGER NOT NULL DEFAULT 0,
                reading_progress REAL NOT NULL DEFAULT 0,
                reading_progress_anchor INTEGER NOT NULL DEFAULT 0,
                content_reader TEXT NOT NULL DEFAULT 'WEB',
                snoozed_until TEXT,
                sync_status INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_items_saved_at ON items(saved_at DESC);
            CREATE INDEX idx_items_sync_status ON items(sync_status);

            CREATE TABLE labels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                color TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                sync_status INTEGER NOT NULL DEFAULT 0
            );

            -- Ordered label references per item. No foreign key on label_id:
            -- fetched items may reference labels not synced yet.
            CREATE TABLE item_labels (
                item_id TEXT NOT NULL,
                label_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (item_id, label_id),
                FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_item_labels_label ON item_labels(label_id);

            CREATE TABLE highlights (
                id TEXT PRIMARY KEY,
                short_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                quote TEXT NOT NULL,
                patch TEXT NOT NULL,
                annotation TEXT,
                label_ids TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                sync_status INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_highlights_item ON highlights(item_id);
            "#,
        ),
    ])
}

const ITEM_COLUMNS: &str = "id, title, url, slug, author, description, image_url, \
     created_at, saved_at, published_at, archived, reading_progress, \
     reading_progress_anchor, content_reader, snoozed_until, sync_status";

const LABEL_COLUMNS: &str = "id, name, color, description, created_at, sync_status";

const HIGHLIGHT_COLUMNS: &str = "id, short_id, item_id, quote, patch, annotation, label_ids, \
     created_at, updated_at, sync_status";

/// Fixed-width RFC 3339 so that text ordering matches time ordering
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in database: {:?}", value))
}

fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

fn parse_status(value: i64) -> Result<SyncStatus> {
    SyncStatus::from_i64(value).ok_or_else(|| anyhow!("Invalid sync status in database: {}", value))
}

/// Raw item columns as read from SQLite
struct ItemRow {
    id: String,
    title: String,
    url: String,
    slug: String,
    author: Option<String>,
    description: Option<String>,
    image_url: Option<String>,
    created_at: String,
    saved_at: String,
    published_at: Option<String>,
    archived: bool,
    reading_progress: f64,
    reading_progress_anchor: i64,
    content_reader: String,
    snoozed_until: Option<String>,
    sync_status: i64,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            url: row.get(2)?,
            slug: row.get(3)?,
            author: row.get(4)?,
            description: row.get(5)?,
            image_url: row.get(6)?,
            created_at: row.get(7)?,
            saved_at: row.get(8)?,
            published_at: row.get(9)?,
            archived: row.get(10)?,
            reading_progress: row.get(11)?,
            reading_progress_anchor: row.get(12)?,
            content_reader: row.get(13)?,
            snoozed_until: row.get(14)?,
            sync_status: row.get(15)?,
        })
    }

    fn into_item(self, label_ids: Vec<LabelId>) -> Result<Item> {
        Ok(Item {
            id: ItemId::new(self.id),
            title: self.title,
            url: self.url,
            slug: self.slug,
            author: self.author,
            description: self.description,
            image_url: self.image_url,
            created_at: parse_ts(&self.created_at)?,
            saved_at: parse_ts(&self.saved_at)?,
            published_at: parse_opt_ts(self.published_at)?,
            archived: self.archived,
            reading_progress: self.reading_progress,
            reading_progress_anchor: self.reading_progress_anchor,
            content_reader: ContentReader::parse(&self.content_reader),
            label_ids,
            snoozed_until: parse_opt_ts(self.snoozed_until)?,
            sync_status: parse_status(self.sync_status)?,
        })
    }
}

type LabelRow = (String, String, String, Option<String>, String, i64);

fn label_from_row(row: &Row<'_>) -> rusqlite::Result<LabelRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_label((id, name, color, description, created_at, sync_status): LabelRow) -> Result<Label> {
    Ok(Label {
        id: LabelId::new(id),
        name,
        color,
        description,
        created_at: parse_ts(&created_at)?,
        sync_status: parse_status(sync_status)?,
    })
}

/// Raw highlight columns as read from SQLite
struct HighlightRow {
    id: String,
    short_id: String,
    item_id: String,
    quote: String,
    patch: String,
    annotation: Option<String>,
    label_ids: String,
    created_at: String,
    updated_at: String,
    sync_status: i64,
}

impl HighlightRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            short_id: row.get(1)?,
            item_id: row.get(2)?,
            quote: row.get(3)?,
            patch: row.get(4)?,
            annotation: row.get(5)?,
            label_ids: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            sync_status: row.get(9)?,
        })
    }

    fn into_highlight(self) -> Result<Highlight> {
        let label_ids: Vec<LabelId> = serde_json::from_str(&self.label_ids)
            .with_context(|| format!("Invalid label list for highlight {}", self.id))?;
        Ok(Highlight {
            id: HighlightId::new(self.id),
            short_id: self.short_id,
            item_id: ItemId::new(self.item_id),
            quote: self.quote,
            patch: self.patch,
            annotation: self.annotation,
            label_ids,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            sync_status: parse_status(self.sync_status)?,
        })
    }
}

/// Transaction-scoped view over a connection (or an open transaction)
struct SqliteTables<'c> {
    conn: &'c Connection,
}

impl SqliteTables<'_> {
    fn load_item_labels(&self, item_id: &str) -> Result<Vec<LabelId>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT label_id FROM item_labels WHERE item_id = ? ORDER BY position")?;
        let labels = stmt
            .query_map([item_id], |row| row.get::<_, String>(0))?
            .map(|r| r.map(LabelId::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    fn query_items(&self, clause: &str, values: Vec<Value>) -> Result<Vec<Item>> {
        let sql = format!(
            "SELECT {} FROM items {} ORDER BY saved_at DESC, id ASC",
            ITEM_COLUMNS, clause
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                let labels = self.load_item_labels(&row.id)?;
                row.into_item(labels)
            })
            .collect()
    }

    fn query_labels(&self, clause: &str, values: Vec<Value>) -> Result<Vec<Label>> {
        let sql = format!("SELECT {} FROM labels {} ORDER BY name", LABEL_COLUMNS, clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), label_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_label).collect()
    }

    fn query_highlights(&self, clause: &str, values: Vec<Value>) -> Result<Vec<Highlight>> {
        let sql = format!(
            "SELECT {} FROM highlights {} ORDER BY created_at ASC, id ASC",
            HIGHLIGHT_COLUMNS, clause
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), HighlightRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(HighlightRow::into_highlight).collect()
    }
}

impl StoreReader for SqliteTables<'_> {
    fn get_item(&self, id: &ItemId) -> Result<Option<Item>> {
        Ok(self
            .query_items("WHERE id = ?", vec![Value::Text(id.0.clone())])?
            .pop())
    }

    fn fetch_items(&self, predicate: &ItemPredicate) -> Result<Vec<Item>> {
        let mut conditions = Vec::new();
        let mut values = Vec::new();

        if let Some(status) = predicate.exclude_status {
            conditions.push("sync_status != ?");
            values.push(Value::Integer(status.as_i64()));
        }
        if let Some(archived) = predicate.archived {
            conditions.push("archived = ?");
            values.push(Value::Integer(archived as i64));
        }
        if let Some(reader) = predicate.content_reader {
            conditions.push("content_reader = ?");
            values.push(Value::Text(reader.as_str().to_string()));
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        self.query_items(&clause, values)
    }

    fn items_with_status(&self, status: SyncStatus) -> Result<Vec<Item>> {
        self.query_items(
            "WHERE sync_status = ?",
            vec![Value::Integer(status.as_i64())],
        )
    }

    fn items_with_label(&self, label_id: &LabelId) -> Result<Vec<Item>> {
        self.query_items(
            "WHERE id IN (SELECT item_id FROM item_labels WHERE label_id = ?)",
            vec![Value::Text(label_id.0.clone())],
        )
    }

    fn get_label(&self, id: &LabelId) -> Result<Option<Label>> {
        let sql = format!("SELECT {} FROM labels WHERE id = ?", LABEL_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, [id.as_str()], label_from_row)
            .optional()?;
        row.map(into_label).transpose()
    }

    fn find_label_by_name(&self, name: &str) -> Result<Option<Label>> {
        let sql = format!("SELECT {} FROM labels WHERE name = ?", LABEL_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, [name], label_from_row)
            .optional()?;
        row.map(into_label).transpose()
    }

    fn list_labels(&self) -> Result<Vec<Label>> {
        self.query_labels("", Vec::new())
    }

    fn labels_with_status(&self, status: SyncStatus) -> Result<Vec<Label>> {
        self.query_labels(
            "WHERE sync_status = ?",
            vec![Value::Integer(status.as_i64())],
        )
    }

    fn get_highlight(&self, id: &HighlightId) -> Result<Option<Highlight>> {
        Ok(self
            .query_highlights("WHERE id = ?", vec![Value::Text(id.0.clone())])?
            .pop())
    }

    fn highlights_for_item(&self, item_id: &ItemId) -> Result<Vec<Highlight>> {
        self.query_highlights("WHERE item_id = ?", vec![Value::Text(item_id.0.clone())])
    }

    fn highlights_with_status(&self, status: SyncStatus) -> Result<Vec<Highlight>> {
        self.query_highlights(
            "WHERE sync_status = ?",
            vec![Value::Integer(status.as_i64())],
        )
    }
}

impl StoreWriter for SqliteTables<'_> {
    fn upsert_item(&mut self, item: Item) -> Result<()> {
        // ON CONFLICT DO UPDATE keeps the row in place; INSERT OR REPLACE would
        // delete it first and cascade away its label references.
        self.conn.execute(
            "INSERT INTO items
             (id, title, url, slug, author, description, image_url, created_at, saved_at,
              published_at, archived, reading_progress, reading_progress_anchor,
              content_reader, snoozed_until, sync_status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                url = excluded.url,
                slug = excluded.slug,
                author = excluded.author,
                description = excluded.description,
                image_url = excluded.image_url,
                created_at = excluded.created_at,
                saved_at = excluded.saved_at,
                published_at = excluded.published_at,
                archived = excluded.archived,
                reading_progress = excluded.reading_progress,
                reading_progress_anchor = excluded.reading_progress_anchor,
                content_reader = excluded.content_reader,
                snoozed_until = excluded.snoozed_until,
                sync_status = excluded.sync_status",
            params![
                item.id.as_str(),
                item.title,
                item.url,
                item.slug,
                item.author,
                item.description,
                item.image_url,
                format_ts(&item.created_at),
                format_ts(&item.saved_at),
                item.published_at.as_ref().map(format_ts),
                item.archived,
                item.reading_progress,
                item.reading_progress_anchor,
                item.content_reader.as_str(),
                item.snoozed_until.as_ref().map(format_ts),
                item.sync_status.as_i64(),
            ],
        )?;

        self.conn
            .execute("DELETE FROM item_labels WHERE item_id = ?", [item.id.as_str()])?;
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO item_labels (item_id, label_id, position) VALUES (?, ?, ?)",
        )?;
        for (position, label_id) in item.label_ids.iter().enumerate() {
            stmt.execute(params![item.id.as_str(), label_id.as_str(), position as i64])?;
        }

        Ok(())
    }

    fn delete_item(&mut self, id: &ItemId) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM items WHERE id = ?", [id.as_str()])?;
        Ok(deleted > 0)
    }

    fn upsert_label(&mut self, label: Label) -> Result<()> {
        if let Some(existing) = self.find_label_by_name(&label.name)?
            && existing.id != label.id
        {
            bail!(
                "label name {:?} already used by label {}",
                label.name,
                existing.id
            );
        }

        self.conn.execute(
            "INSERT INTO labels (id, name, color, description, created_at, sync_status)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                color = excluded.color,
                description = excluded.description,
                created_at = excluded.created_at,
                sync_status = excluded.sync_status",
            params![
                label.id.as_str(),
                label.name,
                label.color,
                label.description,
                format_ts(&label.created_at),
                label.sync_status.as_i64(),
            ],
        )?;
        Ok(())
    }

    fn delete_label(&mut self, id: &LabelId) -> Result<bool> {
        self.conn
            .execute("DELETE FROM item_labels WHERE label_id = ?", [id.as_str()])?;
        let deleted = self
            .conn
            .execute("DELETE FROM labels WHERE id = ?", [id.as_str()])?;
        Ok(deleted > 0)
    }

    fn upsert_highlight(&mut self, highlight: Highlight) -> Result<()> {
        let label_ids = serde_json::to_string(&highlight.label_ids)?;
        self.conn.execute(
            "INSERT INTO highlights
             (id, short_id, item_id, quote, patch, annotation, label_ids, created_at,
              updated_at, sync_status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                short_id = excluded.short_id,
                item_id = excluded.item_id,
                quote = excluded.quote,
                patch = excluded.patch,
                annotation = excluded.annotation,
                label_ids = excluded.label_ids,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                sync_status = excluded.sync_status",
            params![
                highlight.id.as_str(),
                highlight.short_id,
                highlight.item_id.as_str(),
                highlight.quote,
                highlight.patch,
                highlight.annotation,
                label_ids,
                format_ts(&highlight.created_at),
                format_ts(&highlight.updated_at),
                highlight.sync_status.as_i64(),
            ],
        )?;
        Ok(())
    }

    fn delete_highlight(&mut self, id: &HighlightId) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM highlights WHERE id = ?", [id.as_str()])?;
        Ok(deleted > 0)
    }
}

/// SQLite-based entity store
///
/// A single connection behind a Mutex; every write transaction is a real
/// SQLite transaction that rolls back when dropped without commit.
pub struct SqliteEntityStore {
    conn: Mutex<Connection>,
}

impl SqliteEntityStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL allows readers alongside the single writer; foreign_keys is
        // required for ON DELETE CASCADE on item_labels.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl EntityStore for SqliteEntityStore {
    fn read_txn(&self, body: &mut dyn FnMut(&dyn StoreReader) -> Result<()>) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))?;
        let tables = SqliteTables { conn: &conn };
        body(&tables)
    }

    fn write_txn(&self, body: &mut dyn FnMut(&mut dyn StoreWriter) -> Result<()>) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))?;
        let tx = conn.transaction()?;
        {
            let mut tables = SqliteTables { conn: &tx };
            body(&mut tables)?;
        }
        tx.commit().context("Failed to commit transaction")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EntityStoreExt;
    use chrono::Duration;
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteEntityStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteEntityStore::new(dir.path().join("shelf.test.sqlite")).unwrap();
        (store, dir)
    }

    fn make_item(id: &str, age_hours: i64) -> Item {
        Item::builder(ItemId::new(id), format!("https://example.com/{}", id))
            .title(format!("Item {}", id))
            .saved_at(Utc::now() - Duration::hours(age_hours))
            .build()
    }

    #[test]
    fn test_item_round_trip_preserves_fields() {
        let (store, _dir) = create_test_store();

        let mut item = Item::builder(ItemId::new("i1"), "https://example.com/a.pdf")
            .title("Paper")
            .slug("paper")
            .author(Some("Ada".to_string()))
            .content_reader(ContentReader::Pdf)
            .archived(true)
            .reading_progress(42.5, 17)
            .snoozed_until(Some(Utc::now() + Duration::days(1)))
            .sync_status(SyncStatus::NeedsCreation)
            .build();
        item.add_label(LabelId::new("l2"));
        item.add_label(LabelId::new("l1"));

        store.write(|w| w.upsert_item(item.clone())).unwrap();
        let loaded = store
            .read(|r| r.get_item(&ItemId::new("i1")))
            .unwrap()
            .unwrap();

        assert_eq!(loaded.title, "Paper");
        assert_eq!(loaded.author.as_deref(), Some("Ada"));
        assert_eq!(loaded.content_reader, ContentReader::Pdf);
        assert!(loaded.archived);
        assert_eq!(loaded.reading_progress, 42.5);
        assert_eq!(loaded.reading_progress_anchor, 17);
        assert_eq!(loaded.sync_status, SyncStatus::NeedsCreation);
        assert_eq!(loaded.label_ids, vec![LabelId::new("l2"), LabelId::new("l1")]);
        assert!(loaded.snoozed_until.is_some());
    }

    #[test]
    fn test_fetch_items_with_predicate() {
        let (store, _dir) = create_test_store();
        store
            .write(|w| {
                w.upsert_item(make_item("inbox", 1))?;
                let mut archived = make_item("archived", 2);
                archived.archived = true;
                w.upsert_item(archived)?;
                let mut deleted = make_item("deleted", 3);
                deleted.sync_status = SyncStatus::NeedsDeletion;
                w.upsert_item(deleted)
            })
            .unwrap();

        let inbox = store
            .read(|r| r.fetch_items(&ItemPredicate::undeleted().archived(false)))
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].id.as_str(), "inbox");

        let all = store.read(|r| r.fetch_items(&ItemPredicate::undeleted())).unwrap();
        let ids: Vec<&str> = all.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["inbox", "archived"]);

        let pending = store
            .read(|r| r.items_with_status(SyncStatus::NeedsDeletion))
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let (store, _dir) = create_test_store();
        store.write(|w| w.upsert_item(make_item("i1", 1))).unwrap();

        let result = store.write(|w| {
            w.delete_item(&ItemId::new("i1"))?;
            Err::<(), _>(anyhow!("simulated failure"))
        });
        assert!(result.is_err());

        assert!(
            store
                .read(|r| r.get_item(&ItemId::new("i1")))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_label_uniqueness_and_lookup() {
        let (store, _dir) = create_test_store();
        store
            .write(|w| w.upsert_label(Label::new("l1", "later", "#abcdef").with_description("queue")))
            .unwrap();

        assert!(
            store
                .write(|w| w.upsert_label(Label::new("l2", "later", "#000000")))
                .is_err()
        );

        let found = store
            .read(|r| r.find_label_by_name("later"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id.as_str(), "l1");
        assert_eq!(found.description.as_deref(), Some("queue"));
        assert!(store.read(|r| r.find_label_by_name("Later")).unwrap().is_none());
    }

    #[test]
    fn test_delete_label_strips_item_references() {
        let (store, _dir) = create_test_store();
        store
            .write(|w| {
                w.upsert_label(Label::new("l1", "news", "#fff"))?;
                let mut item = make_item("i1", 1);
                item.add_label(LabelId::new("l1"));
                w.upsert_item(item)
            })
            .unwrap();

        let with_label = store
            .read(|r| r.items_with_label(&LabelId::new("l1")))
            .unwrap();
        assert_eq!(with_label.len(), 1);

        assert!(store.write(|w| w.delete_label(&LabelId::new("l1"))).unwrap());

        let item = store
            .read(|r| r.get_item(&ItemId::new("i1")))
            .unwrap()
            .unwrap();
        assert!(item.label_ids.is_empty());
    }

    #[test]
    fn test_highlight_round_trip() {
        let (store, _dir) = create_test_store();
        let highlight = Highlight::new("h1", "s1", "i1", "quoted text", "patch")
            .with_annotation("note")
            .with_labels(vec![LabelId::new("l1")]);
        store.write(|w| w.upsert_highlight(highlight)).unwrap();

        let loaded = store
            .read(|r| r.get_highlight(&HighlightId::new("h1")))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.annotation.as_deref(), Some("note"));
        assert_eq!(loaded.label_ids, vec![LabelId::new("l1")]);
        assert_eq!(loaded.sync_status, SyncStatus::NeedsCreation);

        assert!(store.write(|w| w.delete_highlight(&HighlightId::new("h1"))).unwrap());
        assert!(!store.write(|w| w.delete_highlight(&HighlightId::new("h1"))).unwrap());
    }
}
