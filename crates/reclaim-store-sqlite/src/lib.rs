use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use ulid::Ulid;

use reclaim_core::{
    ArchiveEntry, ArchivedItem, Category, Claimant, FoundId, FoundItem, FoundItemDraft, ItemKey,
    ItemKind, ItemStatus, LostId, LostItem, LostItemDraft, LostItemPatch, MatchId, MatchKey,
    MatchRecord,
};

const LATEST_SCHEMA_VERSION: i64 = 1;

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS id_counters (
  kind TEXT PRIMARY KEY,
  last_value INTEGER NOT NULL CHECK (last_value >= 0)
);

CREATE TABLE IF NOT EXISTS lost_items (
  item_key TEXT PRIMARY KEY,
  lost_seq INTEGER NOT NULL UNIQUE CHECK (lost_seq >= 1),
  name TEXT NOT NULL,
  description TEXT NOT NULL,
  category TEXT NOT NULL CHECK (category IN (
    'personal_belongings','electronics','school_supplies','tumblers_food_containers',
    'clothing_apparel','money_valuables','documents','other')),
  location TEXT NOT NULL,
  date_lost TEXT NOT NULL,
  notify_email TEXT,
  status TEXT NOT NULL CHECK (status IN ('pending','matched','claimed'))
);

CREATE TABLE IF NOT EXISTS found_items (
  item_key TEXT PRIMARY KEY,
  found_seq INTEGER NOT NULL UNIQUE CHECK (found_seq >= 1),
  name TEXT NOT NULL,
  description TEXT NOT NULL,
  category TEXT NOT NULL CHECK (category IN (
    'personal_belongings','electronics','school_supplies','tumblers_food_containers',
    'clothing_apparel','money_valuables','documents','other')),
  location_found TEXT NOT NULL,
  date_found TEXT NOT NULL,
  department TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('pending','matched','claimed'))
);

CREATE TABLE IF NOT EXISTS matches (
  match_key TEXT PRIMARY KEY,
  match_seq INTEGER NOT NULL UNIQUE CHECK (match_seq >= 1),
  lost_key TEXT NOT NULL UNIQUE,
  found_key TEXT NOT NULL UNIQUE,
  lost_seq INTEGER NOT NULL,
  found_seq INTEGER NOT NULL,
  lost_snapshot_json TEXT NOT NULL,
  found_snapshot_json TEXT NOT NULL,
  matched_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS archive_entries (
  item_key TEXT PRIMARY KEY,
  kind TEXT NOT NULL CHECK (kind IN ('lost','found')),
  item_json TEXT NOT NULL,
  claimed_by_id TEXT NOT NULL,
  claimed_by_name TEXT NOT NULL,
  archived_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_lost_items_status ON lost_items(status);
CREATE INDEX IF NOT EXISTS idx_lost_items_category ON lost_items(category);
CREATE INDEX IF NOT EXISTS idx_found_items_status ON found_items(status);
CREATE INDEX IF NOT EXISTS idx_found_items_category ON found_items(category);
CREATE INDEX IF NOT EXISTS idx_matches_matched_at ON matches(matched_at);
";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl SortOrder {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "newest" => Some(Self::Newest),
            "oldest" => Some(Self::Oldest),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Newest => "DESC",
            Self::Oldest => "ASC",
        }
    }
}

/// Listing filter shared by the lost, found, match, and archive queries.
/// `date` is an exact-day filter against the listing's primary date column.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ListFilter {
    pub category: Option<Category>,
    pub status: Option<ItemStatus>,
    pub date: Option<Date>,
    pub order: SortOrder,
}

/// Outcome of one transactional match-creation attempt. Everything except
/// `Created` leaves the database untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchCreateOutcome {
    Created(MatchRecord),
    MissingLost,
    MissingFound,
    NotPending,
}

/// Outcome of one transactional claim-matched attempt. `MissingItems` means
/// the match referenced an item that no longer exists; statuses and the
/// match record itself are left unchanged in that case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimMatchedOutcome {
    Claimed { lost: ArchiveEntry, found: ArchiveEntry },
    MatchNotFound,
    MissingItems { lost_missing: bool, found_missing: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelledMatch {
    pub record: MatchRecord,
    pub lost: Option<LostItem>,
    pub found: Option<FoundItem>,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open the catalog database and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or a migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version < 1 {
            let tx = self.conn.transaction()?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 1")?;
            record_schema_version(&tx, 1)?;
            tx.commit()?;
            version = 1;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Insert a lost-item report, assigning its key and sequential id.
    ///
    /// # Errors
    /// Returns an error when the insert transaction fails.
    pub fn create_lost(&mut self, draft: &LostItemDraft) -> Result<LostItem> {
        let tx = self.conn.transaction()?;
        let seq = next_sequence(&tx, "lost")?;
        let item = LostItem {
            key: ItemKey::new(),
            lost_id: LostId(seq),
            name: draft.name.clone(),
            description: draft.description.clone(),
            category: draft.category,
            location: draft.location.clone(),
            date_lost: draft.date_lost.unwrap_or_else(|| OffsetDateTime::now_utc().date()),
            notify_email: draft.notify_email.clone(),
            status: ItemStatus::Pending,
        };
        tx.execute(
            "INSERT INTO lost_items
               (item_key, lost_seq, name, description, category, location, date_lost, notify_email, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item.key.to_string(),
                item.lost_id.0,
                item.name,
                item.description,
                item.category.as_str(),
                item.location,
                encode_date(item.date_lost)?,
                item.notify_email,
                item.status.as_str(),
            ],
        )
        .context("failed to insert lost item")?;
        tx.commit()?;
        Ok(item)
    }

    /// Insert a found-item report, assigning its key and sequential id.
    ///
    /// # Errors
    /// Returns an error when the insert transaction fails.
    pub fn create_found(&mut self, draft: &FoundItemDraft) -> Result<FoundItem> {
        let tx = self.conn.transaction()?;
        let seq = next_sequence(&tx, "found")?;
        let item = FoundItem {
            key: ItemKey::new(),
            found_id: FoundId(seq),
            name: draft.name.clone(),
            description: draft.description.clone(),
            category: draft.category,
            location_found: draft.location_found.clone(),
            date_found: draft.date_found.unwrap_or_else(|| OffsetDateTime::now_utc().date()),
            department: draft
                .department
                .clone()
                .unwrap_or_else(|| FoundItemDraft::DEFAULT_DEPARTMENT.to_string()),
            status: ItemStatus::Pending,
        };
        tx.execute(
            "INSERT INTO found_items
               (item_key, found_seq, name, description, category, location_found, date_found, department, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item.key.to_string(),
                item.found_id.0,
                item.name,
                item.description,
                item.category.as_str(),
                item.location_found,
                encode_date(item.date_found)?,
                item.department,
                item.status.as_str(),
            ],
        )
        .context("failed to insert found item")?;
        tx.commit()?;
        Ok(item)
    }

    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn get_lost(&self, key: ItemKey) -> Result<Option<LostItem>> {
        fetch_lost(&self.conn, key)
    }

    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn get_found(&self, key: ItemKey) -> Result<Option<FoundItem>> {
        fetch_found(&self.conn, key)
    }

    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn get_match(&self, key: MatchKey) -> Result<Option<MatchRecord>> {
        fetch_match(&self.conn, key)
    }

    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn get_archive_entry(&self, key: ItemKey) -> Result<Option<ArchiveEntry>> {
        let row = self
            .conn
            .query_row(
                "SELECT item_json, claimed_by_id, claimed_by_name, archived_at
                 FROM archive_entries WHERE item_key = ?1",
                params![key.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("failed to read archive entry")?;

        row.map(|(item_json, claimed_by_id, claimed_by_name, archived_at)| {
            Ok(ArchiveEntry {
                item: serde_json::from_str(&item_json)
                    .context("failed to deserialize archived item")?,
                claimed_by_id,
                claimed_by_name,
                archived_at: parse_rfc3339(&archived_at)?,
            })
        })
        .transpose()
    }

    /// List lost items under the given filter, ordered by `date_lost`.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn list_lost(&self, filter: &ListFilter) -> Result<Vec<LostItem>> {
        let (sql, params) = listing_sql(
            "SELECT item_key, lost_seq, name, description, category, location, date_lost, notify_email, status
             FROM lost_items",
            "date_lost",
            "lost_seq",
            filter,
        )?;
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(lost_from_columns(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
            )?);
        }
        Ok(items)
    }

    /// List found items under the given filter, ordered by `date_found`.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn list_found(&self, filter: &ListFilter) -> Result<Vec<FoundItem>> {
        let (sql, params) = listing_sql(
            "SELECT item_key, found_seq, name, description, category, location_found, date_found, department, status
             FROM found_items",
            "date_found",
            "found_seq",
            filter,
        )?;
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(found_from_columns(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
            )?);
        }
        Ok(items)
    }

    /// Pending lost items in submission order (ascending sequential id).
    /// This is the orchestrator's stable pair-evaluation order.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn list_pending_lost(&self) -> Result<Vec<LostItem>> {
        let mut items = self.list_lost(&ListFilter {
            status: Some(ItemStatus::Pending),
            ..ListFilter::default()
        })?;
        items.sort_by_key(|item| item.lost_id.0);
        Ok(items)
    }

    /// Pending found items in submission order.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn list_pending_found(&self) -> Result<Vec<FoundItem>> {
        let mut items = self.list_found(&ListFilter {
            status: Some(ItemStatus::Pending),
            ..ListFilter::default()
        })?;
        items.sort_by_key(|item| item.found_id.0);
        Ok(items)
    }

    /// List match records, newest or oldest first, optionally filtered to one
    /// match day.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn list_matches(&self, date: Option<Date>, order: SortOrder) -> Result<Vec<MatchRecord>> {
        let mut sql = String::from(
            "SELECT match_key, match_seq, lost_key, found_key, lost_seq, found_seq,
                    lost_snapshot_json, found_snapshot_json, matched_at
             FROM matches",
        );
        let mut params: Vec<String> = Vec::new();
        if let Some(date) = date {
            sql.push_str(" WHERE substr(matched_at, 1, 10) = ?1");
            params.push(encode_date(date)?);
        }
        sql.push_str(&format!(" ORDER BY matched_at {}, match_seq ASC", order.sql()));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(match_from_columns(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
            )?);
        }
        Ok(records)
    }

    /// List archive entries under the given filter, ordered by archival time.
    /// Category and status filters apply to the archived item snapshot.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn list_archive(&self, filter: &ListFilter) -> Result<Vec<ArchiveEntry>> {
        let mut sql = String::from(
            "SELECT item_json, claimed_by_id, claimed_by_name, archived_at FROM archive_entries",
        );
        let mut params: Vec<String> = Vec::new();
        if let Some(date) = filter.date {
            sql.push_str(" WHERE substr(archived_at, 1, 10) = ?1");
            params.push(encode_date(date)?);
        }
        sql.push_str(&format!(" ORDER BY archived_at {}, item_key ASC", filter.order.sql()));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let item_json: String = row.get(0)?;
            let entry = ArchiveEntry {
                item: serde_json::from_str(&item_json)
                    .context("failed to deserialize archived item")?,
                claimed_by_id: row.get(1)?,
                claimed_by_name: row.get(2)?,
                archived_at: parse_rfc3339(&row.get::<_, String>(3)?)?,
            };
            if let Some(category) = filter.category {
                if entry.item.category() != category {
                    continue;
                }
            }
            if let Some(status) = filter.status {
                let item_status = match &entry.item {
                    ArchivedItem::Lost(item) => item.status,
                    ArchivedItem::Found(item) => item.status,
                };
                if item_status != status {
                    continue;
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Apply an owner edit to a lost-item report.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn update_lost(&mut self, key: ItemKey, patch: &LostItemPatch) -> Result<Option<LostItem>> {
        let tx = self.conn.transaction()?;
        let Some(mut item) = fetch_lost(&tx, key)? else {
            return Ok(None);
        };
        if let Some(name) = &patch.name {
            item.name.clone_from(name);
        }
        if let Some(description) = &patch.description {
            item.description.clone_from(description);
        }
        if let Some(category) = patch.category {
            item.category = category;
        }
        if let Some(location) = &patch.location {
            item.location.clone_from(location);
        }
        if let Some(notify_email) = &patch.notify_email {
            item.notify_email.clone_from(notify_email);
        }
        tx.execute(
            "UPDATE lost_items
             SET name = ?2, description = ?3, category = ?4, location = ?5, notify_email = ?6
             WHERE item_key = ?1",
            params![
                key.to_string(),
                item.name,
                item.description,
                item.category.as_str(),
                item.location,
                item.notify_email,
            ],
        )
        .context("failed to update lost item")?;
        tx.commit()?;
        Ok(Some(item))
    }

    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_lost(&self, key: ItemKey) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM lost_items WHERE item_key = ?1", params![key.to_string()])
            .context("failed to delete lost item")?;
        Ok(affected > 0)
    }

    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_found(&self, key: ItemKey) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM found_items WHERE item_key = ?1", params![key.to_string()])
            .context("failed to delete found item")?;
        Ok(affected > 0)
    }

    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count_found_in_category(&self, category: Category) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM found_items WHERE category = ?1",
                params![category.as_str()],
                |row| row.get(0),
            )
            .context("failed to count found items")?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Create a match for one (lost, found) pair in a single transaction:
    /// re-read both items, assign the sequential match id, snapshot both
    /// items, and flip both statuses to Matched. Any outcome other than
    /// `Created` leaves the database untouched.
    ///
    /// # Errors
    /// Returns an error when the transaction fails.
    pub fn create_match(
        &mut self,
        lost_key: ItemKey,
        found_key: ItemKey,
        matched_at: OffsetDateTime,
    ) -> Result<MatchCreateOutcome> {
        let tx = self.conn.transaction()?;
        let Some(lost) = fetch_lost(&tx, lost_key)? else {
            return Ok(MatchCreateOutcome::MissingLost);
        };
        let Some(found) = fetch_found(&tx, found_key)? else {
            return Ok(MatchCreateOutcome::MissingFound);
        };
        if lost.status != ItemStatus::Pending || found.status != ItemStatus::Pending {
            return Ok(MatchCreateOutcome::NotPending);
        }

        let seq = next_sequence(&tx, "match")?;
        let record = MatchRecord {
            key: MatchKey::new(),
            match_id: MatchId(seq),
            lost_key,
            lost_id: lost.lost_id,
            found_key,
            found_id: found.found_id,
            lost_snapshot: lost,
            found_snapshot: found,
            matched_at,
        };
        tx.execute(
            "INSERT INTO matches
               (match_key, match_seq, lost_key, found_key, lost_seq, found_seq,
                lost_snapshot_json, found_snapshot_json, matched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.key.to_string(),
                record.match_id.0,
                record.lost_key.to_string(),
                record.found_key.to_string(),
                record.lost_id.0,
                record.found_id.0,
                serde_json::to_string(&record.lost_snapshot)
                    .context("failed to serialize lost snapshot")?,
                serde_json::to_string(&record.found_snapshot)
                    .context("failed to serialize found snapshot")?,
                encode_timestamp(record.matched_at)?,
            ],
        )
        .context("failed to insert match record")?;
        set_status(&tx, ItemKind::Lost, lost_key, ItemStatus::Matched)?;
        set_status(&tx, ItemKind::Found, found_key, ItemStatus::Matched)?;
        tx.commit()?;
        Ok(MatchCreateOutcome::Created(record))
    }

    /// Move one live item into the archive with the claimant stamp and delete
    /// the live row. Returns `None` when the key does not resolve.
    ///
    /// # Errors
    /// Returns an error when the transaction fails.
    pub fn claim_item(
        &mut self,
        kind: ItemKind,
        key: ItemKey,
        claimant: &Claimant,
        archived_at: OffsetDateTime,
    ) -> Result<Option<ArchiveEntry>> {
        let tx = self.conn.transaction()?;
        let archived = match kind {
            ItemKind::Lost => {
                let Some(mut item) = fetch_lost(&tx, key)? else {
                    return Ok(None);
                };
                item.status = ItemStatus::Claimed;
                ArchivedItem::Lost(item)
            }
            ItemKind::Found => {
                let Some(mut item) = fetch_found(&tx, key)? else {
                    return Ok(None);
                };
                item.status = ItemStatus::Claimed;
                ArchivedItem::Found(item)
            }
        };
        let entry = ArchiveEntry {
            item: archived,
            claimed_by_id: claimant.id.clone(),
            claimed_by_name: claimant.name.clone(),
            archived_at,
        };
        insert_archive(&tx, &entry)?;
        delete_item(&tx, kind, key)?;
        tx.commit()?;
        Ok(Some(entry))
    }

    /// Archive both items referenced by a match and remove the match itself,
    /// atomically. If either item is missing, nothing changes and the match
    /// record is retained.
    ///
    /// # Errors
    /// Returns an error when the transaction fails.
    pub fn claim_matched(
        &mut self,
        match_key: MatchKey,
        claimant: &Claimant,
        archived_at: OffsetDateTime,
    ) -> Result<ClaimMatchedOutcome> {
        let tx = self.conn.transaction()?;
        let Some(record) = fetch_match(&tx, match_key)? else {
            return Ok(ClaimMatchedOutcome::MatchNotFound);
        };

        let (mut lost, mut found) =
            match (fetch_lost(&tx, record.lost_key)?, fetch_found(&tx, record.found_key)?) {
                (Some(lost), Some(found)) => (lost, found),
                (lost, found) => {
                    return Ok(ClaimMatchedOutcome::MissingItems {
                        lost_missing: lost.is_none(),
                        found_missing: found.is_none(),
                    });
                }
            };

        lost.status = ItemStatus::Claimed;
        found.status = ItemStatus::Claimed;
        let lost_entry = ArchiveEntry {
            item: ArchivedItem::Lost(lost),
            claimed_by_id: claimant.id.clone(),
            claimed_by_name: claimant.name.clone(),
            archived_at,
        };
        let found_entry = ArchiveEntry {
            item: ArchivedItem::Found(found),
            claimed_by_id: claimant.id.clone(),
            claimed_by_name: claimant.name.clone(),
            archived_at,
        };
        insert_archive(&tx, &lost_entry)?;
        insert_archive(&tx, &found_entry)?;
        delete_item(&tx, ItemKind::Lost, record.lost_key)?;
        delete_item(&tx, ItemKind::Found, record.found_key)?;
        tx.execute("DELETE FROM matches WHERE match_key = ?1", params![match_key.to_string()])
            .context("failed to delete match record")?;
        tx.commit()?;
        Ok(ClaimMatchedOutcome::Claimed { lost: lost_entry, found: found_entry })
    }

    /// Revert both referenced items to Pending and delete the match record.
    /// An item already removed out-of-band is skipped. Returns `None` when
    /// the match key does not resolve.
    ///
    /// # Errors
    /// Returns an error when the transaction fails.
    pub fn cancel_match(&mut self, match_key: MatchKey) -> Result<Option<CancelledMatch>> {
        let tx = self.conn.transaction()?;
        let Some(record) = fetch_match(&tx, match_key)? else {
            return Ok(None);
        };

        set_status(&tx, ItemKind::Lost, record.lost_key, ItemStatus::Pending)?;
        set_status(&tx, ItemKind::Found, record.found_key, ItemStatus::Pending)?;
        tx.execute("DELETE FROM matches WHERE match_key = ?1", params![match_key.to_string()])
            .context("failed to delete match record")?;
        let lost = fetch_lost(&tx, record.lost_key)?;
        let found = fetch_found(&tx, record.found_key)?;
        tx.commit()?;
        Ok(Some(CancelledMatch { record, lost, found }))
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .optional()
        .context("failed to read schema version")?
        .flatten();
    Ok(version.unwrap_or(0))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        params![version, encode_timestamp(OffsetDateTime::now_utc())?],
    )
    .context("failed to record schema version")?;
    Ok(())
}

/// Atomic increment-and-read of the per-kind sequential id counter. Runs
/// inside the caller's transaction so a record and its id commit together.
fn next_sequence(conn: &Connection, kind: &str) -> Result<u32> {
    conn.execute(
        "INSERT INTO id_counters (kind, last_value) VALUES (?1, 0)
         ON CONFLICT(kind) DO NOTHING",
        params![kind],
    )
    .context("failed to seed id counter")?;
    conn.execute("UPDATE id_counters SET last_value = last_value + 1 WHERE kind = ?1", params![kind])
        .context("failed to advance id counter")?;
    let value: u32 = conn
        .query_row("SELECT last_value FROM id_counters WHERE kind = ?1", params![kind], |row| {
            row.get(0)
        })
        .context("failed to read id counter")?;
    Ok(value)
}

fn listing_sql(
    select: &str,
    date_column: &str,
    seq_column: &str,
    filter: &ListFilter,
) -> Result<(String, Vec<String>)> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();
    if let Some(category) = filter.category {
        params.push(category.as_str().to_string());
        clauses.push(format!("category = ?{}", params.len()));
    }
    if let Some(status) = filter.status {
        params.push(status.as_str().to_string());
        clauses.push(format!("status = ?{}", params.len()));
    }
    if let Some(date) = filter.date {
        params.push(encode_date(date)?);
        clauses.push(format!("{date_column} = ?{}", params.len()));
    }

    let mut sql = select.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(&format!(
        " ORDER BY {date_column} {}, {seq_column} ASC",
        filter.order.sql()
    ));
    Ok((sql, params))
}

fn parse_item_key(value: &str) -> Result<ItemKey> {
    Ok(ItemKey(Ulid::from_string(value).context("invalid item key in database")?))
}

fn parse_match_key(value: &str) -> Result<MatchKey> {
    Ok(MatchKey(Ulid::from_string(value).context("invalid match key in database")?))
}

fn parse_category(value: &str) -> Result<Category> {
    Category::parse(value).ok_or_else(|| anyhow!("unknown category: {value}"))
}

fn parse_status(value: &str) -> Result<ItemStatus> {
    ItemStatus::parse(value).ok_or_else(|| anyhow!("unknown status: {value}"))
}

fn encode_date(date: Date) -> Result<String> {
    date.format(&DATE_FORMAT).context("failed to format date")
}

fn parse_date(value: &str) -> Result<Date> {
    Date::parse(value, &DATE_FORMAT).with_context(|| format!("invalid date in database: {value}"))
}

fn encode_timestamp(timestamp: OffsetDateTime) -> Result<String> {
    timestamp.format(&Rfc3339).context("failed to format timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339)
        .with_context(|| format!("invalid timestamp in database: {value}"))
}

#[allow(clippy::too_many_arguments)]
fn lost_from_columns(
    item_key: String,
    lost_seq: u32,
    name: String,
    description: String,
    category: String,
    location: String,
    date_lost: String,
    notify_email: Option<String>,
    status: String,
) -> Result<LostItem> {
    Ok(LostItem {
        key: parse_item_key(&item_key)?,
        lost_id: LostId(lost_seq),
        name,
        description,
        category: parse_category(&category)?,
        location,
        date_lost: parse_date(&date_lost)?,
        notify_email,
        status: parse_status(&status)?,
    })
}

#[allow(clippy::too_many_arguments)]
fn found_from_columns(
    item_key: String,
    found_seq: u32,
    name: String,
    description: String,
    category: String,
    location_found: String,
    date_found: String,
    department: String,
    status: String,
) -> Result<FoundItem> {
    Ok(FoundItem {
        key: parse_item_key(&item_key)?,
        found_id: FoundId(found_seq),
        name,
        description,
        category: parse_category(&category)?,
        location_found,
        date_found: parse_date(&date_found)?,
        department,
        status: parse_status(&status)?,
    })
}

#[allow(clippy::too_many_arguments)]
fn match_from_columns(
    match_key: String,
    match_seq: u32,
    lost_key: String,
    found_key: String,
    lost_seq: u32,
    found_seq: u32,
    lost_snapshot_json: String,
    found_snapshot_json: String,
    matched_at: String,
) -> Result<MatchRecord> {
    Ok(MatchRecord {
        key: parse_match_key(&match_key)?,
        match_id: MatchId(match_seq),
        lost_key: parse_item_key(&lost_key)?,
        found_key: parse_item_key(&found_key)?,
        lost_id: LostId(lost_seq),
        found_id: FoundId(found_seq),
        lost_snapshot: serde_json::from_str(&lost_snapshot_json)
            .context("failed to deserialize lost snapshot")?,
        found_snapshot: serde_json::from_str(&found_snapshot_json)
            .context("failed to deserialize found snapshot")?,
        matched_at: parse_rfc3339(&matched_at)?,
    })
}

fn fetch_lost(conn: &Connection, key: ItemKey) -> Result<Option<LostItem>> {
    let row = conn
        .query_row(
            "SELECT item_key, lost_seq, name, description, category, location, date_lost, notify_email, status
             FROM lost_items WHERE item_key = ?1",
            params![key.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        )
        .optional()
        .context("failed to read lost item")?;

    row.map(|(key, seq, name, description, category, location, date, email, status)| {
        lost_from_columns(key, seq, name, description, category, location, date, email, status)
    })
    .transpose()
}

fn fetch_found(conn: &Connection, key: ItemKey) -> Result<Option<FoundItem>> {
    let row = conn
        .query_row(
            "SELECT item_key, found_seq, name, description, category, location_found, date_found, department, status
             FROM found_items WHERE item_key = ?1",
            params![key.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        )
        .optional()
        .context("failed to read found item")?;

    row.map(|(key, seq, name, description, category, location, date, department, status)| {
        found_from_columns(key, seq, name, description, category, location, date, department, status)
    })
    .transpose()
}

fn fetch_match(conn: &Connection, key: MatchKey) -> Result<Option<MatchRecord>> {
    let row = conn
        .query_row(
            "SELECT match_key, match_seq, lost_key, found_key, lost_seq, found_seq,
                    lost_snapshot_json, found_snapshot_json, matched_at
             FROM matches WHERE match_key = ?1",
            params![key.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        )
        .optional()
        .context("failed to read match record")?;

    row.map(|(key, seq, lost_key, found_key, lost_seq, found_seq, lost_json, found_json, at)| {
        match_from_columns(key, seq, lost_key, found_key, lost_seq, found_seq, lost_json, found_json, at)
    })
    .transpose()
}

fn set_status(conn: &Connection, kind: ItemKind, key: ItemKey, status: ItemStatus) -> Result<()> {
    let sql = match kind {
        ItemKind::Lost => "UPDATE lost_items SET status = ?2 WHERE item_key = ?1",
        ItemKind::Found => "UPDATE found_items SET status = ?2 WHERE item_key = ?1",
    };
    conn.execute(sql, params![key.to_string(), status.as_str()])
        .with_context(|| format!("failed to set {} item status", kind.as_str()))?;
    Ok(())
}

fn delete_item(conn: &Connection, kind: ItemKind, key: ItemKey) -> Result<()> {
    let sql = match kind {
        ItemKind::Lost => "DELETE FROM lost_items WHERE item_key = ?1",
        ItemKind::Found => "DELETE FROM found_items WHERE item_key = ?1",
    };
    conn.execute(sql, params![key.to_string()])
        .with_context(|| format!("failed to delete {} item", kind.as_str()))?;
    Ok(())
}

fn insert_archive(conn: &Connection, entry: &ArchiveEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO archive_entries
           (item_key, kind, item_json, claimed_by_id, claimed_by_name, archived_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.key().to_string(),
            entry.item.kind().as_str(),
            serde_json::to_string(&entry.item).context("failed to serialize archived item")?,
            entry.claimed_by_id,
            entry.claimed_by_name,
            encode_timestamp(entry.archived_at)?,
        ],
    )
    .context("failed to insert archive entry")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use time::Month;

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("reclaim-store-{}.sqlite3", Ulid::new()))
    }

    fn open_migrated() -> (SqliteStore, PathBuf) {
        let path = unique_temp_db_path();
        let mut store = match SqliteStore::open(&path) {
            Ok(store) => store,
            Err(err) => panic!("failed to open store: {err}"),
        };
        if let Err(err) = store.migrate() {
            panic!("failed to migrate store: {err}");
        }
        (store, path)
    }

    fn date(year: i32, month: Month, day: u8) -> Date {
        Date::from_calendar_date(year, month, day)
            .unwrap_or_else(|err| panic!("invalid fixture date: {err}"))
    }

    fn lost_draft(description: &str, category: Category) -> LostItemDraft {
        LostItemDraft {
            name: "item".to_string(),
            description: description.to_string(),
            category,
            location: "3rd Floor".to_string(),
            date_lost: Some(date(2025, Month::March, 3)),
            notify_email: None,
        }
    }

    fn found_draft(description: &str, category: Category) -> FoundItemDraft {
        FoundItemDraft {
            name: "item".to_string(),
            description: description.to_string(),
            category,
            location_found: "6th Floor (Library)".to_string(),
            date_found: Some(date(2025, Month::March, 5)),
            department: None,
        }
    }

    fn fixture_timestamp() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(1_750_000_000)
    }

    fn claimant() -> Claimant {
        Claimant { id: "2021-00123".to_string(), name: "Dana Cruz".to_string() }
    }

    #[test]
    fn migrate_is_idempotent_and_reports_up_to_date() {
        let (mut store, path) = open_migrated();
        if let Err(err) = store.migrate() {
            panic!("re-migrate failed: {err}");
        }
        let status = match store.schema_status() {
            Ok(status) => status,
            Err(err) => panic!("schema status failed: {err}"),
        };
        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn sequential_ids_advance_and_never_reuse() -> Result<()> {
        let (mut store, path) = open_migrated();

        let first = store.create_lost(&lost_draft("black mouse", Category::Electronics))?;
        let second = store.create_lost(&lost_draft("blue notebook", Category::Documents))?;
        let found = store.create_found(&found_draft("black mouse", Category::Electronics))?;
        assert_eq!(first.lost_id.to_string(), "L0001");
        assert_eq!(second.lost_id.to_string(), "L0002");
        assert_eq!(found.found_id.to_string(), "F0001");
        assert_eq!(found.department, "SHS");
        assert_eq!(first.status, ItemStatus::Pending);

        assert!(store.delete_lost(second.key)?);
        let third = store.create_lost(&lost_draft("red umbrella", Category::Other))?;
        assert_eq!(third.lost_id.to_string(), "L0003");

        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[test]
    fn create_match_snapshots_items_and_flips_statuses() -> Result<()> {
        let (mut store, path) = open_migrated();
        let lost = store.create_lost(&lost_draft("black wireless mouse", Category::Electronics))?;
        let found =
            store.create_found(&found_draft("wireless mouse black color", Category::Electronics))?;

        let outcome = store.create_match(lost.key, found.key, fixture_timestamp())?;
        let MatchCreateOutcome::Created(record) = outcome else {
            panic!("expected match creation, got {outcome:?}");
        };
        assert_eq!(record.match_id.to_string(), "M0001");
        assert_eq!(record.lost_id, lost.lost_id);
        assert_eq!(record.lost_snapshot.status, ItemStatus::Pending);
        assert_eq!(record.found_snapshot.description, "wireless mouse black color");

        let lost_now = store.get_lost(lost.key)?.map(|item| item.status);
        let found_now = store.get_found(found.key)?.map(|item| item.status);
        assert_eq!(lost_now, Some(ItemStatus::Matched));
        assert_eq!(found_now, Some(ItemStatus::Matched));

        let again = store.create_match(lost.key, found.key, fixture_timestamp())?;
        assert_eq!(again, MatchCreateOutcome::NotPending);

        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[test]
    fn create_match_reports_missing_items() -> Result<()> {
        let (mut store, path) = open_migrated();
        let lost = store.create_lost(&lost_draft("black mouse", Category::Electronics))?;
        let outcome = store.create_match(lost.key, ItemKey::new(), fixture_timestamp())?;
        assert_eq!(outcome, MatchCreateOutcome::MissingFound);
        let outcome = store.create_match(ItemKey::new(), lost.key, fixture_timestamp())?;
        assert_eq!(outcome, MatchCreateOutcome::MissingLost);
        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[test]
    fn claim_item_moves_the_row_into_the_archive() -> Result<()> {
        let (mut store, path) = open_migrated();
        let found = store.create_found(&found_draft("black umbrella", Category::Other))?;

        let entry = store
            .claim_item(ItemKind::Found, found.key, &claimant(), fixture_timestamp())?
            .ok_or_else(|| anyhow!("expected archive entry"))?;
        assert_eq!(entry.claimed_by_name, "Dana Cruz");
        let ArchivedItem::Found(archived) = &entry.item else {
            panic!("expected a found-item archive entry");
        };
        assert_eq!(archived.status, ItemStatus::Claimed);

        assert!(store.get_found(found.key)?.is_none());
        assert!(store.get_archive_entry(found.key)?.is_some());
        assert!(store
            .claim_item(ItemKind::Found, found.key, &claimant(), fixture_timestamp())?
            .is_none());

        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[test]
    fn claim_matched_archives_both_sides_and_removes_the_match() -> Result<()> {
        let (mut store, path) = open_migrated();
        let lost = store.create_lost(&lost_draft("black mouse", Category::Electronics))?;
        let found = store.create_found(&found_draft("black mouse", Category::Electronics))?;
        let MatchCreateOutcome::Created(record) =
            store.create_match(lost.key, found.key, fixture_timestamp())?
        else {
            panic!("expected match creation");
        };

        let outcome = store.claim_matched(record.key, &claimant(), fixture_timestamp())?;
        let ClaimMatchedOutcome::Claimed { lost: lost_entry, found: found_entry } = outcome else {
            panic!("expected claimed outcome, got {outcome:?}");
        };
        assert_eq!(lost_entry.key(), lost.key);
        assert_eq!(found_entry.key(), found.key);
        assert!(store.get_lost(lost.key)?.is_none());
        assert!(store.get_found(found.key)?.is_none());
        assert!(store.get_match(record.key)?.is_none());
        assert_eq!(store.list_archive(&ListFilter::default())?.len(), 2);

        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[test]
    fn claim_matched_with_a_missing_item_changes_nothing() -> Result<()> {
        let (mut store, path) = open_migrated();
        let lost = store.create_lost(&lost_draft("black mouse", Category::Electronics))?;
        let found = store.create_found(&found_draft("black mouse", Category::Electronics))?;
        let MatchCreateOutcome::Created(record) =
            store.create_match(lost.key, found.key, fixture_timestamp())?
        else {
            panic!("expected match creation");
        };

        assert!(store.delete_found(found.key)?);
        let outcome = store.claim_matched(record.key, &claimant(), fixture_timestamp())?;
        assert_eq!(
            outcome,
            ClaimMatchedOutcome::MissingItems { lost_missing: false, found_missing: true }
        );

        let lost_status = store.get_lost(lost.key)?.map(|item| item.status);
        assert_eq!(lost_status, Some(ItemStatus::Matched));
        assert!(store.get_match(record.key)?.is_some());
        assert!(store.list_archive(&ListFilter::default())?.is_empty());

        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[test]
    fn cancel_match_reverts_statuses_and_frees_the_pair() -> Result<()> {
        let (mut store, path) = open_migrated();
        let lost = store.create_lost(&lost_draft("black mouse", Category::Electronics))?;
        let found = store.create_found(&found_draft("black mouse", Category::Electronics))?;
        let MatchCreateOutcome::Created(record) =
            store.create_match(lost.key, found.key, fixture_timestamp())?
        else {
            panic!("expected match creation");
        };

        let cancelled = store
            .cancel_match(record.key)?
            .ok_or_else(|| anyhow!("expected cancelled match"))?;
        assert_eq!(cancelled.record.key, record.key);
        assert_eq!(cancelled.lost.map(|item| item.status), Some(ItemStatus::Pending));
        assert_eq!(cancelled.found.map(|item| item.status), Some(ItemStatus::Pending));
        assert!(store.get_match(record.key)?.is_none());
        assert!(store.cancel_match(record.key)?.is_none());

        let MatchCreateOutcome::Created(second) =
            store.create_match(lost.key, found.key, fixture_timestamp())?
        else {
            panic!("expected re-match after cancel");
        };
        assert_eq!(second.match_id.to_string(), "M0002");

        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[test]
    fn listings_honor_category_status_and_date_filters() -> Result<()> {
        let (mut store, path) = open_migrated();
        let mut early = lost_draft("black mouse", Category::Electronics);
        early.date_lost = Some(date(2025, Month::February, 1));
        store.create_lost(&early)?;
        store.create_lost(&lost_draft("blue notebook", Category::Documents))?;
        store.create_lost(&lost_draft("white charger", Category::Electronics))?;

        let electronics = store.list_lost(&ListFilter {
            category: Some(Category::Electronics),
            ..ListFilter::default()
        })?;
        assert_eq!(electronics.len(), 2);
        // Newest first: the February item sorts last.
        assert_eq!(electronics[1].date_lost, date(2025, Month::February, 1));

        let by_date = store.list_lost(&ListFilter {
            date: Some(date(2025, Month::February, 1)),
            ..ListFilter::default()
        })?;
        assert_eq!(by_date.len(), 1);

        let oldest_first = store.list_lost(&ListFilter {
            order: SortOrder::Oldest,
            ..ListFilter::default()
        })?;
        assert_eq!(oldest_first[0].date_lost, date(2025, Month::February, 1));

        let pending = store.list_pending_lost()?;
        assert_eq!(pending.len(), 3);

        assert_eq!(store.count_found_in_category(Category::Electronics)?, 0);
        store.create_found(&found_draft("black mouse", Category::Electronics))?;
        assert_eq!(store.count_found_in_category(Category::Electronics)?, 1);

        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[test]
    fn update_lost_applies_the_patch_and_keeps_status() -> Result<()> {
        let (mut store, path) = open_migrated();
        let lost = store.create_lost(&lost_draft("black mouse", Category::Electronics))?;

        let patch = LostItemPatch {
            description: Some("black wireless mouse".to_string()),
            notify_email: Some(Some("student@school.example".to_string())),
            ..LostItemPatch::default()
        };
        let updated = store
            .update_lost(lost.key, &patch)?
            .ok_or_else(|| anyhow!("expected updated item"))?;
        assert_eq!(updated.description, "black wireless mouse");
        assert_eq!(updated.notify_email.as_deref(), Some("student@school.example"));
        assert_eq!(updated.status, ItemStatus::Pending);
        assert_eq!(updated.lost_id, lost.lost_id);

        assert!(store.update_lost(ItemKey::new(), &patch)?.is_none());
        assert!(!store.delete_found(ItemKey::new())?);

        let _ = std::fs::remove_file(path);
        Ok(())
    }
}
