//! Folder handle: metadata accessor plus all per-folder message operations
//!
//! A `Folder` is cheap to create and loads its metadata row lazily on
//! first use; a missing folder surfaces as `FolderNotFound` at that
//! point. Setters update the cached state first, then persist the single
//! changed column.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, ToSql, params, params_from_iter};

use crate::address;
use crate::codec;
use crate::error::{Result, StoreError};
use crate::extract::Preview;
use crate::flags::{Flag, deserialize_flags, serialize_flags};
use crate::ids::{FolderId, MessageRowId, PartId, ThreadNodeId};
use crate::message::{MessageEntry, StoredMessage, ThreadPlacement};
use crate::mime::Message;
use crate::store::LocalStore;
use crate::threading;

/// Prefix of UIDs generated locally, before the server assigns one.
pub const LOCAL_UID_PREFIX: &str = "LOCAL:";

/// Batch size for uid existence checks.
const UID_CHECK_BATCH_SIZE: usize = 500;

/// Per-purpose folder classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FolderClass {
    #[default]
    NoClass,
    /// Defer to the next class in the resolution chain.
    Inherited,
    FirstClass,
    SecondClass,
}

impl FolderClass {
    pub fn as_token(self) -> &'static str {
        match self {
            FolderClass::NoClass => "NO_CLASS",
            FolderClass::Inherited => "INHERITED",
            FolderClass::FirstClass => "FIRST_CLASS",
            FolderClass::SecondClass => "SECOND_CLASS",
        }
    }

    pub fn from_token(token: &str) -> Result<FolderClass> {
        match token {
            "NO_CLASS" => Ok(FolderClass::NoClass),
            "INHERITED" => Ok(FolderClass::Inherited),
            "FIRST_CLASS" => Ok(FolderClass::FirstClass),
            "SECOND_CLASS" => Ok(FolderClass::SecondClass),
            other => Err(StoreError::InvalidValue(format!(
                "unknown folder class: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FolderType {
    #[default]
    Regular,
    Inbox,
    Outbox,
    Drafts,
    Sent,
    Trash,
    Spam,
    Archive,
}

impl FolderType {
    pub fn as_token(self) -> &'static str {
        match self {
            FolderType::Regular => "regular",
            FolderType::Inbox => "inbox",
            FolderType::Outbox => "outbox",
            FolderType::Drafts => "drafts",
            FolderType::Sent => "sent",
            FolderType::Trash => "trash",
            FolderType::Spam => "spam",
            FolderType::Archive => "archive",
        }
    }

    pub fn from_token(token: &str) -> Result<FolderType> {
        match token {
            "regular" => Ok(FolderType::Regular),
            "inbox" => Ok(FolderType::Inbox),
            "outbox" => Ok(FolderType::Outbox),
            "drafts" => Ok(FolderType::Drafts),
            "sent" => Ok(FolderType::Sent),
            "trash" => Ok(FolderType::Trash),
            "spam" => Ok(FolderType::Spam),
            "archive" => Ok(FolderType::Archive),
            other => Err(StoreError::InvalidValue(format!(
                "unknown folder type: {other}"
            ))),
        }
    }
}

/// Whether the server holds messages beyond the visible window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoreMessages {
    #[default]
    Unknown,
    False,
    True,
}

impl MoreMessages {
    pub fn as_token(self) -> &'static str {
        match self {
            MoreMessages::Unknown => "unknown",
            MoreMessages::False => "false",
            MoreMessages::True => "true",
        }
    }

    pub fn from_token(token: &str) -> Result<MoreMessages> {
        match token {
            "unknown" => Ok(MoreMessages::Unknown),
            "false" => Ok(MoreMessages::False),
            "true" => Ok(MoreMessages::True),
            other => Err(StoreError::InvalidValue(format!(
                "unknown more_messages value: {other}"
            ))),
        }
    }
}

/// The folder metadata row, cached after the first load
#[derive(Debug, Clone)]
pub struct FolderDetails {
    pub id: FolderId,
    pub server_id: Option<String>,
    pub name: Option<String>,
    pub folder_type: FolderType,
    pub local_only: bool,
    pub visible_limit: i64,
    pub status: Option<String>,
    pub last_checked: i64,
    pub in_top_group: bool,
    pub integrate: bool,
    pub display_class: FolderClass,
    pub sync_class: FolderClass,
    pub push_class: FolderClass,
    pub notify_class: FolderClass,
    pub more_messages: MoreMessages,
}

impl FolderDetails {
    /// Sync resolves through display.
    pub fn resolved_sync_class(&self) -> FolderClass {
        if self.sync_class == FolderClass::Inherited {
            self.display_class
        } else {
            self.sync_class
        }
    }

    /// Push resolves through sync.
    pub fn resolved_push_class(&self) -> FolderClass {
        if self.push_class == FolderClass::Inherited {
            self.resolved_sync_class()
        } else {
            self.push_class
        }
    }

    /// Notify resolves through push.
    pub fn resolved_notify_class(&self) -> FolderClass {
        if self.notify_class == FolderClass::Inherited {
            self.resolved_push_class()
        } else {
            self.notify_class
        }
    }
}

enum FolderLookup {
    ServerId(String),
    Id(FolderId),
}

pub struct Folder {
    store: LocalStore,
    lookup: FolderLookup,
    state: Mutex<Option<FolderDetails>>,
}

impl Folder {
    pub(crate) fn by_server_id(store: LocalStore, server_id: &str) -> Folder {
        Folder {
            store,
            lookup: FolderLookup::ServerId(server_id.to_string()),
            state: Mutex::new(None),
        }
    }

    pub(crate) fn by_id(store: LocalStore, id: FolderId) -> Folder {
        Folder {
            store,
            lookup: FolderLookup::Id(id),
            state: Mutex::new(None),
        }
    }

    /// Load (or return the cached) metadata row.
    pub fn open(&self) -> Result<FolderDetails> {
        let mut state = self.state.lock().unwrap();
        if let Some(details) = state.as_ref() {
            return Ok(details.clone());
        }

        let raw = self.store.db.with_connection(|conn| {
            let sql = "SELECT id, name, server_id, local_only, type, visible_limit, status, \
                       last_updated, top_group, integrate, display_class, poll_class, \
                       push_class, notify_class, more_messages FROM folders WHERE ";
            let raw = match &self.lookup {
                FolderLookup::ServerId(server_id) => conn
                    .query_row(&format!("{sql}server_id = ?"), [server_id], raw_folder_row)
                    .optional()?,
                FolderLookup::Id(id) => conn
                    .query_row(&format!("{sql}id = ?"), [id.as_i64()], raw_folder_row)
                    .optional()?,
            };
            Ok(raw)
        })?;

        let raw = raw.ok_or_else(|| StoreError::FolderNotFound(self.lookup_label()))?;
        let details = raw.into_details()?;
        *state = Some(details.clone());
        Ok(details)
    }

    fn lookup_label(&self) -> String {
        match &self.lookup {
            FolderLookup::ServerId(server_id) => server_id.clone(),
            FolderLookup::Id(id) => format!("id {id}"),
        }
    }

    pub fn id(&self) -> Result<FolderId> {
        Ok(self.open()?.id)
    }

    /// Whether the folder row exists, without the `FolderNotFound` error.
    pub fn exists(&self) -> Result<bool> {
        self.store.db.with_connection(|conn| {
            let id: Option<i64> = match &self.lookup {
                FolderLookup::ServerId(server_id) => conn
                    .query_row("SELECT id FROM folders WHERE server_id = ?", [server_id], |row| {
                        row.get(0)
                    })
                    .optional()?,
                FolderLookup::Id(id) => conn
                    .query_row("SELECT id FROM folders WHERE id = ?", [id.as_i64()], |row| {
                        row.get(0)
                    })
                    .optional()?,
            };
            Ok(id.is_some())
        })
    }

    pub fn name(&self) -> Result<Option<String>> {
        Ok(self.open()?.name)
    }

    pub fn server_id(&self) -> Result<Option<String>> {
        Ok(self.open()?.server_id)
    }

    pub fn folder_type(&self) -> Result<FolderType> {
        Ok(self.open()?.folder_type)
    }

    pub fn is_local_only(&self) -> Result<bool> {
        Ok(self.open()?.local_only)
    }

    pub fn visible_limit(&self) -> Result<i64> {
        Ok(self.open()?.visible_limit)
    }

    pub fn status(&self) -> Result<Option<String>> {
        Ok(self.open()?.status)
    }

    pub fn last_checked(&self) -> Result<i64> {
        Ok(self.open()?.last_checked)
    }

    pub fn is_in_top_group(&self) -> Result<bool> {
        Ok(self.open()?.in_top_group)
    }

    pub fn is_integrate(&self) -> Result<bool> {
        Ok(self.open()?.integrate)
    }

    pub fn more_messages(&self) -> Result<MoreMessages> {
        Ok(self.open()?.more_messages)
    }

    pub fn display_class(&self) -> Result<FolderClass> {
        Ok(self.open()?.display_class)
    }

    pub fn sync_class(&self) -> Result<FolderClass> {
        Ok(self.open()?.resolved_sync_class())
    }

    pub fn raw_sync_class(&self) -> Result<FolderClass> {
        Ok(self.open()?.sync_class)
    }

    pub fn push_class(&self) -> Result<FolderClass> {
        Ok(self.open()?.resolved_push_class())
    }

    pub fn raw_push_class(&self) -> Result<FolderClass> {
        Ok(self.open()?.push_class)
    }

    pub fn notify_class(&self) -> Result<FolderClass> {
        Ok(self.open()?.resolved_notify_class())
    }

    pub fn raw_notify_class(&self) -> Result<FolderClass> {
        Ok(self.open()?.notify_class)
    }

    fn update_column(
        &self,
        column: &str,
        value: impl ToSql,
        apply: impl FnOnce(&mut FolderDetails),
    ) -> Result<()> {
        let folder_id = self.id()?;
        {
            let mut state = self.state.lock().unwrap();
            if let Some(details) = state.as_mut() {
                apply(details);
            }
        }
        self.store.db.with_connection(|conn| {
            conn.execute(
                &format!("UPDATE folders SET {column} = ? WHERE id = ?"),
                params![value, folder_id.as_i64()],
            )?;
            Ok(())
        })
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.update_column("name", name.clone(), |d| d.name = Some(name))
    }

    pub fn set_type(&self, folder_type: FolderType) -> Result<()> {
        self.update_column("type", folder_type.as_token(), |d| {
            d.folder_type = folder_type
        })
    }

    pub fn set_status(&self, status: Option<&str>) -> Result<()> {
        let status = status.map(str::to_string);
        self.update_column("status", status.clone(), |d| d.status = status)
    }

    pub fn set_last_checked(&self, last_checked: i64) -> Result<()> {
        self.update_column("last_updated", last_checked, |d| {
            d.last_checked = last_checked
        })
    }

    pub fn set_in_top_group(&self, in_top_group: bool) -> Result<()> {
        self.update_column("top_group", in_top_group, |d| d.in_top_group = in_top_group)
    }

    pub fn set_integrate(&self, integrate: bool) -> Result<()> {
        self.update_column("integrate", integrate, |d| d.integrate = integrate)
    }

    pub fn set_more_messages(&self, more_messages: MoreMessages) -> Result<()> {
        self.update_column("more_messages", more_messages.as_token(), |d| {
            d.more_messages = more_messages
        })
    }

    pub fn set_display_class(&self, class: FolderClass) -> Result<()> {
        self.update_column("display_class", class.as_token(), |d| d.display_class = class)
    }

    pub fn set_sync_class(&self, class: FolderClass) -> Result<()> {
        self.update_column("poll_class", class.as_token(), |d| d.sync_class = class)
    }

    pub fn set_push_class(&self, class: FolderClass) -> Result<()> {
        self.update_column("push_class", class.as_token(), |d| d.push_class = class)
    }

    pub fn set_notify_class(&self, class: FolderClass) -> Result<()> {
        self.update_column("notify_class", class.as_token(), |d| d.notify_class = class)
    }

    /// Change the visible window, resetting the more-messages marker when
    /// the window grows, or shrinks while more messages were not known to
    /// be available.
    pub fn set_visible_limit(&self, visible_limit: i64) -> Result<()> {
        let details = self.open()?;
        let grow = visible_limit > details.visible_limit;
        let shrink = visible_limit < details.visible_limit;
        if grow || (shrink && details.more_messages != MoreMessages::True) {
            self.set_more_messages(MoreMessages::Unknown)?;
        }
        self.update_column("visible_limit", visible_limit, |d| {
            d.visible_limit = visible_limit
        })
    }

    pub fn message_count(&self) -> Result<i64> {
        let folder_id = self.id()?;
        self.store.db.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(id) FROM messages WHERE empty = 0 AND deleted = 0 AND folder_id = ?",
                [folder_id.as_i64()],
                |row| row.get(0),
            )?)
        })
    }

    pub fn unread_message_count(&self) -> Result<i64> {
        let folder_id = self.id()?;
        self.store.db.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(id) FROM messages \
                 WHERE folder_id = ? AND empty = 0 AND deleted = 0 AND read = 0",
                [folder_id.as_i64()],
                |row| row.get(0),
            )?)
        })
    }

    pub fn get_message(&self, uid: &str) -> Result<Option<MessageEntry>> {
        let folder_id = self.id()?;
        self.store.db.with_connection(|conn| {
            let raw = conn
                .query_row(
                    &message_query("messages.uid = ? AND messages.folder_id = ?"),
                    params![uid, folder_id.as_i64()],
                    raw_message_row,
                )
                .optional()?;
            raw.map(RawMessageRow::into_entry).transpose()
        })
    }

    pub fn get_message_by_id(&self, row_id: MessageRowId) -> Result<Option<MessageEntry>> {
        let folder_id = self.id()?;
        self.store.db.with_connection(|conn| {
            let raw = conn
                .query_row(
                    &message_query("messages.id = ? AND messages.folder_id = ?"),
                    params![row_id.as_i64(), folder_id.as_i64()],
                    raw_message_row,
                )
                .optional()?;
            raw.map(RawMessageRow::into_entry).transpose()
        })
    }

    pub fn message_uid(&self, row_id: MessageRowId) -> Result<Option<String>> {
        let folder_id = self.id()?;
        self.store.db.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT uid FROM messages WHERE id = ? AND folder_id = ?",
                    params![row_id.as_i64(), folder_id.as_i64()],
                    |row| row.get(0),
                )
                .optional()?
                .flatten())
        })
    }

    pub fn all_message_uids(&self) -> Result<Vec<String>> {
        let folder_id = self.id()?;
        self.store.db.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT uid FROM messages \
                 WHERE empty = 0 AND deleted = 0 AND folder_id = ? ORDER BY date DESC",
            )?;
            let uids = stmt
                .query_map([folder_id.as_i64()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(uids)
        })
    }

    /// All real messages, newest first.
    pub fn get_messages(&self, include_deleted: bool) -> Result<Vec<StoredMessage>> {
        let folder_id = self.id()?;
        let condition = if include_deleted {
            "messages.empty = 0 AND messages.folder_id = ?"
        } else {
            "messages.empty = 0 AND messages.deleted = 0 AND messages.folder_id = ?"
        };
        self.store.db.with_connection(|conn| {
            let mut stmt =
                conn.prepare(&format!("{} ORDER BY messages.date DESC", message_query(condition)))?;
            let raws = stmt
                .query_map([folder_id.as_i64()], raw_message_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let mut messages = Vec::with_capacity(raws.len());
            for raw in raws {
                if let Some(message) = raw.into_entry()?.into_real() {
                    messages.push(message);
                }
            }
            Ok(messages)
        })
    }

    pub fn get_messages_by_uids(&self, uids: &[String]) -> Result<Vec<StoredMessage>> {
        let mut messages = Vec::new();
        for uid in uids {
            if let Some(message) = self.get_message(uid)?.and_then(MessageEntry::into_real) {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    /// Hydrate a message's part tree from its stored rows.
    pub fn fetch_body(&self, message: &mut StoredMessage) -> Result<()> {
        let Some(root_part_id) = message.root_part_id else {
            return Ok(());
        };
        let part = self
            .store
            .db
            .with_connection(|conn| codec::load_message_parts(conn, &self.store.db, root_part_id))?;
        message.part = Some(part);
        Ok(())
    }

    /// Save messages into this folder, assigning local UIDs where the
    /// messages carry none. A message whose UID already exists replaces
    /// the stored one in place. Returns the stored UID of each message in
    /// input order.
    pub fn append_messages(&self, messages: &[Message]) -> Result<Vec<String>> {
        let folder_id = self.id()?;
        self.store.db.with_transaction(|tx| {
            let mut uids = Vec::with_capacity(messages.len());
            for message in messages {
                let (uid, _) = self.save_message(tx, folder_id, message, false)?;
                uids.push(uid);
            }
            Ok(uids)
        })
    }

    /// Save copies of already-stored messages into this folder. Each copy
    /// gets a fresh local UID; the returned map records source UID to
    /// destination UID.
    pub fn append_copies(&self, messages: &[Message]) -> Result<HashMap<String, String>> {
        let folder_id = self.id()?;
        self.store.db.with_transaction(|tx| {
            let mut uid_map = HashMap::new();
            for message in messages {
                let (new_uid, _) = self.save_message(tx, folder_id, message, true)?;
                if let Some(source_uid) = &message.uid {
                    uid_map.insert(source_uid.clone(), new_uid);
                }
            }
            Ok(uid_map)
        })
    }

    fn save_message(
        &self,
        tx: &Connection,
        folder_id: FolderId,
        message: &Message,
        copy: bool,
    ) -> Result<(String, MessageRowId)> {
        let mut old_message_id: Option<MessageRowId> = None;

        let uid = match &message.uid {
            Some(uid) if !copy => {
                // Matching UID replaces the stored message in place,
                // keeping row id and thread linkage.
                let old: Option<(i64, Option<i64>)> = tx
                    .query_row(
                        "SELECT id, message_part_id FROM messages WHERE uid = ? AND folder_id = ?",
                        params![uid, folder_id.as_i64()],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                if let Some((id, part_id)) = old {
                    old_message_id = Some(MessageRowId(id));
                    if let Some(part_id) = part_id {
                        codec::delete_message_parts(tx, &self.store.db, PartId(part_id))?;
                    }
                }
                uid.clone()
            }
            _ => format!("{LOCAL_UID_PREFIX}{}", uuid::Uuid::new_v4()),
        };

        let mut root: Option<ThreadNodeId> = None;
        let mut parent: Option<ThreadNodeId> = None;
        if old_message_id.is_none() {
            let info = threading::resolve_threading(tx, folder_id, message)?;
            old_message_id = info.message_row;
            root = info.root;
            parent = info.parent;
        }

        let (encryption_type, preview, attachment_count, fulltext) =
            match self.store.encryption.classify(message) {
                Some(result) => (
                    Some(result.encryption_type),
                    result.preview,
                    result.attachment_count,
                    result.fulltext,
                ),
                None => (
                    None,
                    self.store.extractor.preview(message),
                    self.store.extractor.attachment_count(message),
                    self.store.extractor.fulltext(message),
                ),
            };

        let root_part_id =
            codec::save_message_parts(tx, &self.store.db, self.store.extractor.as_ref(), message)?;

        let now = Utc::now().timestamp_millis();
        let date = message
            .sent_date()
            .map(|d| d.timestamp_millis())
            .unwrap_or(now);
        let internal_date = message
            .internal_date
            .map(|d| d.timestamp_millis())
            .unwrap_or(now);

        let subject = message.subject();
        let sender_list = address::pack(&message.from_addresses());
        let to_list = address::pack(&message.to_addresses());
        let cc_list = address::pack(&message.cc_addresses());
        let bcc_list = address::pack(&message.bcc_addresses());
        let reply_to_list = address::pack(&message.reply_to_addresses());
        let flags = serialize_flags(&message.flags);
        let deleted = message.flags.contains(&Flag::Deleted);
        let read = message.flags.contains(&Flag::Seen);
        let flagged = message.flags.contains(&Flag::Flagged);
        let answered = message.flags.contains(&Flag::Answered);
        let forwarded = message.flags.contains(&Flag::Forwarded);
        let mime_type = message.mime_type();
        let message_id_header = message.message_id();
        let preview_text = preview.text().map(str::to_string);

        let message_row = match old_message_id {
            Some(row_id) => {
                tx.execute(
                    "UPDATE messages SET uid = ?, subject = ?, sender_list = ?, date = ?, \
                     flags = ?, deleted = ?, read = ?, flagged = ?, answered = ?, forwarded = ?, \
                     folder_id = ?, to_list = ?, cc_list = ?, bcc_list = ?, reply_to_list = ?, \
                     attachment_count = ?, internal_date = ?, mime_type = ?, empty = 0, \
                     encryption_type = ?, preview_type = ?, preview = ?, message_part_id = ?, \
                     message_id = COALESCE(?, message_id) \
                     WHERE id = ?",
                    params![
                        uid,
                        subject,
                        sender_list,
                        date,
                        flags,
                        deleted,
                        read,
                        flagged,
                        answered,
                        forwarded,
                        folder_id.as_i64(),
                        to_list,
                        cc_list,
                        bcc_list,
                        reply_to_list,
                        attachment_count,
                        internal_date,
                        mime_type,
                        encryption_type,
                        preview.kind_token(),
                        preview_text,
                        root_part_id.as_i64(),
                        message_id_header,
                        row_id.as_i64(),
                    ],
                )?;
                row_id
            }
            None => {
                tx.execute(
                    "INSERT INTO messages (uid, subject, sender_list, date, flags, deleted, \
                     read, flagged, answered, forwarded, folder_id, to_list, cc_list, bcc_list, \
                     reply_to_list, attachment_count, internal_date, mime_type, empty, \
                     encryption_type, preview_type, preview, message_part_id, message_id) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?)",
                    params![
                        uid,
                        subject,
                        sender_list,
                        date,
                        flags,
                        deleted,
                        read,
                        flagged,
                        answered,
                        forwarded,
                        folder_id.as_i64(),
                        to_list,
                        cc_list,
                        bcc_list,
                        reply_to_list,
                        attachment_count,
                        internal_date,
                        mime_type,
                        encryption_type,
                        preview.kind_token(),
                        preview_text,
                        root_part_id.as_i64(),
                        message_id_header,
                    ],
                )?;
                let row_id = MessageRowId(tx.last_insert_rowid());
                tx.execute(
                    "INSERT INTO threads (message_id, root, parent) VALUES (?, ?, ?)",
                    params![
                        row_id.as_i64(),
                        root.map(ThreadNodeId::as_i64),
                        parent.map(ThreadNodeId::as_i64),
                    ],
                )?;
                row_id
            }
        };

        if let Some(fulltext) = fulltext {
            tx.execute(
                "INSERT OR REPLACE INTO messages_fulltext (docid, fulltext) VALUES (?, ?)",
                params![message_row.as_i64(), fulltext],
            )?;
        }

        Ok((uid, message_row))
    }

    /// Rewrite the stored UID of a message, keyed by row id.
    pub fn change_uid(&self, row_id: MessageRowId, uid: &str) -> Result<()> {
        let folder_id = self.id()?;
        self.store.db.with_connection(|conn| {
            conn.execute(
                "UPDATE messages SET uid = ? WHERE id = ? AND folder_id = ?",
                params![uid, row_id.as_i64(), folder_id.as_i64()],
            )?;
            Ok(())
        })
    }

    /// Filter server UIDs down to the ones not stored yet, preserving
    /// input order.
    pub fn extract_new_messages(&self, server_uids: &[String]) -> Result<Vec<String>> {
        let folder_id = self.id()?;
        self.store.db.with_connection(|conn| {
            let mut result = Vec::new();
            for chunk in server_uids.chunks(UID_CHECK_BATCH_SIZE) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let mut stmt = conn.prepare(&format!(
                    "SELECT uid FROM messages WHERE folder_id = ? AND uid IN ({placeholders})"
                ))?;
                let values = std::iter::once(Value::Integer(folder_id.as_i64()))
                    .chain(chunk.iter().map(|uid| Value::Text(uid.clone())));
                let existing = stmt
                    .query_map(params_from_iter(values), |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<HashSet<String>>>()?;
                for uid in chunk {
                    if !existing.contains(uid) {
                        result.push(uid.clone());
                    }
                }
            }
            Ok(result)
        })
    }

    /// Set or clear flags on a batch of messages in one transaction.
    /// A failure on one message is logged and skipped, the rest proceed.
    pub fn set_flags(&self, row_ids: &[MessageRowId], flags: &[Flag], value: bool) -> Result<()> {
        self.open()?;
        self.store.db.with_transaction(|tx| {
            for &row_id in row_ids {
                if let Err(err) = update_message_flags(tx, row_id, flags, value) {
                    log::warn!("failed to set flags on message {row_id}: {err}");
                }
            }
            Ok(())
        })
    }

    /// Remove one message, preserving thread structure: a message with
    /// thread children collapses into an empty placeholder; a leaf is
    /// deleted outright, along with any chain of empty childless
    /// ancestors above it.
    pub fn destroy_message(&self, row_id: MessageRowId) -> Result<()> {
        let folder_id = self.id()?;
        self.store.db.with_transaction(|tx| {
            let row: Option<(Option<i64>, Option<String>)> = tx
                .query_row(
                    "SELECT message_part_id, message_id FROM messages \
                     WHERE id = ? AND folder_id = ?",
                    params![row_id.as_i64(), folder_id.as_i64()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((part_id, header)) = row else {
                return Ok(());
            };
            self.destroy_message_tx(tx, folder_id, row_id, part_id.map(PartId), header.as_deref())
        })
    }

    pub fn destroy_messages(&self, row_ids: &[MessageRowId]) -> Result<()> {
        let folder_id = self.id()?;
        self.store.db.with_transaction(|tx| {
            for &row_id in row_ids {
                let row: Option<(Option<i64>, Option<String>)> = tx
                    .query_row(
                        "SELECT message_part_id, message_id FROM messages \
                         WHERE id = ? AND folder_id = ?",
                        params![row_id.as_i64(), folder_id.as_i64()],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                if let Some((part_id, header)) = row {
                    self.destroy_message_tx(
                        tx,
                        folder_id,
                        row_id,
                        part_id.map(PartId),
                        header.as_deref(),
                    )?;
                }
            }
            Ok(())
        })
    }

    fn destroy_message_tx(
        &self,
        tx: &Connection,
        folder_id: FolderId,
        row_id: MessageRowId,
        part_id: Option<PartId>,
        message_id_header: Option<&str>,
    ) -> Result<()> {
        if let Some(part_id) = part_id {
            codec::delete_message_parts(tx, &self.store.db, part_id)?;
        }
        tx.execute(
            "DELETE FROM messages_fulltext WHERE docid = ?",
            [row_id.as_i64()],
        )?;

        if has_thread_children(tx, row_id)? {
            // Other messages hang off this one; keep its place in the
            // thread as an empty placeholder.
            tx.execute(
                "REPLACE INTO messages (id, folder_id, deleted, message_id, empty) \
                 VALUES (?, ?, 0, ?, 1)",
                params![row_id.as_i64(), folder_id.as_i64(), message_id_header],
            )?;
            return Ok(());
        }

        let mut current = empty_thread_parent(tx, row_id)?;
        delete_message_row(tx, row_id)?;

        while let Some(id) = current {
            if has_thread_children(tx, id)? {
                break;
            }
            let next = empty_thread_parent(tx, id)?;
            delete_message_row(tx, id)?;
            current = next;
        }
        Ok(())
    }

    /// Destroy all messages flagged deleted. Returns how many were
    /// removed.
    pub fn destroy_deleted_messages(&self) -> Result<usize> {
        self.destroy_matching("empty = 0 AND deleted = 1")
    }

    /// Destroy all messages that only ever existed locally.
    pub fn destroy_local_only_messages(&self) -> Result<usize> {
        self.destroy_matching(&format!("uid LIKE '{LOCAL_UID_PREFIX}%'"))
    }

    fn destroy_matching(&self, selection: &str) -> Result<usize> {
        let folder_id = self.id()?;
        self.store.db.with_transaction(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT id, message_part_id, message_id FROM messages \
                 WHERE folder_id = ? AND {selection}"
            ))?;
            let rows = stmt
                .query_map([folder_id.as_i64()], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            drop(stmt);

            let count = rows.len();
            for (id, part_id, header) in rows {
                self.destroy_message_tx(
                    tx,
                    folder_id,
                    MessageRowId(id),
                    part_id.map(PartId),
                    header.as_deref(),
                )?;
            }

            compact_fulltext_entries(tx)?;
            Ok(count)
        })
    }

    /// Remove every message in the folder, including placeholders, and
    /// reset the sync markers.
    pub fn clear_all_messages(&self) -> Result<()> {
        let folder_id = self.id()?;
        self.store.db.with_transaction(|tx| {
            self.delete_folder_messages(tx, folder_id)
        })?;
        self.set_more_messages(MoreMessages::Unknown)?;
        self.set_last_checked(0)?;
        Ok(())
    }

    /// Delete the folder row and everything in it.
    pub fn delete(self) -> Result<()> {
        let folder_id = self.id()?;
        self.store.db.with_transaction(|tx| {
            self.delete_folder_messages(tx, folder_id)?;
            tx.execute("DELETE FROM folders WHERE id = ?", [folder_id.as_i64()])?;
            Ok(())
        })
    }

    fn delete_folder_messages(&self, tx: &Connection, folder_id: FolderId) -> Result<()> {
        let mut stmt = tx.prepare(
            "SELECT message_part_id FROM messages WHERE folder_id = ? AND empty = 0",
        )?;
        let part_ids = stmt
            .query_map([folder_id.as_i64()], |row| row.get::<_, Option<i64>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        for part_id in part_ids.into_iter().flatten() {
            codec::delete_message_parts(tx, &self.store.db, PartId(part_id))?;
        }

        tx.execute(
            "DELETE FROM messages_fulltext WHERE docid IN \
             (SELECT id FROM messages WHERE folder_id = ?)",
            [folder_id.as_i64()],
        )?;
        tx.execute(
            "DELETE FROM threads WHERE message_id IN \
             (SELECT id FROM messages WHERE folder_id = ?)",
            [folder_id.as_i64()],
        )?;
        tx.execute("DELETE FROM messages WHERE folder_id = ?", [folder_id.as_i64()])?;
        Ok(())
    }
}

fn update_message_flags(
    conn: &Connection,
    row_id: MessageRowId,
    flags: &[Flag],
    value: bool,
) -> Result<()> {
    let row: Option<(Option<String>, bool, bool, bool, bool, bool)> = conn
        .query_row(
            "SELECT flags, deleted, read, flagged, answered, forwarded \
             FROM messages WHERE id = ?",
            [row_id.as_i64()],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .optional()?;
    let Some((serialized, deleted, read, flagged, answered, forwarded)) = row else {
        return Err(StoreError::InvalidValue(format!(
            "no message with id {row_id}"
        )));
    };

    let mut set = deserialize_flags(serialized.as_deref(), deleted, read, flagged, answered, forwarded);
    for &flag in flags {
        if value {
            set.insert(flag);
        } else {
            set.remove(&flag);
        }
    }

    conn.execute(
        "UPDATE messages SET flags = ?, deleted = ?, read = ?, flagged = ?, answered = ?, \
         forwarded = ? WHERE id = ?",
        params![
            serialize_flags(&set),
            set.contains(&Flag::Deleted),
            set.contains(&Flag::Seen),
            set.contains(&Flag::Flagged),
            set.contains(&Flag::Answered),
            set.contains(&Flag::Forwarded),
            row_id.as_i64(),
        ],
    )?;
    Ok(())
}

/// Whether any thread node has this message's node as its parent.
fn has_thread_children(conn: &Connection, row_id: MessageRowId) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(t2.id) FROM threads t1 \
         JOIN threads t2 ON (t2.parent = t1.id) \
         WHERE t1.message_id = ?",
        [row_id.as_i64()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Message row id of this message's thread parent, if that parent is an
/// empty placeholder.
fn empty_thread_parent(conn: &Connection, row_id: MessageRowId) -> Result<Option<MessageRowId>> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT m.id FROM threads t1 \
             JOIN threads t2 ON (t1.parent = t2.id) \
             LEFT JOIN messages m ON (t2.message_id = m.id) \
             WHERE t1.message_id = ? AND m.empty = 1",
            [row_id.as_i64()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(MessageRowId))
}

fn delete_message_row(conn: &Connection, row_id: MessageRowId) -> Result<()> {
    conn.execute("DELETE FROM messages WHERE id = ?", [row_id.as_i64()])?;
    conn.execute("DELETE FROM threads WHERE message_id = ?", [row_id.as_i64()])?;
    Ok(())
}

fn compact_fulltext_entries(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT INTO messages_fulltext(messages_fulltext) VALUES('optimize')",
        [],
    )?;
    Ok(())
}

fn message_query(condition: &str) -> String {
    format!(
        "SELECT messages.id, messages.uid, messages.subject, messages.date, \
         messages.internal_date, messages.flags, messages.deleted, messages.read, \
         messages.flagged, messages.answered, messages.forwarded, messages.sender_list, \
         messages.to_list, messages.cc_list, messages.bcc_list, messages.reply_to_list, \
         messages.attachment_count, messages.message_id, messages.message_part_id, \
         messages.mime_type, messages.empty, messages.encryption_type, \
         messages.preview_type, messages.preview, messages.folder_id, \
         threads.id, threads.root, threads.parent \
         FROM messages \
         LEFT JOIN threads ON (threads.message_id = messages.id) \
         WHERE {condition}"
    )
}

struct RawMessageRow {
    id: i64,
    uid: Option<String>,
    subject: Option<String>,
    date: Option<i64>,
    internal_date: Option<i64>,
    flags: Option<String>,
    deleted: bool,
    read: bool,
    flagged: bool,
    answered: bool,
    forwarded: bool,
    sender_list: Option<String>,
    to_list: Option<String>,
    cc_list: Option<String>,
    bcc_list: Option<String>,
    reply_to_list: Option<String>,
    attachment_count: i64,
    message_id: Option<String>,
    message_part_id: Option<i64>,
    mime_type: Option<String>,
    empty: bool,
    encryption_type: Option<String>,
    preview_type: String,
    preview: Option<String>,
    folder_id: i64,
    thread_id: Option<i64>,
    thread_root: Option<i64>,
    thread_parent: Option<i64>,
}

fn raw_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMessageRow> {
    Ok(RawMessageRow {
        id: row.get(0)?,
        uid: row.get(1)?,
        subject: row.get(2)?,
        date: row.get(3)?,
        internal_date: row.get(4)?,
        flags: row.get(5)?,
        deleted: row.get(6)?,
        read: row.get(7)?,
        flagged: row.get(8)?,
        answered: row.get(9)?,
        forwarded: row.get(10)?,
        sender_list: row.get(11)?,
        to_list: row.get(12)?,
        cc_list: row.get(13)?,
        bcc_list: row.get(14)?,
        reply_to_list: row.get(15)?,
        attachment_count: row.get(16)?,
        message_id: row.get(17)?,
        message_part_id: row.get(18)?,
        mime_type: row.get(19)?,
        empty: row.get(20)?,
        encryption_type: row.get(21)?,
        preview_type: row.get(22)?,
        preview: row.get(23)?,
        folder_id: row.get(24)?,
        thread_id: row.get(25)?,
        thread_root: row.get(26)?,
        thread_parent: row.get(27)?,
    })
}

impl RawMessageRow {
    fn into_entry(self) -> Result<MessageEntry> {
        let thread = self.thread_id.map(|node| ThreadPlacement {
            node: ThreadNodeId(node),
            root: self.thread_root.map(ThreadNodeId),
            parent: self.thread_parent.map(ThreadNodeId),
        });

        if self.empty {
            return Ok(MessageEntry::Placeholder {
                row_id: MessageRowId(self.id),
                folder_id: FolderId(self.folder_id),
                message_id: self.message_id,
                thread,
            });
        }

        Ok(MessageEntry::Real(StoredMessage {
            row_id: MessageRowId(self.id),
            folder_id: FolderId(self.folder_id),
            uid: self.uid.unwrap_or_default(),
            subject: self.subject,
            date: millis_to_datetime(self.date),
            internal_date: millis_to_datetime(self.internal_date),
            flags: deserialize_flags(
                self.flags.as_deref(),
                self.deleted,
                self.read,
                self.flagged,
                self.answered,
                self.forwarded,
            ),
            from: address::unpack(self.sender_list.as_deref())?,
            to: address::unpack(self.to_list.as_deref())?,
            cc: address::unpack(self.cc_list.as_deref())?,
            bcc: address::unpack(self.bcc_list.as_deref())?,
            reply_to: address::unpack(self.reply_to_list.as_deref())?,
            attachment_count: self.attachment_count.max(0) as u32,
            message_id: self.message_id,
            root_part_id: self.message_part_id.map(PartId),
            mime_type: self.mime_type,
            encryption_type: self.encryption_type,
            preview: Preview::from_columns(&self.preview_type, self.preview),
            thread,
            part: None,
        }))
    }
}

struct RawFolderRow {
    id: i64,
    name: Option<String>,
    server_id: Option<String>,
    local_only: bool,
    folder_type: String,
    visible_limit: i64,
    status: Option<String>,
    last_checked: i64,
    in_top_group: bool,
    integrate: bool,
    display_class: Option<String>,
    sync_class: Option<String>,
    push_class: Option<String>,
    notify_class: Option<String>,
    more_messages: String,
}

fn raw_folder_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawFolderRow> {
    Ok(RawFolderRow {
        id: row.get(0)?,
        name: row.get(1)?,
        server_id: row.get(2)?,
        local_only: row.get(3)?,
        folder_type: row.get(4)?,
        visible_limit: row.get(5)?,
        status: row.get(6)?,
        last_checked: row.get(7)?,
        in_top_group: row.get(8)?,
        integrate: row.get(9)?,
        display_class: row.get(10)?,
        sync_class: row.get(11)?,
        push_class: row.get(12)?,
        notify_class: row.get(13)?,
        more_messages: row.get(14)?,
    })
}

impl RawFolderRow {
    fn into_details(self) -> Result<FolderDetails> {
        let class = |token: Option<String>| -> Result<FolderClass> {
            match token {
                Some(token) => FolderClass::from_token(&token),
                None => Ok(FolderClass::NoClass),
            }
        };
        Ok(FolderDetails {
            id: FolderId(self.id),
            server_id: self.server_id,
            name: self.name,
            folder_type: FolderType::from_token(&self.folder_type)?,
            local_only: self.local_only,
            visible_limit: self.visible_limit,
            status: self.status,
            last_checked: self.last_checked,
            in_top_group: self.in_top_group,
            integrate: self.integrate,
            display_class: class(self.display_class)?,
            sync_class: class(self.sync_class)?,
            push_class: class(self.push_class)?,
            notify_class: class(self.notify_class)?,
            more_messages: MoreMessages::from_token(&self.more_messages)?,
        })
    }
}

fn millis_to_datetime(millis: Option<i64>) -> DateTime<Utc> {
    millis
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
