//! Part-tree persistence
//!
//! Serializes a MIME part tree into `message_parts` rows and rebuilds it
//! from them. Rows are written in pre-order with a monotonically
//! increasing `seq`, so reading back `WHERE root = ? ORDER BY seq` always
//! yields a parent before any of its children.
//!
//! Bodies at or below [`MAX_BODY_SIZE_FOR_DATABASE`] are stored inline as
//! blobs; larger ones are spooled to a temp file and moved into the
//! attachment directory under the part's row id once that id exists.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use tempfile::NamedTempFile;

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::extract::MessageExtractor;
use crate::ids::PartId;
use crate::mime::encoding::{decoded_size, decoded_size_of_file};
use crate::mime::{
    BodyData, Headers, LeafBody, Message, Multipart, Part, PartBody, generate_boundary,
    is_message, is_multipart,
};

/// Bodies above this size go to disk instead of a database blob.
pub const MAX_BODY_SIZE_FOR_DATABASE: u64 = 16 * 1024;

/// Values of the `data_location` column
pub(crate) mod data_location {
    pub const MISSING: i64 = 0;
    pub const IN_DATABASE: i64 = 1;
    pub const ON_DISK: i64 = 2;
    pub const CHILD_CONTAINS_DATA: i64 = 3;
}

/// Column values for one part row, plus a spooled body file that moves
/// into place after the row id is known.
struct PartColumns {
    mime_type: String,
    header: Vec<u8>,
    data_location: i64,
    decoded_body_size: Option<i64>,
    display_name: Option<String>,
    encoding: Option<String>,
    data: Option<Vec<u8>>,
    preamble: Option<Vec<u8>>,
    epilogue: Option<Vec<u8>>,
    boundary: Option<String>,
    content_id: Option<String>,
}

/// Persist a message's whole part tree; returns the root part's row id.
///
/// The root row is inserted with a NULL `root` column and backfilled to
/// its own id by the schema trigger, so the tree query covers it too.
pub(crate) fn save_message_parts(
    conn: &Connection,
    db: &Database,
    extractor: &dyn MessageExtractor,
    message: &Message,
) -> Result<PartId> {
    let root_id = save_part(conn, db, extractor, None, -1, 0, &message.part)?;

    let mut stack: Vec<(PartId, &Part)> = Vec::new();
    push_children(&mut stack, &message.part, root_id);

    let mut seq = 1i64;
    while let Some((parent_id, part)) = stack.pop() {
        let part_id = save_part(conn, db, extractor, Some(root_id), parent_id.as_i64(), seq, part)?;
        seq += 1;
        push_children(&mut stack, part, part_id);
    }

    Ok(root_id)
}

/// Push `part`'s children so that popping yields document order.
fn push_children<'a>(stack: &mut Vec<(PartId, &'a Part)>, part: &'a Part, parent_id: PartId) {
    match &part.body {
        PartBody::Multipart(multipart) => {
            for child in multipart.parts.iter().rev() {
                stack.push((parent_id, child));
            }
        }
        PartBody::Message(inner) => stack.push((parent_id, &inner.part)),
        PartBody::Leaf(_) | PartBody::Missing => {}
    }
}

fn save_part(
    conn: &Connection,
    db: &Database,
    extractor: &dyn MessageExtractor,
    root: Option<PartId>,
    parent: i64,
    seq: i64,
    part: &Part,
) -> Result<PartId> {
    let (columns, spooled) = part_columns(db, extractor, part)?;

    conn.execute(
        "INSERT INTO message_parts (root, parent, seq, server_extra, mime_type, header, \
         data_location, decoded_body_size, display_name, encoding, data, preamble, epilogue, \
         boundary, content_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            root.map(PartId::as_i64),
            parent,
            seq,
            part.server_extra,
            columns.mime_type,
            columns.header,
            columns.data_location,
            columns.decoded_body_size,
            columns.display_name,
            columns.encoding,
            columns.data,
            columns.preamble,
            columns.epilogue,
            columns.boundary,
            columns.content_id,
        ],
    )?;
    let part_id = PartId(conn.last_insert_rowid());

    if let Some(file) = spooled {
        place_spooled_file(file, &db.attachment_file(part_id))?;
    }

    Ok(part_id)
}

/// Replace the stored content of one part, addressed by its server_extra
/// within an already-saved tree. Used when a body arrives after the
/// structure was stored.
pub(crate) fn add_part_to_message(
    conn: &Connection,
    db: &Database,
    extractor: &dyn MessageExtractor,
    root_part_id: PartId,
    part: &Part,
) -> Result<PartId> {
    let server_extra = part.server_extra.as_deref().unwrap_or_default();
    let part_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM message_parts WHERE root = ? AND server_extra = ?",
            params![root_part_id.as_i64(), server_extra],
            |row| row.get(0),
        )
        .optional()?;
    let part_id = PartId(part_id.ok_or_else(|| {
        StoreError::StructuralIntegrity("message part not found".to_string())
    })?);

    let (columns, spooled) = part_columns(db, extractor, part)?;

    conn.execute(
        "UPDATE message_parts SET mime_type = ?, header = ?, data_location = ?, \
         decoded_body_size = ?, display_name = ?, encoding = ?, data = ?, preamble = ?, \
         epilogue = ?, boundary = ?, content_id = ? WHERE id = ?",
        params![
            columns.mime_type,
            columns.header,
            columns.data_location,
            columns.decoded_body_size,
            columns.display_name,
            columns.encoding,
            columns.data,
            columns.preamble,
            columns.epilogue,
            columns.boundary,
            columns.content_id,
            part_id.as_i64(),
        ],
    )?;

    if let Some(file) = spooled {
        place_spooled_file(file, &db.attachment_file(part_id))?;
    }

    Ok(part_id)
}

fn part_columns(
    db: &Database,
    extractor: &dyn MessageExtractor,
    part: &Part,
) -> Result<(PartColumns, Option<NamedTempFile>)> {
    let mime_type = part.mime_type();
    let mut columns = PartColumns {
        mime_type: mime_type.clone(),
        header: part.headers.to_bytes(),
        data_location: data_location::MISSING,
        decoded_body_size: None,
        display_name: None,
        encoding: None,
        data: None,
        preamble: None,
        epilogue: None,
        boundary: None,
        content_id: None,
    };

    let mut spooled = None;
    match &part.body {
        PartBody::Multipart(multipart) => {
            columns.data_location = data_location::CHILD_CONTAINS_DATA;
            columns.preamble = multipart.preamble.clone();
            columns.epilogue = multipart.epilogue.clone();
            columns.boundary = Some(multipart.boundary.clone());
        }
        PartBody::Message(_) => {
            // Content lives in the embedded message's own child rows.
            columns.data_location = data_location::CHILD_CONTAINS_DATA;
        }
        PartBody::Missing => {
            let info = extractor.attachment_info(part);
            columns.display_name = info.display_name;
            columns.decoded_body_size = info.size.map(|size| size as i64);
            if is_multipart(&mime_type) {
                // A structure-only multipart still needs a boundary so it
                // can be reassembled for display.
                columns.boundary = Some(generate_boundary());
            }
        }
        PartBody::Leaf(leaf) => {
            let info = extractor.attachment_info(part);
            columns.display_name = info.display_name;
            columns.encoding = Some(leaf.encoding.clone());
            columns.content_id = part.content_id();

            let size = leaf.size()?;
            if size > MAX_BODY_SIZE_FOR_DATABASE {
                columns.data_location = data_location::ON_DISK;
                let file = spool_body(db, leaf)?;
                columns.decoded_body_size =
                    Some(decoded_size_of_file(file.path(), &leaf.encoding, size) as i64);
                spooled = Some(file);
            } else {
                columns.data_location = data_location::IN_DATABASE;
                let data = leaf.read()?;
                columns.decoded_body_size = Some(decoded_size(&data, &leaf.encoding) as i64);
                columns.data = Some(data);
            }
        }
    }

    Ok((columns, spooled))
}

/// Write a large body to a spool file next to the attachment directory.
fn spool_body(db: &Database, leaf: &LeafBody) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new_in(db.spool_dir())?;
    match &leaf.data {
        BodyData::Memory(data) => io::Write::write_all(&mut file, data)?,
        BodyData::File(path) => {
            let mut source = fs::File::open(path)?;
            io::copy(&mut source, &mut file)?;
        }
    }
    Ok(file)
}

/// Move a spooled body into its final place, copying when a rename
/// cannot cross the filesystem boundary.
fn place_spooled_file(file: NamedTempFile, destination: &Path) -> Result<()> {
    match file.persist(destination) {
        Ok(_) => Ok(()),
        Err(err) => {
            fs::copy(err.file.path(), destination)?;
            err.file.close()?;
            Ok(())
        }
    }
}

struct PartRow {
    id: i64,
    parent: i64,
    mime_type: Option<String>,
    header: Option<Vec<u8>>,
    data_location: i64,
    encoding: Option<String>,
    data: Option<Vec<u8>>,
    preamble: Option<Vec<u8>>,
    epilogue: Option<Vec<u8>>,
    boundary: Option<String>,
    server_extra: Option<String>,
}

/// How a loaded part may hold children
#[derive(Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Multipart,
    Message,
    None,
}

/// Rebuild a part tree from its rows.
///
/// Rows come back in `seq` order, so every parent is materialized before
/// its children; a second pass in reverse order moves children into their
/// parents without recursion.
pub(crate) fn load_message_parts(
    conn: &Connection,
    db: &Database,
    root_part_id: PartId,
) -> Result<Part> {
    let mut stmt = conn.prepare(
        "SELECT id, parent, mime_type, header, data_location, encoding, data, preamble, \
         epilogue, boundary, server_extra \
         FROM message_parts WHERE root = ? ORDER BY seq",
    )?;
    let rows = stmt.query_map([root_part_id.as_i64()], |row| {
        Ok(PartRow {
            id: row.get(0)?,
            parent: row.get(1)?,
            mime_type: row.get(2)?,
            header: row.get(3)?,
            data_location: row.get(4)?,
            encoding: row.get(5)?,
            data: row.get(6)?,
            preamble: row.get(7)?,
            epilogue: row.get(8)?,
            boundary: row.get(9)?,
            server_extra: row.get(10)?,
        })
    })?;

    // slot index by part row id, plus each slot's parent index and the
    // parent's container kind
    let mut parts: Vec<Option<Part>> = Vec::new();
    let mut links: Vec<Option<(usize, ContainerKind)>> = Vec::new();
    let mut kinds: Vec<ContainerKind> = Vec::new();
    let mut index_by_id: HashMap<i64, usize> = HashMap::new();

    for row in rows {
        let row = row?;
        let is_root = row.id == root_part_id.as_i64();

        let link = if is_root {
            None
        } else {
            let parent_index = *index_by_id.get(&row.parent).ok_or_else(|| {
                StoreError::StructuralIntegrity("parent part not found".to_string())
            })?;
            let parent_kind = kinds[parent_index];
            if parent_kind == ContainerKind::None {
                return Err(StoreError::StructuralIntegrity(
                    "parent is neither a multipart nor a message".to_string(),
                ));
            }
            Some((parent_index, parent_kind))
        };

        let (part, kind) = materialize_part(db, row, &mut index_by_id, parts.len())?;
        parts.push(Some(part));
        links.push(link);
        kinds.push(kind);
    }

    if parts.is_empty() {
        return Err(StoreError::StructuralIntegrity(
            "message part tree is empty".to_string(),
        ));
    }

    // Pre-order means every child sits at a higher index than its parent,
    // so walking backwards finishes each subtree before moving it up.
    for index in (1..parts.len()).rev() {
        let child = parts[index].take().unwrap();
        let (parent_index, parent_kind) = links[index].unwrap();
        let parent = parts[parent_index].as_mut().unwrap();
        match parent_kind {
            ContainerKind::Multipart => {
                if let PartBody::Multipart(multipart) = &mut parent.body {
                    multipart.parts.insert(0, child);
                }
            }
            ContainerKind::Message => {
                parent.body = PartBody::Message(Box::new(Message::new(child)));
            }
            ContainerKind::None => unreachable!(),
        }
    }

    Ok(parts[0].take().unwrap())
}

fn materialize_part(
    db: &Database,
    row: PartRow,
    index_by_id: &mut HashMap<i64, usize>,
    index: usize,
) -> Result<(Part, ContainerKind)> {
    let headers = match &row.header {
        Some(blob) => Headers::parse(blob)?,
        None => Headers::new(),
    };
    let mut part = Part::new(headers);
    part.server_extra = row.server_extra.clone();

    let mime_type = row.mime_type.clone().unwrap_or_default();
    let kind = if is_multipart(&mime_type) {
        part.body = PartBody::Multipart(Multipart {
            boundary: row.boundary.clone().unwrap_or_default(),
            preamble: row.preamble.clone(),
            epilogue: row.epilogue.clone(),
            parts: Vec::new(),
        });
        ContainerKind::Multipart
    } else if is_message(&mime_type) && row.data_location == data_location::CHILD_CONTAINS_DATA {
        // Body arrives from the child row, if one was stored. An rfc822
        // part saved with its raw bytes has a leaf location instead and
        // hydrates below like any other leaf.
        ContainerKind::Message
    } else {
        let encoding = row.encoding.clone().unwrap_or_else(|| "7bit".to_string());
        match row.data_location {
            data_location::IN_DATABASE => {
                part.body =
                    PartBody::Leaf(LeafBody::in_memory(encoding, row.data.clone().unwrap_or_default()));
            }
            data_location::ON_DISK => {
                let file = db.attachment_file(PartId(row.id));
                if file.exists() {
                    part.body = PartBody::Leaf(LeafBody::from_file(encoding, file));
                }
            }
            _ => {}
        }
        ContainerKind::None
    };

    index_by_id.insert(row.id, index);
    Ok((part, kind))
}

/// Delete the on-disk body files of one part tree.
pub(crate) fn delete_part_files(conn: &Connection, db: &Database, root_part_id: PartId) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id FROM message_parts WHERE root = ? AND data_location = ?",
    )?;
    let ids = stmt.query_map(
        params![root_part_id.as_i64(), data_location::ON_DISK],
        |row| row.get::<_, i64>(0),
    )?;

    for id in ids {
        let file = db.attachment_file(PartId(id?));
        if file.exists()
            && let Err(err) = fs::remove_file(&file)
        {
            log::debug!("couldn't delete message part file {}: {err}", file.display());
        }
    }
    Ok(())
}

/// Delete a part tree entirely: files first, then the rows.
pub(crate) fn delete_message_parts(conn: &Connection, db: &Database, root_part_id: PartId) -> Result<()> {
    delete_part_files(conn, db, root_part_id)?;
    conn.execute(
        "DELETE FROM message_parts WHERE root = ?",
        [root_part_id.as_i64()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::BasicExtractor;
    use tempfile::tempdir;

    fn open_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("mail.sqlite"), dir.path().join("att")).unwrap();
        (db, dir)
    }

    fn leaf(content_type: &str, body: &[u8]) -> Part {
        let mut headers = Headers::new();
        headers.push("Content-Type", content_type);
        let mut part = Part::new(headers);
        part.body = PartBody::Leaf(LeafBody::in_memory("7bit", body.to_vec()));
        part
    }

    fn multipart_message() -> Message {
        let mut headers = Headers::new();
        headers.push("Content-Type", "multipart/mixed; boundary=\"b1\"");
        let mut root = Part::new(headers);
        root.body = PartBody::Multipart(Multipart {
            boundary: "b1".into(),
            preamble: Some(b"pre".to_vec()),
            epilogue: None,
            parts: vec![
                leaf("text/plain", b"first body"),
                leaf("text/html", b"<p>second</p>"),
            ],
        });
        Message::new(root)
    }

    #[test]
    fn test_round_trip_preserves_structure_and_order() {
        let (db, _dir) = open_test_db();
        let message = multipart_message();

        let root_id = db
            .with_transaction(|tx| save_message_parts(tx, &db, &BasicExtractor, &message))
            .unwrap();

        let loaded = db
            .with_connection(|conn| load_message_parts(conn, &db, root_id))
            .unwrap();

        let PartBody::Multipart(multipart) = &loaded.body else {
            panic!("expected multipart root");
        };
        assert_eq!(multipart.boundary, "b1");
        assert_eq!(multipart.preamble.as_deref(), Some(&b"pre"[..]));
        assert_eq!(multipart.parts.len(), 2);
        assert_eq!(multipart.parts[0].mime_type(), "text/plain");
        assert_eq!(multipart.parts[1].mime_type(), "text/html");

        let PartBody::Leaf(first) = &multipart.parts[0].body else {
            panic!("expected leaf");
        };
        assert_eq!(first.read().unwrap(), b"first body");
    }

    #[test]
    fn test_large_body_goes_to_disk() {
        let (db, _dir) = open_test_db();

        let mut message = Message::new(leaf("application/octet-stream", b""));
        let big = vec![b'x'; MAX_BODY_SIZE_FOR_DATABASE as usize + 1];
        message.part.body = PartBody::Leaf(LeafBody::in_memory("7bit", big.clone()));

        let root_id = db
            .with_transaction(|tx| save_message_parts(tx, &db, &BasicExtractor, &message))
            .unwrap();

        let file = db.attachment_file(root_id);
        assert!(file.exists());
        assert_eq!(fs::metadata(&file).unwrap().len(), big.len() as u64);

        let loaded = db
            .with_connection(|conn| load_message_parts(conn, &db, root_id))
            .unwrap();
        let PartBody::Leaf(body) = &loaded.body else {
            panic!("expected leaf");
        };
        assert!(matches!(body.data, BodyData::File(_)));
        assert_eq!(body.read().unwrap(), big);
    }

    #[test]
    fn test_threshold_body_stays_inline() {
        let (db, _dir) = open_test_db();

        let exact = vec![b'y'; MAX_BODY_SIZE_FOR_DATABASE as usize];
        let mut message = Message::new(leaf("text/plain", b""));
        message.part.body = PartBody::Leaf(LeafBody::in_memory("7bit", exact));

        let root_id = db
            .with_transaction(|tx| save_message_parts(tx, &db, &BasicExtractor, &message))
            .unwrap();

        assert!(!db.attachment_file(root_id).exists());
        let location: i64 = db
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT data_location FROM message_parts WHERE id = ?",
                    [root_id.as_i64()],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(location, data_location::IN_DATABASE);
    }

    #[test]
    fn test_missing_file_loads_without_body() {
        let (db, _dir) = open_test_db();

        let big = vec![b'z'; MAX_BODY_SIZE_FOR_DATABASE as usize + 1];
        let mut message = Message::new(leaf("application/octet-stream", b""));
        message.part.body = PartBody::Leaf(LeafBody::in_memory("7bit", big));

        let root_id = db
            .with_transaction(|tx| save_message_parts(tx, &db, &BasicExtractor, &message))
            .unwrap();
        fs::remove_file(db.attachment_file(root_id)).unwrap();

        let loaded = db
            .with_connection(|conn| load_message_parts(conn, &db, root_id))
            .unwrap();
        assert!(matches!(loaded.body, PartBody::Missing));
    }

    #[test]
    fn test_add_part_fills_in_missing_body() {
        let (db, _dir) = open_test_db();

        let mut attachment = Part::new({
            let mut headers = Headers::new();
            headers.push("Content-Type", "application/pdf");
            headers.push("Content-Disposition", "attachment; filename=\"a.pdf\"; size=3");
            headers
        });
        attachment.server_extra = Some("2".to_string());

        let mut headers = Headers::new();
        headers.push("Content-Type", "multipart/mixed; boundary=\"b2\"");
        let mut root = Part::new(headers);
        root.body = PartBody::Multipart(Multipart {
            boundary: "b2".into(),
            preamble: None,
            epilogue: None,
            parts: vec![leaf("text/plain", b"body"), attachment.clone()],
        });
        let message = Message::new(root);

        let root_id = db
            .with_transaction(|tx| save_message_parts(tx, &db, &BasicExtractor, &message))
            .unwrap();

        attachment.body = PartBody::Leaf(LeafBody::in_memory("base64", b"cGRm".to_vec()));
        db.with_transaction(|tx| {
            add_part_to_message(tx, &db, &BasicExtractor, root_id, &attachment)
        })
        .unwrap();

        let loaded = db
            .with_connection(|conn| load_message_parts(conn, &db, root_id))
            .unwrap();
        let PartBody::Multipart(multipart) = &loaded.body else {
            panic!("expected multipart root");
        };
        let PartBody::Leaf(body) = &multipart.parts[1].body else {
            panic!("expected leaf after update");
        };
        assert_eq!(body.read().unwrap(), b"cGRm");
        assert_eq!(body.encoding, "base64");
    }

    #[test]
    fn test_embedded_message_round_trip() {
        let (db, _dir) = open_test_db();

        let mut inner_headers = Headers::new();
        inner_headers.push("Subject", "inner");
        inner_headers.push("Content-Type", "text/plain");
        let mut inner = Part::new(inner_headers);
        inner.body = PartBody::Leaf(LeafBody::in_memory("7bit", b"inner body".to_vec()));

        let mut rfc822_headers = Headers::new();
        rfc822_headers.push("Content-Type", "message/rfc822");
        let mut rfc822 = Part::new(rfc822_headers);
        rfc822.body = PartBody::Message(Box::new(Message::new(inner)));

        let message = Message::new(rfc822);

        let root_id = db
            .with_transaction(|tx| save_message_parts(tx, &db, &BasicExtractor, &message))
            .unwrap();

        let loaded = db
            .with_connection(|conn| load_message_parts(conn, &db, root_id))
            .unwrap();
        let PartBody::Message(embedded) = &loaded.body else {
            panic!("expected embedded message");
        };
        assert_eq!(embedded.subject().as_deref(), Some("inner"));
    }

    #[test]
    fn test_unparsed_rfc822_body_stays_a_leaf() {
        let (db, _dir) = open_test_db();

        let raw = b"Subject: raw\r\n\r\nforwarded bytes".to_vec();
        let mut headers = Headers::new();
        headers.push("Content-Type", "message/rfc822");
        let mut part = Part::new(headers);
        part.body = PartBody::Leaf(LeafBody::in_memory("7bit", raw.clone()));
        let message = Message::new(part);

        let root_id = db
            .with_transaction(|tx| save_message_parts(tx, &db, &BasicExtractor, &message))
            .unwrap();

        let location: i64 = db
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT data_location FROM message_parts WHERE id = ?",
                    [root_id.as_i64()],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(location, data_location::IN_DATABASE);

        let loaded = db
            .with_connection(|conn| load_message_parts(conn, &db, root_id))
            .unwrap();
        let PartBody::Leaf(leaf) = &loaded.body else {
            panic!("expected the raw bytes back as a leaf");
        };
        assert_eq!(leaf.read().unwrap(), raw);
    }

    #[test]
    fn test_delete_removes_rows_and_files() {
        let (db, _dir) = open_test_db();

        let big = vec![b'q'; MAX_BODY_SIZE_FOR_DATABASE as usize + 1];
        let mut message = Message::new(leaf("application/octet-stream", b""));
        message.part.body = PartBody::Leaf(LeafBody::in_memory("7bit", big));

        let root_id = db
            .with_transaction(|tx| save_message_parts(tx, &db, &BasicExtractor, &message))
            .unwrap();
        assert!(db.attachment_file(root_id).exists());

        db.with_transaction(|tx| delete_message_parts(tx, &db, root_id))
            .unwrap();

        assert!(!db.attachment_file(root_id).exists());
        let count: i64 = db
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM message_parts WHERE root = ?",
                    [root_id.as_i64()],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
