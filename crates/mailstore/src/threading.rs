//! Message threading from References / In-Reply-To headers
//!
//! Threads are a forest over thread-node ids. Each referenced-but-unseen
//! ancestor becomes an empty placeholder message row plus a thread node,
//! so a reply can always hang off something. When a references chain runs
//! into a node that already heads an independent chain, that chain's
//! whole subtree is re-rooted onto the chain being walked.
//!
//! The walk is strictly left-to-right and only merges forward; repeated
//! saves with out-of-order or duplicated reference lists can in principle
//! leave two roots unmerged. That matches the behavior this store
//! replicates and is a documented limitation.

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::ids::{FolderId, MessageRowId, ThreadNodeId};
use crate::mime::{Message, extract_message_id, extract_message_ids};

/// Resolved thread placement for a message about to be saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    /// Thread node of an existing empty placeholder for this message's
    /// own Message-ID, if one was waiting for it.
    pub thread_id: Option<ThreadNodeId>,
    /// Message row of that placeholder.
    pub message_row: Option<MessageRowId>,
    /// The message's own Message-ID header value.
    pub message_id_header: Option<String>,
    pub root: Option<ThreadNodeId>,
    pub parent: Option<ThreadNodeId>,
}

/// Thread lookup by Message-ID header within one folder.
///
/// Prefers the earliest message row when several share the header.
/// Returns `None` when no row (or no thread node) exists.
fn thread_info_for(
    conn: &Connection,
    folder_id: FolderId,
    message_id_header: &str,
    only_empty: bool,
) -> Result<Option<(ThreadNodeId, MessageRowId, Option<ThreadNodeId>, Option<ThreadNodeId>)>> {
    let sql = format!(
        "SELECT t.id, m.id, t.root, t.parent \
         FROM messages m \
         LEFT JOIN threads t ON (t.message_id = m.id) \
         WHERE m.folder_id = ? AND m.message_id = ? {} \
         ORDER BY m.id LIMIT 1",
        if only_empty { "AND m.empty = 1" } else { "" }
    );

    let row: Option<(Option<i64>, i64, Option<i64>, Option<i64>)> = conn
        .query_row(
            &sql,
            params![folder_id.as_i64(), message_id_header],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    Ok(row.and_then(|(thread_id, msg_id, root, parent)| {
        thread_id.map(|thread_id| {
            (
                ThreadNodeId(thread_id),
                MessageRowId(msg_id),
                root.map(ThreadNodeId),
                parent.map(ThreadNodeId),
            )
        })
    }))
}

/// Ordered ancestor candidates: References ids in header order, with the
/// first In-Reply-To id appended when not already present.
fn ancestor_candidates(message: &Message) -> Vec<String> {
    let mut ids = message
        .part
        .headers
        .get_first("References")
        .map(extract_message_ids)
        .unwrap_or_default();

    if let Some(in_reply_to) = message
        .part
        .headers
        .get_first("In-Reply-To")
        .and_then(extract_message_id)
        && !ids.contains(&in_reply_to)
    {
        ids.push(in_reply_to);
    }

    ids
}

/// Resolve thread placement for `message`, creating placeholder rows for
/// referenced ancestors that do not exist yet. Must run inside the save
/// transaction.
pub(crate) fn resolve_threading(
    conn: &Connection,
    folder_id: FolderId,
    message: &Message,
) -> Result<ThreadInfo> {
    let message_id_header = message.message_id();

    // An empty placeholder may already be holding this message's spot.
    let own_placeholder = match message_id_header.as_deref() {
        Some(header) => thread_info_for(conn, folder_id, header, true)?,
        None => None,
    };

    let candidates = ancestor_candidates(message);

    if candidates.is_empty() {
        // Not a reply: the message roots its own thread, or takes over
        // the placeholder's existing position.
        return Ok(match own_placeholder {
            Some((thread_id, message_row, root, parent)) => ThreadInfo {
                thread_id: Some(thread_id),
                message_row: Some(message_row),
                message_id_header,
                root,
                parent,
            },
            None => ThreadInfo {
                thread_id: None,
                message_row: None,
                message_id_header,
                root: None,
                parent: None,
            },
        });
    }

    let mut root: Option<ThreadNodeId> = None;
    let mut parent: Option<ThreadNodeId> = None;

    for reference in &candidates {
        match thread_info_for(conn, folder_id, reference, false)? {
            None => {
                // Unknown ancestor: create an empty placeholder message
                // and hang its thread node off the chain walked so far.
                conn.execute(
                    "INSERT INTO messages (message_id, folder_id, empty) VALUES (?, ?, 1)",
                    params![reference, folder_id.as_i64()],
                )?;
                let placeholder_row = conn.last_insert_rowid();

                conn.execute(
                    "INSERT INTO threads (message_id, root, parent) VALUES (?, ?, ?)",
                    params![
                        placeholder_row,
                        root.map(ThreadNodeId::as_i64),
                        parent.map(ThreadNodeId::as_i64),
                    ],
                )?;
                let node = ThreadNodeId(conn.last_insert_rowid());

                parent = Some(node);
                if root.is_none() {
                    root = Some(node);
                }
            }
            Some((node, _message_row, node_root, _node_parent)) => {
                match root {
                    Some(established)
                        if node_root.is_none() && established != node =>
                    {
                        // Second independent chain discovered to belong to
                        // this thread: re-root its subtree and attach its
                        // head under the current parent.
                        conn.execute(
                            "UPDATE threads SET root = ? WHERE root = ?",
                            params![established.as_i64(), node.as_i64()],
                        )?;
                        conn.execute(
                            "UPDATE threads SET root = ?, parent = ? WHERE id = ?",
                            params![
                                established.as_i64(),
                                parent.map(ThreadNodeId::as_i64),
                                node.as_i64(),
                            ],
                        )?;
                    }
                    _ => {
                        root = Some(node_root.unwrap_or(node));
                    }
                }
                parent = Some(node);
            }
        }
    }

    let (thread_id, message_row) = match own_placeholder {
        Some((thread_id, message_row, _, _)) => (Some(thread_id), Some(message_row)),
        None => (None, None),
    };

    Ok(ThreadInfo {
        thread_id,
        message_row,
        message_id_header,
        root,
        parent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::{Headers, Part};

    fn reply_message(message_id: &str, references: Option<&str>, in_reply_to: Option<&str>) -> Message {
        let mut headers = Headers::new();
        headers.push("Message-ID", message_id);
        if let Some(references) = references {
            headers.push("References", references);
        }
        if let Some(in_reply_to) = in_reply_to {
            headers.push("In-Reply-To", in_reply_to);
        }
        Message::new(Part::new(headers))
    }

    #[test]
    fn test_candidates_preserve_reference_order() {
        let message = reply_message("<c@x>", Some("<a@x> <b@x>"), Some("<b@x>"));
        assert_eq!(ancestor_candidates(&message), vec!["<a@x>", "<b@x>"]);
    }

    #[test]
    fn test_in_reply_to_appended_when_missing() {
        let message = reply_message("<c@x>", Some("<a@x>"), Some("<b@x>"));
        assert_eq!(ancestor_candidates(&message), vec!["<a@x>", "<b@x>"]);
    }

    #[test]
    fn test_no_references_means_no_candidates() {
        let message = reply_message("<a@x>", None, None);
        assert!(ancestor_candidates(&message).is_empty());
    }
}
