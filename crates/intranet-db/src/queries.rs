use crate::Database;
use crate::models::{
    AnnouncementRow, ConversationRow, MemberRow, MessageRow, ProfileUpdate, UserRow,
};
use anyhow::{Result, bail};
use rusqlite::{Connection, ErrorCode, Row, TransactionBehavior};

const USER_COLUMNS: &str =
    "role, user_id, email, password, full_name, profile_picture, created_at";

const MESSAGE_SELECT: &str =
    "SELECT m.id, m.conversation_id, m.sender_id, m.sender_role,
            COALESCE(u.full_name, ''), u.profile_picture, m.body, m.created_at
     FROM messages m
     LEFT JOIN users u ON u.role = m.sender_role AND u.user_id = m.sender_id";

impl Database {
    // -- Users --

    /// Inserts the account unless the role already has one with this id or
    /// this email. Returns false on such a clash.
    pub fn create_user(
        &self,
        role: &str,
        user_id: &str,
        email: &str,
        password_hash: &str,
        full_name: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (role, user_id, email, password, full_name)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT DO NOTHING",
                (role, user_id, email, password_hash, full_name),
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn get_user(&self, role: &str, user_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, role, user_id))
    }

    /// Every account, ordered by role then id.
    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY role, user_id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Everyone except the given account, for the "start new chat" picker.
    pub fn list_chat_candidates(&self, role: &str, user_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE NOT (role = ?1 AND user_id = ?2)
                 ORDER BY full_name, user_id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((role, user_id), user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_password(&self, role: &str, user_id: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET password = ?1 WHERE role = ?2 AND user_id = ?3",
                (password_hash, role, user_id),
            )?;
            Ok(())
        })
    }

    /// Updates whichever of name/email is given.
    pub fn update_profile(
        &self,
        role: &str,
        user_id: &str,
        full_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<ProfileUpdate> {
        let mut assignments: Vec<String> = Vec::new();
        let mut values: Vec<&str> = Vec::new();

        if let Some(name) = full_name {
            values.push(name);
            assignments.push(format!("full_name = ?{}", values.len()));
        }
        if let Some(email) = email {
            values.push(email);
            assignments.push(format!("email = ?{}", values.len()));
        }
        if assignments.is_empty() {
            return Ok(ProfileUpdate::Unchanged);
        }

        values.push(role);
        values.push(user_id);
        let sql = format!(
            "UPDATE users SET {} WHERE role = ?{} AND user_id = ?{}",
            assignments.join(", "),
            values.len() - 1,
            values.len()
        );

        self.with_conn(|conn| {
            match conn.execute(&sql, rusqlite::params_from_iter(values.iter())) {
                Ok(0) => Ok(ProfileUpdate::Unchanged),
                Ok(_) => Ok(ProfileUpdate::Updated),
                // UNIQUE (role, email) is the only constraint an update can trip.
                Err(e) if is_constraint_violation(&e) => Ok(ProfileUpdate::EmailTaken),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Sets the avatar and returns the file it replaced, if any.
    pub fn set_profile_picture(
        &self,
        role: &str,
        user_id: &str,
        file_name: &str,
    ) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let previous: Option<String> = tx
                .query_row(
                    "SELECT profile_picture FROM users WHERE role = ?1 AND user_id = ?2",
                    (role, user_id),
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            let changed = tx.execute(
                "UPDATE users SET profile_picture = ?1 WHERE role = ?2 AND user_id = ?3",
                (file_name, role, user_id),
            )?;
            if changed == 0 {
                bail!("no {} account {}", role, user_id);
            }
            tx.commit()?;
            Ok(previous)
        })
    }

    // -- Conversations --

    pub fn is_member(&self, conversation_id: i64, user_id: &str, role: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM conversation_members
                     WHERE conversation_id = ?1 AND user_id = ?2 AND role = ?3",
                    rusqlite::params![conversation_id, user_id, role],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            Ok(found)
        })
    }

    #[cfg(test)]
    pub fn find_direct_conversation(
        &self,
        (a_role, a_id): (&str, &str),
        (b_role, b_id): (&str, &str),
    ) -> Result<Option<i64>> {
        self.with_conn(|conn| query_direct_conversation(conn, (a_role, a_id), (b_role, b_id)))
    }

    /// Returns the 1-on-1 conversation between `a` and `b`, creating it if needed.
    /// The bool is true when a new conversation was created.
    ///
    /// Lookup and insert share one immediate transaction, so concurrent starts
    /// for the same pair end up with a single conversation.
    pub fn start_direct_conversation(
        &self,
        (a_role, a_id): (&str, &str),
        (b_role, b_id): (&str, &str),
    ) -> Result<(i64, bool)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if let Some(id) = query_direct_conversation(&tx, (a_role, a_id), (b_role, b_id))? {
                return Ok((id, false));
            }

            tx.execute("INSERT INTO conversations (is_group) VALUES (0)", [])?;
            let conversation_id = tx.last_insert_rowid();

            for (role, user_id) in [(a_role, a_id), (b_role, b_id)] {
                tx.execute(
                    "INSERT INTO conversation_members (conversation_id, user_id, role) VALUES (?1, ?2, ?3)",
                    rusqlite::params![conversation_id, user_id, role],
                )?;
            }

            tx.commit()?;
            Ok((conversation_id, true))
        })
    }

    /// Creates a named group conversation with the given members.
    #[cfg(test)]
    pub fn create_group_conversation(&self, name: &str, members: &[(&str, &str)]) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("INSERT INTO conversations (name, is_group) VALUES (?1, 1)", [name])?;
            let conversation_id = tx.last_insert_rowid();

            for (role, user_id) in members {
                tx.execute(
                    "INSERT INTO conversation_members (conversation_id, user_id, role) VALUES (?1, ?2, ?3)",
                    rusqlite::params![conversation_id, user_id, role],
                )?;
            }

            tx.commit()?;
            Ok(conversation_id)
        })
    }

    /// Conversations the user belongs to, newest first. `limit = None` returns all.
    pub fn list_conversations_for(
        &self,
        role: &str,
        user_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<ConversationRow>> {
        let limit = limit.map(i64::from).unwrap_or(-1);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.is_group, c.created_at
                 FROM conversations c
                 JOIN conversation_members cm ON cm.conversation_id = c.id
                 WHERE cm.role = ?1 AND cm.user_id = ?2
                 ORDER BY c.created_at DESC, c.id DESC
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![role, user_id, limit], |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        is_group: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Batch-fetch members (with display names) for a set of conversations.
    pub fn get_members(&self, conversation_ids: &[i64]) -> Result<Vec<MemberRow>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT cm.conversation_id, cm.user_id, cm.role, COALESCE(u.full_name, '')
                 FROM conversation_members cm
                 LEFT JOIN users u ON u.role = cm.role AND u.user_id = cm.user_id
                 WHERE cm.conversation_id IN ({})
                 ORDER BY cm.conversation_id, u.full_name, cm.user_id",
                placeholders(conversation_ids.len())
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(conversation_ids), |row| {
                    Ok(MemberRow {
                        conversation_id: row.get(0)?,
                        user_id: row.get(1)?,
                        role: row.get(2)?,
                        full_name: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Returns the new message id.
    pub fn insert_message(
        &self,
        conversation_id: i64,
        sender_id: &str,
        sender_role: &str,
        body: &str,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (conversation_id, sender_id, sender_role, body) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![conversation_id, sender_id, sender_role, body],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// All messages of a conversation, oldest first.
    pub fn get_messages(&self, conversation_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            // JOIN users to fetch sender name and avatar in a single query
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE m.conversation_id = ?1
                 ORDER BY m.created_at ASC, m.id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([conversation_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Newest message of each given conversation; conversations without
    /// messages are simply absent from the result.
    pub fn get_latest_messages(&self, conversation_ids: &[i64]) -> Result<Vec<MessageRow>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE m.conversation_id IN ({})
                   AND m.id = (
                       SELECT x.id FROM messages x
                       WHERE x.conversation_id = m.conversation_id
                       ORDER BY x.created_at DESC, x.id DESC
                       LIMIT 1
                   )",
                placeholders(conversation_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(conversation_ids), message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Announcements --

    pub fn create_announcement(
        &self,
        title: &str,
        content: &str,
        author_id: &str,
        author_role: &str,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO announcements (title, content, author_id, author_role) VALUES (?1, ?2, ?3, ?4)",
                (title, content, author_id, author_role),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn recent_announcements(&self, limit: u32) -> Result<Vec<AnnouncementRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, content, author_id, author_role, created_at
                 FROM announcements
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(AnnouncementRow {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        content: row.get(2)?,
                        author_id: row.get(3)?,
                        author_role: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, role: &str, user_id: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE role = ?1 AND user_id = ?2");
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row((role, user_id), user_from_row).optional()?;
    Ok(row)
}

/// A non-group conversation whose member set is exactly {a, b}.
fn query_direct_conversation(
    conn: &Connection,
    (a_role, a_id): (&str, &str),
    (b_role, b_id): (&str, &str),
) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT c.id
             FROM conversations c
             JOIN conversation_members a
               ON a.conversation_id = c.id AND a.role = ?1 AND a.user_id = ?2
             JOIN conversation_members b
               ON b.conversation_id = c.id AND b.role = ?3 AND b.user_id = ?4
             WHERE c.is_group = 0
               AND (SELECT COUNT(*) FROM conversation_members m WHERE m.conversation_id = c.id) = 2
             ORDER BY c.id
             LIMIT 1",
            (a_role, a_id, b_role, b_id),
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        role: row.get(0)?,
        user_id: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        full_name: row.get(4)?,
        profile_picture: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_role: row.get(3)?,
        sender_name: row.get(4)?,
        sender_picture: row.get(5)?,
        body: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("student", "S-001", "ana@school.test", "hash", "Ana Cruz").unwrap();
        db.create_user("teacher", "T-001", "ben@school.test", "hash", "Ben Reyes").unwrap();
        db.create_user("admin", "S-001", "root@school.test", "hash", "Admin One").unwrap();
        db
    }

    #[test]
    fn user_ids_are_scoped_by_role() {
        let db = seeded();
        let student = db.get_user("student", "S-001").unwrap().unwrap();
        let admin = db.get_user("admin", "S-001").unwrap().unwrap();
        assert_eq!(student.full_name, "Ana Cruz");
        assert_eq!(admin.full_name, "Admin One");
        assert!(db.get_user("teacher", "S-001").unwrap().is_none());
    }

    #[test]
    fn id_or_email_conflicts_are_per_role() {
        let db = seeded();
        assert!(!db.create_user("student", "S-001", "new@school.test", "hash", "Dup").unwrap());
        assert!(!db.create_user("student", "S-999", "ana@school.test", "hash", "Dup").unwrap());
        assert!(db.create_user("teacher", "S-001", "ana@school.test", "hash", "Ana T.").unwrap());
        assert_eq!(db.list_users().unwrap().len(), 4);
    }

    #[test]
    fn update_profile_sets_only_given_fields() {
        let db = seeded();
        assert_eq!(
            db.update_profile("student", "S-001", None, None).unwrap(),
            ProfileUpdate::Unchanged
        );

        assert_eq!(
            db.update_profile("student", "S-001", None, Some("ana@new.test")).unwrap(),
            ProfileUpdate::Updated
        );
        let user = db.get_user("student", "S-001").unwrap().unwrap();
        assert_eq!(user.full_name, "Ana Cruz");
        assert_eq!(user.email, "ana@new.test");

        assert_eq!(
            db.update_profile("student", "S-001", Some("Ana C."), None).unwrap(),
            ProfileUpdate::Updated
        );
        let user = db.get_user("student", "S-001").unwrap().unwrap();
        assert_eq!(user.full_name, "Ana C.");
    }

    #[test]
    fn email_clash_is_reported_not_raised() {
        let db = seeded();
        db.create_user("student", "S-002", "cy@school.test", "hash", "Cy Tan").unwrap();

        let outcome = db
            .update_profile("student", "S-001", Some("Ana C."), Some("cy@school.test"))
            .unwrap();
        assert_eq!(outcome, ProfileUpdate::EmailTaken);
        assert_eq!(db.get_user("student", "S-001").unwrap().unwrap().full_name, "Ana Cruz");

        // Emails are unique per role only.
        let outcome = db
            .update_profile("teacher", "T-001", None, Some("cy@school.test"))
            .unwrap();
        assert_eq!(outcome, ProfileUpdate::Updated);
        assert_eq!(
            db.update_profile("student", "S-404", Some("Ghost"), None).unwrap(),
            ProfileUpdate::Unchanged
        );
    }

    #[test]
    fn profile_picture_returns_the_replaced_file() {
        let db = seeded();
        assert_eq!(db.set_profile_picture("student", "S-001", "profile_a.png").unwrap(), None);
        assert_eq!(
            db.set_profile_picture("student", "S-001", "profile_b.png").unwrap(),
            Some("profile_a.png".to_string())
        );
        assert!(db.set_profile_picture("student", "S-404", "profile_c.png").is_err());
    }

    #[test]
    fn chat_candidates_exclude_only_the_caller() {
        let db = seeded();
        let candidates = db.list_chat_candidates("student", "S-001").unwrap();
        let keys: Vec<(String, String)> =
            candidates.into_iter().map(|u| (u.role, u.user_id)).collect();
        assert_eq!(
            keys,
            vec![
                ("admin".to_string(), "S-001".to_string()),
                ("teacher".to_string(), "T-001".to_string()),
            ]
        );
    }

    #[test]
    fn direct_conversation_is_created_once() {
        let db = seeded();
        let ana = ("student", "S-001");
        let ben = ("teacher", "T-001");

        let (first, created) = db.start_direct_conversation(ana, ben).unwrap();
        assert!(created);

        let (again, created) = db.start_direct_conversation(ben, ana).unwrap();
        assert!(!created);
        assert_eq!(again, first);

        assert_eq!(db.find_direct_conversation(ana, ben).unwrap(), Some(first));
        assert!(db.is_member(first, "S-001", "student").unwrap());
        assert!(!db.is_member(first, "S-001", "admin").unwrap());
    }

    #[test]
    fn group_with_same_pair_is_not_a_direct_conversation() {
        let db = seeded();
        let ana = ("student", "S-001");
        let ben = ("teacher", "T-001");

        db.create_group_conversation("Homeroom", &[ana, ben]).unwrap();
        assert_eq!(db.find_direct_conversation(ana, ben).unwrap(), None);

        let (_, created) = db.start_direct_conversation(ana, ben).unwrap();
        assert!(created);
    }

    #[test]
    fn messages_come_back_oldest_first() {
        let db = seeded();
        let (conv, _) = db
            .start_direct_conversation(("student", "S-001"), ("teacher", "T-001"))
            .unwrap();

        let first = db.insert_message(conv, "S-001", "student", "hello").unwrap();
        let second = db.insert_message(conv, "T-001", "teacher", "hi Ana").unwrap();
        let third = db.insert_message(conv, "S-001", "student", "question about homework").unwrap();

        let rows = db.get_messages(conv).unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, second, third]);
        assert_eq!(rows[1].sender_name, "Ben Reyes");

        let latest = db.get_latest_messages(&[conv]).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, third);
    }

    #[test]
    fn conversations_list_newest_first_with_members() {
        let db = seeded();
        let ana = ("student", "S-001");
        let (older, _) = db.start_direct_conversation(ana, ("teacher", "T-001")).unwrap();
        let (newer, _) = db.start_direct_conversation(ana, ("admin", "S-001")).unwrap();

        let rows = db.list_conversations_for("student", "S-001", None).unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newer, older]);

        let limited = db.list_conversations_for("student", "S-001", Some(1)).unwrap();
        assert_eq!(limited.len(), 1);

        let members = db.get_members(&[older]).unwrap();
        let names: Vec<&str> = members.iter().map(|m| m.full_name.as_str()).collect();
        assert_eq!(names, vec!["Ana Cruz", "Ben Reyes"]);

        assert!(db.get_latest_messages(&[older, newer]).unwrap().is_empty());
    }

    #[test]
    fn announcements_newest_first() {
        let db = seeded();
        db.create_announcement("Enrollment", "Opens Monday", "A-1", "admin")
            .expect_err("author must exist");

        let a = db.create_announcement("Enrollment", "Opens Monday", "S-001", "admin").unwrap();
        let b = db.create_announcement("Exams", "Next week", "T-001", "teacher").unwrap();

        let rows = db.recent_announcements(5).unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b, a]);
        assert_eq!(db.recent_announcements(1).unwrap().len(), 1);
    }
}
