//! sqlite-adapter — SQLite implementation of the domain repository ports.
//!
//! Purpose
//! - Provide a file-based store so the server keeps URL records, tags and
//!   users across restarts.
//! - Implements `UrlRepository`, `TagRepository` and `UserRepository` from
//!   the `domain` crate on one connection.
//!
//! Notes
//! - Uses `rusqlite` with the `bundled` feature for portability.
//! - Stores timestamps as milliseconds since UNIX_EPOCH; block expiries are
//!   rounded up so a stored block never ends earlier than requested.
//! - URL/tag links live in a join table keyed by ids, so renaming a tag needs
//!   no rewrite of URL rows and deleting one cascades.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use domain::{
    permanent_block_sentinel, CoreError, Email, ListOptions, ListResult, Page, Role, ShortCode,
    Tag, TagId, TagRepository, UrlFilter, UrlId, UrlOrder, UrlRecord, UrlRepository, User,
    UserId, UserRepository,
};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, ToSql};

/// SQLite-backed repository.
pub struct SqliteRepo {
    conn: Mutex<Connection>,
}

impl SqliteRepo {
    /// Open (or create) a SQLite database at the given path and ensure schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(map_sqerr)?;
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open the database at `path`, creating its parent directory first.
    pub fn open_creating_dirs<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        if let Some(dir) = path.as_ref().parent() {
            std::fs::create_dir_all(dir).map_err(|e| CoreError::Repository(format!("create {}: {e}", dir.display())))?;
        }
        Self::new(path)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CoreError> {
        self.conn.lock().map_err(|_| CoreError::Repository("mutex poisoned".into()))
    }
}

fn init_schema(conn: &Connection) -> Result<(), CoreError> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            roles TEXT NOT NULL DEFAULT 'user',
            is_blocked INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS urls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            original_url TEXT NOT NULL,
            short_code TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            click_count INTEGER NOT NULL DEFAULT 0,
            is_published INTEGER NOT NULL DEFAULT 1,
            is_blocked INTEGER NOT NULL DEFAULT 0,
            blocked_until INTEGER,
            author_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            author_email TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_urls_author_email ON urls(author_email, created_at);
        CREATE INDEX IF NOT EXISTS idx_urls_blocked_until ON urls(blocked_until);
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS url_tags (
            url_id INTEGER NOT NULL REFERENCES urls(id) ON DELETE CASCADE,
            tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            PRIMARY KEY (url_id, tag_id)
        );
        "#
    ).map_err(map_sqerr)?;
    Ok(())
}

fn map_sqerr<E: std::fmt::Display>(e: E) -> CoreError { CoreError::Repository(format!("sqlite error: {e}")) }

// Writes that hit a UNIQUE index surface as a domain constraint violation.
fn map_write_err(e: rusqlite::Error, what: &'static str) -> CoreError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE { return CoreError::UniqueConstraintViolation(what); }
    }
    map_sqerr(e)
}

fn system_time_to_millis(t: SystemTime) -> i64 {
    let since_epoch = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    i64::try_from(since_epoch.as_millis()).unwrap_or(i64::MAX)
}

fn expiry_to_millis(t: SystemTime) -> i64 {
    let since_epoch = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    let millis = system_time_to_millis(t);
    if since_epoch.subsec_nanos() % 1_000_000 == 0 { millis } else { millis.saturating_add(1) }
}

fn millis_to_system_time(millis: i64) -> SystemTime { UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64) }

fn to_sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

// `LIKE` pattern matching `text` literally anywhere; pair with `ESCAPE '\'`.
fn contains_pattern(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('%');
    for c in text.to_lowercase().chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn roles_to_text(roles: &std::collections::BTreeSet<Role>) -> String {
    roles.iter().map(Role::as_str).collect::<Vec<_>>().join(",")
}

fn roles_from_text(text: &str) -> std::collections::BTreeSet<Role> {
    let mut roles: std::collections::BTreeSet<Role> = text.split(',').filter_map(Role::parse).collect();
    roles.insert(Role::User);
    roles
}

const URL_COLUMNS: &str = "u.id, u.original_url, u.short_code, u.created_at, u.updated_at, u.click_count, u.is_published, u.is_blocked, u.blocked_until, u.author_id, u.author_email";

fn row_to_url(row: &rusqlite::Row) -> Result<UrlRecord, CoreError> {
    let id: i64 = row.get(0).map_err(map_sqerr)?;
    let original_url: String = row.get(1).map_err(map_sqerr)?;
    let code: String = row.get(2).map_err(map_sqerr)?;
    let created_at: i64 = row.get(3).map_err(map_sqerr)?;
    let updated_at: i64 = row.get(4).map_err(map_sqerr)?;
    let click_count: i64 = row.get(5).map_err(map_sqerr)?;
    let is_published: i64 = row.get(6).map_err(map_sqerr)?;
    let is_blocked: i64 = row.get(7).map_err(map_sqerr)?;
    let blocked_until: Option<i64> = row.get(8).map_err(map_sqerr)?;
    let author_id: Option<i64> = row.get(9).map_err(map_sqerr)?;
    let author_email: Option<String> = row.get(10).map_err(map_sqerr)?;

    let short_code = ShortCode::new(code).map_err(|e| CoreError::Repository(format!("bad short code in db: {e}")))?;
    let author_email = author_email
        .map(Email::new)
        .transpose()
        .map_err(|_| CoreError::Repository("bad author_email in db".into()))?;
    Ok(UrlRecord {
        id: Some(UrlId(id)),
        original_url,
        short_code,
        created_at: millis_to_system_time(created_at),
        updated_at: millis_to_system_time(updated_at),
        click_count: click_count.max(0) as u64,
        is_published: is_published != 0,
        is_blocked: is_blocked != 0,
        blocked_until: blocked_until.map(millis_to_system_time),
        tags: Default::default(),
        author: author_id.map(UserId),
        author_email,
    })
}

fn row_to_tag(row: &rusqlite::Row) -> Result<Tag, CoreError> {
    let id: i64 = row.get(0).map_err(map_sqerr)?;
    let title: String = row.get(1).map_err(map_sqerr)?;
    let created_at: i64 = row.get(2).map_err(map_sqerr)?;
    let updated_at: i64 = row.get(3).map_err(map_sqerr)?;
    Ok(Tag {
        id: Some(TagId(id)),
        title,
        created_at: millis_to_system_time(created_at),
        updated_at: millis_to_system_time(updated_at),
    })
}

fn row_to_user(row: &rusqlite::Row) -> Result<User, CoreError> {
    let id: i64 = row.get(0).map_err(map_sqerr)?;
    let email: String = row.get(1).map_err(map_sqerr)?;
    let roles: String = row.get(2).map_err(map_sqerr)?;
    let is_blocked: i64 = row.get(3).map_err(map_sqerr)?;
    let created_at: i64 = row.get(4).map_err(map_sqerr)?;
    let email = Email::new(email).map_err(|_| CoreError::Repository("bad email in db".into()))?;
    Ok(User {
        id: Some(UserId(id)),
        email,
        roles: roles_from_text(&roles),
        is_blocked: is_blocked != 0,
        created_at: millis_to_system_time(created_at),
    })
}

fn load_tags(conn: &Connection, record: &mut UrlRecord) -> Result<(), CoreError> {
    let Some(id) = record.id else { return Ok(()) };
    let mut stmt = conn
        .prepare_cached("SELECT t.title FROM tags t JOIN url_tags ut ON ut.tag_id = t.id WHERE ut.url_id = ?1")
        .map_err(map_sqerr)?;
    let mut rows = stmt.query(params![id.0]).map_err(map_sqerr)?;
    record.tags.clear();
    while let Some(row) = rows.next().map_err(map_sqerr)? {
        record.tags.insert(row.get(0).map_err(map_sqerr)?);
    }
    Ok(())
}

fn query_urls(conn: &Connection, sql: &str, args: &[&dyn ToSql]) -> Result<Vec<UrlRecord>, CoreError> {
    let mut stmt = conn.prepare(sql).map_err(map_sqerr)?;
    let mut rows = stmt.query(args).map_err(map_sqerr)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(map_sqerr)? {
        out.push(row_to_url(row)?);
    }
    drop(rows);
    for record in out.iter_mut() {
        load_tags(conn, record)?;
    }
    Ok(out)
}

impl UrlRepository for SqliteRepo {
    fn find_by_id(&self, id: UrlId) -> Result<Option<UrlRecord>, CoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {URL_COLUMNS} FROM urls u WHERE u.id = ?1");
        Ok(query_urls(&conn, &sql, params![id.0])?.pop())
    }

    fn find_by_short_code(&self, code: &ShortCode) -> Result<Option<UrlRecord>, CoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {URL_COLUMNS} FROM urls u WHERE u.short_code = ?1");
        Ok(query_urls(&conn, &sql, params![code.as_str()])?.pop())
    }

    fn count_by_email_since(&self, email: &Email, since: SystemTime) -> Result<u64, CoreError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM urls WHERE author_email = ?1 AND created_at >= ?2",
            params![email.as_str(), system_time_to_millis(since)],
            |r| r.get(0),
        ).map_err(map_sqerr)?;
        Ok(n.max(0) as u64)
    }

    fn save(&self, record: &mut UrlRecord) -> Result<(), CoreError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction().map_err(map_sqerr)?;
        let blocked_until = record.blocked_until.map(expiry_to_millis);
        let author = record.author.map(|a| a.0);
        let author_email = record.author_email.as_ref().map(|e| e.as_str().to_string());
        let id = match record.id {
            Some(id) => {
                let changed = tx.execute(
                    "UPDATE urls SET original_url = ?1, short_code = ?2, updated_at = ?3, click_count = ?4, is_published = ?5, is_blocked = ?6, blocked_until = ?7, author_id = ?8, author_email = ?9 WHERE id = ?10",
                    params![
                        record.original_url,
                        record.short_code.as_str(),
                        system_time_to_millis(record.updated_at),
                        record.click_count as i64,
                        record.is_published as i64,
                        record.is_blocked as i64,
                        blocked_until,
                        author,
                        author_email,
                        id.0,
                    ],
                ).map_err(|e| map_write_err(e, "short code"))?;
                if changed == 0 {
                    return Err(CoreError::NotFound);
                }
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO urls(original_url, short_code, created_at, updated_at, click_count, is_published, is_blocked, blocked_until, author_id, author_email) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        record.original_url,
                        record.short_code.as_str(),
                        system_time_to_millis(record.created_at),
                        system_time_to_millis(record.updated_at),
                        record.click_count as i64,
                        record.is_published as i64,
                        record.is_blocked as i64,
                        blocked_until,
                        author,
                        author_email,
                    ],
                ).map_err(|e| map_write_err(e, "short code"))?;
                UrlId(tx.last_insert_rowid())
            }
        };
        tx.execute("DELETE FROM url_tags WHERE url_id = ?1", params![id.0]).map_err(map_sqerr)?;
        for title in &record.tags {
            let linked = tx.execute(
                "INSERT INTO url_tags(url_id, tag_id) SELECT ?1, id FROM tags WHERE title = ?2",
                params![id.0, title],
            ).map_err(map_sqerr)?;
            if linked == 0 {
                return Err(CoreError::InvalidTag(format!("unknown tag {title}")));
            }
        }
        tx.commit().map_err(map_sqerr)?;
        record.id = Some(id);
        Ok(())
    }

    fn delete(&self, id: UrlId) -> Result<(), CoreError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM urls WHERE id = ?1", params![id.0]).map_err(map_sqerr)?;
        if changed == 0 {
            Err(CoreError::NotFound)
        } else {
            Ok(())
        }
    }

    fn list_temporarily_blocked(&self) -> Result<Vec<UrlRecord>, CoreError> {
        let conn = self.conn()?;
        let sentinel = expiry_to_millis(permanent_block_sentinel());
        let sql = format!("SELECT {URL_COLUMNS} FROM urls u WHERE u.blocked_until IS NOT NULL AND u.blocked_until < ?1 ORDER BY u.id");
        query_urls(&conn, &sql, params![sentinel])
    }

    fn list(&self, options: &ListOptions) -> Result<ListResult<UrlRecord>, CoreError> {
        let conn = self.conn()?;

        // Build WHERE clause from the filter; every variant binds at most one parameter
        let tag_match = "EXISTS (SELECT 1 FROM url_tags ut JOIN tags t ON t.id = ut.tag_id WHERE ut.url_id = u.id AND";
        let (where_clause, arg): (String, Option<Value>) = match &options.filter {
            UrlFilter::Published => ("WHERE u.is_published = 1".into(), None),
            UrlFilter::Unpublished => ("WHERE u.is_published = 0".into(), None),
            UrlFilter::Tagged(title) => (format!("WHERE u.is_published = 1 AND {tag_match} t.title = ?1)"), Some(Value::Text(title.clone()))),
            UrlFilter::Search(q) => (
                format!("WHERE u.is_published = 1 AND (LOWER(u.original_url) LIKE ?1 ESCAPE '\\' OR LOWER(u.short_code) LIKE ?1 ESCAPE '\\' OR {tag_match} LOWER(t.title) LIKE ?1 ESCAPE '\\'))"),
                Some(Value::Text(contains_pattern(q))),
            ),
            UrlFilter::Author(id) => ("WHERE u.author_id = ?1".into(), Some(Value::Integer(id.0))),
        };
        let order_by = match options.order {
            UrlOrder::RecentlyUpdated => "u.updated_at DESC, u.id DESC",
            UrlOrder::Newest => "u.created_at DESC, u.id DESC",
            UrlOrder::MostClicked => "u.click_count DESC, u.id DESC",
        };

        let limit = to_sql_count(options.page.limit());
        let offset = to_sql_count(options.page.offset());
        let mut args: Vec<&dyn ToSql> = Vec::new();
        if let Some(arg) = &arg {
            args.push(arg);
        }

        let count_sql = format!("SELECT COUNT(*) FROM urls u {where_clause}");
        let total: i64 = conn.query_row(&count_sql, args.as_slice(), |r| r.get(0)).map_err(map_sqerr)?;

        let select_sql = format!(
            "SELECT {URL_COLUMNS} FROM urls u {where_clause} ORDER BY {order_by} LIMIT ?{} OFFSET ?{}",
            args.len() + 1,
            args.len() + 2
        );
        args.push(&limit);
        args.push(&offset);
        let items = query_urls(&conn, &select_sql, &args)?;

        let total = total.max(0) as usize;
        let has_more = options.page.offset().saturating_add(items.len()) < total;
        Ok(ListResult { items, total, has_more })
    }
}

impl TagRepository for SqliteRepo {
    fn find_by_id(&self, id: TagId) -> Result<Option<Tag>, CoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, title, created_at, updated_at FROM tags WHERE id = ?1").map_err(map_sqerr)?;
        let mut rows = stmt.query(params![id.0]).map_err(map_sqerr)?;
        match rows.next().map_err(map_sqerr)? {
            Some(row) => Ok(Some(row_to_tag(row)?)),
            None => Ok(None),
        }
    }

    fn find_by_title(&self, title: &str) -> Result<Option<Tag>, CoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, title, created_at, updated_at FROM tags WHERE title = ?1").map_err(map_sqerr)?;
        let mut rows = stmt.query(params![title]).map_err(map_sqerr)?;
        match rows.next().map_err(map_sqerr)? {
            Some(row) => Ok(Some(row_to_tag(row)?)),
            None => Ok(None),
        }
    }

    fn save(&self, tag: &mut Tag) -> Result<(), CoreError> {
        let conn = self.conn()?;
        match tag.id {
            Some(id) => {
                let changed = conn.execute(
                    "UPDATE tags SET title = ?1, updated_at = ?2 WHERE id = ?3",
                    params![tag.title, system_time_to_millis(tag.updated_at), id.0],
                ).map_err(|e| map_write_err(e, "tag title"))?;
                if changed == 0 {
                    return Err(CoreError::NotFound);
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO tags(title, created_at, updated_at) VALUES (?1, ?2, ?3)",
                    params![tag.title, system_time_to_millis(tag.created_at), system_time_to_millis(tag.updated_at)],
                ).map_err(|e| map_write_err(e, "tag title"))?;
                tag.id = Some(TagId(conn.last_insert_rowid()));
            }
        }
        Ok(())
    }

    fn delete(&self, id: TagId) -> Result<(), CoreError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM tags WHERE id = ?1", params![id.0]).map_err(map_sqerr)?;
        if changed == 0 {
            Err(CoreError::NotFound)
        } else {
            Ok(())
        }
    }

    fn list(&self, page: Page) -> Result<ListResult<Tag>, CoreError> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0)).map_err(map_sqerr)?;
        let mut stmt = conn
            .prepare("SELECT id, title, created_at, updated_at FROM tags ORDER BY title LIMIT ?1 OFFSET ?2")
            .map_err(map_sqerr)?;
        let mut rows = stmt.query(params![to_sql_count(page.limit()), to_sql_count(page.offset())]).map_err(map_sqerr)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            items.push(row_to_tag(row)?);
        }
        let total = total.max(0) as usize;
        let has_more = page.offset().saturating_add(items.len()) < total;
        Ok(ListResult { items, total, has_more })
    }
}

impl UserRepository for SqliteRepo {
    fn find_by_id(&self, id: UserId) -> Result<Option<User>, CoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, email, roles, is_blocked, created_at FROM users WHERE id = ?1",
            params![id.0],
            |row| Ok(row_to_user(row)),
        ).optional().map_err(map_sqerr)?.transpose()
    }

    fn find_by_email(&self, email: &Email) -> Result<Option<User>, CoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, email, roles, is_blocked, created_at FROM users WHERE email = ?1",
            params![email.as_str()],
            |row| Ok(row_to_user(row)),
        ).optional().map_err(map_sqerr)?.transpose()
    }

    fn save(&self, user: &mut User) -> Result<(), CoreError> {
        let conn = self.conn()?;
        let roles = roles_to_text(&user.roles);
        match user.id {
            Some(id) => {
                let changed = conn.execute(
                    "UPDATE users SET email = ?1, roles = ?2, is_blocked = ?3 WHERE id = ?4",
                    params![user.email.as_str(), roles, user.is_blocked as i64, id.0],
                ).map_err(|e| map_write_err(e, "email"))?;
                if changed == 0 {
                    return Err(CoreError::NotFound);
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO users(email, roles, is_blocked, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![user.email.as_str(), roles, user.is_blocked as i64, system_time_to_millis(user.created_at)],
                ).map_err(|e| map_write_err(e, "email"))?;
                user.id = Some(UserId(conn.last_insert_rowid()));
            }
        }
        Ok(())
    }

    fn list(&self, page: Page) -> Result<ListResult<User>, CoreError> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0)).map_err(map_sqerr)?;
        let mut stmt = conn
            .prepare("SELECT id, email, roles, is_blocked, created_at FROM users ORDER BY id DESC LIMIT ?1 OFFSET ?2")
            .map_err(map_sqerr)?;
        let mut rows = stmt.query(params![to_sql_count(page.limit()), to_sql_count(page.offset())]).map_err(map_sqerr)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            items.push(row_to_user(row)?);
        }
        let total = total.max(0) as usize;
        let has_more = page.offset().saturating_add(items.len()) < total;
        Ok(ListResult { items, total, has_more })
    }

    fn count_admins(&self) -> Result<u64, CoreError> {
        let conn = self.conn()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM users WHERE (',' || roles || ',') LIKE '%,admin,%'", [], |r| r.get(0))
            .map_err(map_sqerr)?;
        Ok(n.max(0) as u64)
    }
}
