//! Domain library for the URL Shortener.
//!
//! Holds the domain types, ports (traits), and error definitions. Keep
//! adapters and IO concerns out of this crate; the only dependencies are small
//! utility crates (errors, time arithmetic, randomness).

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Seconds since the epoch of `9999-12-31T23:59:59Z`, the `blocked_until`
/// value stored for permanent blocks.
pub const PERMANENT_BLOCK_SECS: u64 = 253_402_300_799;

/// Timestamp used as `blocked_until` for permanent blocks.
pub fn permanent_block_sentinel() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(PERMANENT_BLOCK_SECS)
}

/// Store-assigned identifier of a URL record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UrlId(pub i64);

/// Store-assigned identifier of a tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId(pub i64);

/// Store-assigned identifier of a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(pub i64);

/// Token in the redirect path identifying a URL record.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShortCode(String);

impl ShortCode {
    pub const MAX_LEN: usize = 32;

    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        if val.is_empty() {
            return Err(CoreError::InvalidShortCode("empty".into()));
        }
        if val.len() > Self::MAX_LEN {
            return Err(CoreError::InvalidShortCode(format!(
                "longer than {} characters",
                Self::MAX_LEN
            )));
        }
        if !val.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidShortCode("invalid characters".into()));
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShortCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Email address of a user or of an anonymous submitter.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Email(String);

impl Email {
    pub const MAX_LEN: usize = 180;

    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into().trim().to_string();
        // Lightweight check; full RFC compliance not required here
        let Some((local, host)) = val.split_once('@') else {
            return Err(CoreError::InvalidEmail);
        };
        if local.is_empty()
            || host.is_empty()
            || host.contains('@')
            || val.len() > Self::MAX_LEN
            || val.chars().any(char::is_whitespace)
        {
            return Err(CoreError::InvalidEmail);
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One shortened link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlRecord {
    /// `None` until the store inserts the record.
    pub id: Option<UrlId>,
    pub original_url: String,
    pub short_code: ShortCode,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    /// Number of successful redirects. Never decreases.
    pub click_count: u64,
    /// Unpublished records are invisible to redirect and public listings.
    pub is_published: bool,
    pub is_blocked: bool,
    /// When set, decides the block state on its own (see [`UrlRecord::is_effectively_blocked`]).
    pub blocked_until: Option<SystemTime>,
    /// Titles of the attached tags.
    pub tags: BTreeSet<String>,
    pub author: Option<UserId>,
    /// Submitter address for records created without a signed-in author.
    pub author_email: Option<Email>,
}

impl UrlRecord {
    /// Create an unsaved, published, unblocked record with zero clicks.
    pub fn new(short_code: ShortCode, original_url: String, created_at: SystemTime) -> Self {
        Self {
            id: None,
            original_url,
            short_code,
            created_at,
            updated_at: created_at,
            click_count: 0,
            is_published: true,
            is_blocked: false,
            blocked_until: None,
            tags: BTreeSet::new(),
            author: None,
            author_email: None,
        }
    }

    /// Blocked iff `blocked_until` lies in the future, or, with no
    /// `blocked_until`, iff the `is_blocked` flag is set.
    pub fn is_effectively_blocked(&self, now: SystemTime) -> bool {
        match self.blocked_until {
            Some(until) => until > now,
            None => self.is_blocked,
        }
    }

    /// Whether the record carries the permanent-block sentinel.
    pub fn is_permanently_blocked(&self) -> bool {
        self.blocked_until
            .is_some_and(|until| until >= permanent_block_sentinel())
    }

    /// Whether `blocked_until` has passed and the record still has to be
    /// flipped back to unblocked.
    pub fn has_expired_block(&self, now: SystemTime) -> bool {
        self.blocked_until.is_some_and(|until| until <= now)
    }

    pub fn is_owned_by(&self, user: &User) -> bool {
        matches!((self.author, user.id), (Some(a), Some(u)) if a == u)
    }
}

/// Input for creating a URL record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewUrl {
    pub original_url: String,
    /// Explicit code; generated when `None` or blank.
    pub short_code: Option<String>,
    pub tags: Vec<String>,
    pub is_published: bool,
    /// Required for anonymous submissions, ignored otherwise.
    pub author_email: Option<Email>,
}

/// Partial update of a URL record; `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UrlChanges {
    pub original_url: Option<String>,
    pub short_code: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_published: Option<bool>,
}

/// How long a block lasts.
///
/// A temporary block always carries its expiry, so a block "until nothing"
/// cannot be expressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockPolicy {
    Permanent,
    Until(SystemTime),
}

impl BlockPolicy {
    /// Build a policy from the `permanent` flag and optional expiry of a
    /// block request. A temporary block without expiry is rejected.
    pub fn from_request(
        permanent: bool,
        blocked_until: Option<SystemTime>,
    ) -> Result<Self, CoreError> {
        match (permanent, blocked_until) {
            (true, _) => Ok(BlockPolicy::Permanent),
            (false, Some(until)) => Ok(BlockPolicy::Until(until)),
            (false, None) => Err(CoreError::InvalidBlockExpiry),
        }
    }
}

/// Result of following a short code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedirectOutcome {
    NotFound,
    Unpublished,
    Blocked,
    Ok { destination: String },
}

impl RedirectOutcome {
    /// Turn the failure variants into the matching [`CoreError`].
    pub fn into_result(self) -> Result<String, CoreError> {
        match self {
            RedirectOutcome::Ok { destination } => Ok(destination),
            RedirectOutcome::NotFound => Err(CoreError::NotFound),
            RedirectOutcome::Unpublished => Err(CoreError::Unpublished),
            RedirectOutcome::Blocked => Err(CoreError::Blocked),
        }
    }
}

/// A label attached to URL records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub id: Option<TagId>,
    pub title: String,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Tag {
    pub fn new(title: String, created_at: SystemTime) -> Self {
        Self {
            id: None,
            title,
            created_at,
            updated_at: created_at,
        }
    }
}

/// Role held by a user. Every user implicitly holds [`Role::User`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// An account that can own URLs and administer the service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: Option<UserId>,
    pub email: Email,
    pub roles: BTreeSet<Role>,
    /// Blocked users cannot act.
    pub is_blocked: bool,
    pub created_at: SystemTime,
}

impl User {
    pub fn new(email: Email, created_at: SystemTime) -> Self {
        Self {
            id: None,
            email,
            roles: BTreeSet::from([Role::User]),
            is_blocked: false,
            created_at,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    /// Whether `other` is the same stored account.
    pub fn is_same(&self, other: &User) -> bool {
        matches!((self.id, other.id), (Some(a), Some(b)) if a == b)
    }
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Source of fresh short codes; uniqueness is checked by the caller.
pub trait ShortCodeGenerator: Send + Sync {
    fn generate(&self) -> ShortCode;
}

/// One page of a listing, 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub per_page: usize,
}

impl Page {
    pub const DEFAULT_PER_PAGE: usize = 10;

    pub fn new(number: usize, per_page: usize) -> Self {
        Self {
            number: number.max(1),
            per_page: per_page.max(1),
        }
    }

    /// Rows to skip; saturates for absurd page numbers.
    pub fn offset(&self) -> usize {
        (self.number - 1).saturating_mul(self.per_page)
    }

    pub fn limit(&self) -> usize {
        self.per_page
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PER_PAGE)
    }
}

/// Paginated list result.
#[derive(Clone, Debug)]
pub struct ListResult<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub has_more: bool,
}

impl<T> ListResult<T> {
    /// Cut one page out of an already filtered and ordered list.
    pub fn from_sorted(items: Vec<T>, page: Page) -> Self {
        let total = items.len();
        let has_more = page.offset().saturating_add(page.limit()) < total;
        let items = items
            .into_iter()
            .skip(page.offset())
            .take(page.limit())
            .collect();
        Self {
            items,
            total,
            has_more,
        }
    }
}

/// Which records a URL listing contains.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UrlFilter {
    Published,
    Unpublished,
    /// Published records carrying the tag with this title.
    Tagged(String),
    /// Published records whose URL, short code or a tag title contains the
    /// text (case-insensitive).
    Search(String),
    /// Every record the user authored, published or not.
    Author(UserId),
}

/// Ordering of a URL listing; ties are broken by id, newest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UrlOrder {
    RecentlyUpdated,
    Newest,
    MostClicked,
}

/// Pagination parameters and filters for URL list queries.
#[derive(Clone, Debug)]
pub struct ListOptions {
    pub filter: UrlFilter,
    pub order: UrlOrder,
    pub page: Page,
}

/// Repository port for persisting and loading URL records.
pub trait UrlRepository: Send + Sync {
    fn find_by_id(&self, id: UrlId) -> Result<Option<UrlRecord>, CoreError>;
    fn find_by_short_code(&self, code: &ShortCode) -> Result<Option<UrlRecord>, CoreError>;
    /// Count records submitted with `email` and created at or after `since`.
    fn count_by_email_since(&self, email: &Email, since: SystemTime) -> Result<u64, CoreError>;
    /// Insert (assigning `id`) or update. A duplicate short code fails with
    /// [`CoreError::UniqueConstraintViolation`]. Tags are linked by title and
    /// must already exist.
    fn save(&self, record: &mut UrlRecord) -> Result<(), CoreError>;
    fn delete(&self, id: UrlId) -> Result<(), CoreError>;
    /// Records whose `blocked_until` is set and earlier than the permanent
    /// sentinel.
    fn list_temporarily_blocked(&self) -> Result<Vec<UrlRecord>, CoreError>;
    fn list(&self, options: &ListOptions) -> Result<ListResult<UrlRecord>, CoreError>;
}

/// Repository port for tags. Renaming a tag is reflected in every URL record
/// carrying it; deleting a tag detaches it from them.
pub trait TagRepository: Send + Sync {
    fn find_by_id(&self, id: TagId) -> Result<Option<Tag>, CoreError>;
    fn find_by_title(&self, title: &str) -> Result<Option<Tag>, CoreError>;
    /// Insert or update. A duplicate title fails with
    /// [`CoreError::UniqueConstraintViolation`].
    fn save(&self, tag: &mut Tag) -> Result<(), CoreError>;
    fn delete(&self, id: TagId) -> Result<(), CoreError>;
    /// Tags ordered by title.
    fn list(&self, page: Page) -> Result<ListResult<Tag>, CoreError>;
}

/// Repository port for user accounts.
pub trait UserRepository: Send + Sync {
    fn find_by_id(&self, id: UserId) -> Result<Option<User>, CoreError>;
    fn find_by_email(&self, email: &Email) -> Result<Option<User>, CoreError>;
    /// Insert or update. A duplicate email fails with
    /// [`CoreError::UniqueConstraintViolation`].
    fn save(&self, user: &mut User) -> Result<(), CoreError>;
    /// Users ordered by id, newest first.
    fn list(&self, page: Page) -> Result<ListResult<User>, CoreError>;
    fn count_admins(&self) -> Result<u64, CoreError>;
}

/// Core domain errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("invalid email")]
    InvalidEmail,
    #[error("invalid tag: {0}")]
    InvalidTag(String),
    #[error("a temporary block needs an expiry in the future")]
    InvalidBlockExpiry,
    #[error("not found")]
    NotFound,
    #[error("url is not published")]
    Unpublished,
    #[error("url is blocked")]
    Blocked,
    #[error("daily limit of urls for this email reached")]
    QuotaExceeded,
    #[error("{0} already exists")]
    UniqueConstraintViolation(&'static str),
    #[error("access denied")]
    Forbidden,
    #[error("account is blocked")]
    AccountBlocked,
    #[error("the last administrator cannot lose the admin role")]
    LastAdmin,
    #[error("repository error: {0}")]
    Repository(String),
}

pub mod access;
pub mod adapters;
pub mod lifecycle;
pub mod shortcode;
pub mod tags;
pub mod users;
pub mod validate;

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn record() -> UrlRecord {
        UrlRecord::new(
            ShortCode::new("abc123").unwrap(),
            "https://example.com".into(),
            at(0),
        )
    }

    #[test]
    fn short_code_accepts_alphanumerics() {
        let c = ShortCode::new("abc123XYZ").expect("valid code");
        assert_eq!(c.as_str(), "abc123XYZ");
        assert!(ShortCode::new("a".repeat(32)).is_ok());
    }

    #[test]
    fn short_code_rejects_bad_values() {
        assert!(matches!(ShortCode::new(""), Err(CoreError::InvalidShortCode(_))));
        assert!(ShortCode::new("a".repeat(33)).is_err());
        assert!(ShortCode::new("has-dash").is_err());
        assert!(ShortCode::new("sp ace").is_err());
    }

    #[test]
    fn email_basic_validation() {
        assert_eq!(Email::new(" a@b.com ").unwrap().as_str(), "a@b.com");
        assert!(matches!(Email::new("not-an-email"), Err(CoreError::InvalidEmail)));
        assert!(Email::new("@b.com").is_err());
        assert!(Email::new("a@").is_err());
        assert!(Email::new("a@b@c").is_err());
    }

    #[test]
    fn effective_block_follows_expiry_first() {
        let now = at(1_000);
        let mut r = record();
        assert!(!r.is_effectively_blocked(now));

        r.is_blocked = true;
        assert!(r.is_effectively_blocked(now));

        // An expiry in the past wins over the flag
        r.blocked_until = Some(at(999));
        assert!(!r.is_effectively_blocked(now));
        r.blocked_until = Some(now);
        assert!(!r.is_effectively_blocked(now));

        // An expiry in the future blocks even without the flag
        r.is_blocked = false;
        r.blocked_until = Some(at(1_001));
        assert!(r.is_effectively_blocked(now));
    }

    #[test]
    fn permanent_sentinel_is_end_of_year_9999() {
        let mut r = record();
        r.blocked_until = Some(permanent_block_sentinel());
        assert!(r.is_permanently_blocked());
        assert!(r.is_effectively_blocked(at(PERMANENT_BLOCK_SECS - 1)));
        r.blocked_until = Some(at(5));
        assert!(!r.is_permanently_blocked());
    }

    #[test]
    fn block_policy_requires_expiry_for_temporary_blocks() {
        assert_eq!(
            BlockPolicy::from_request(true, None).unwrap(),
            BlockPolicy::Permanent
        );
        assert_eq!(
            BlockPolicy::from_request(false, Some(at(7))).unwrap(),
            BlockPolicy::Until(at(7))
        );
        assert_eq!(
            BlockPolicy::from_request(false, None).unwrap_err(),
            CoreError::InvalidBlockExpiry
        );
    }

    #[test]
    fn role_parsing() {
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse(" user "), Some(Role::User));
        assert_eq!(Role::parse("root"), None);
        assert_eq!(Role::Admin.as_str(), "admin");
    }

    #[test]
    fn page_offsets() {
        assert_eq!(Page::new(1, 10).offset(), 0);
        assert_eq!(Page::new(3, 10).offset(), 20);
        assert_eq!(Page::new(0, 0), Page::new(1, 1));
        let r = ListResult::from_sorted((0..25).collect::<Vec<_>>(), Page::new(3, 10));
        assert_eq!(r.items, vec![20, 21, 22, 23, 24]);
        assert_eq!(r.total, 25);
        assert!(!r.has_more);
    }

    #[test]
    fn huge_page_numbers_saturate() {
        let page = Page::new(usize::MAX, 10);
        assert_eq!(page.offset(), usize::MAX);
        let r = ListResult::from_sorted((0..5).collect::<Vec<_>>(), page);
        assert!(r.items.is_empty());
        assert_eq!(r.total, 5);
        assert!(!r.has_more);
    }
}
