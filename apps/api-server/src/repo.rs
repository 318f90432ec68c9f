//! Storage selection for the server: in-memory or SQLite (feature-gated),
//! exposed through the domain repository ports.

use std::sync::Arc;
use std::time::SystemTime;

use domain::adapters::memory_repo::InMemoryRepo;
use domain::{
    CoreError, Email, ListOptions, ListResult, Page, ShortCode, Tag, TagId, TagRepository, UrlId,
    UrlRecord, UrlRepository, User, UserId, UserRepository,
};

/// Every port the server needs, implemented by each backend.
trait Store: UrlRepository + TagRepository + UserRepository {}
impl<T: UrlRepository + TagRepository + UserRepository> Store for T {}

enum RepoKind {
    Memory(InMemoryRepo),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite_adapter::SqliteRepo),
}

/// Cheaply cloneable handle shared by the domain services.
#[derive(Clone)]
pub struct AnyRepo {
    kind: Arc<RepoKind>,
}

impl AnyRepo {
    pub fn memory() -> Self {
        Self {
            kind: Arc::new(RepoKind::Memory(InMemoryRepo::new())),
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn sqlite(path: &std::path::Path) -> Result<Self, CoreError> {
        Ok(Self {
            kind: Arc::new(RepoKind::Sqlite(
                sqlite_adapter::SqliteRepo::open_creating_dirs(path)?,
            )),
        })
    }

    pub fn backend(&self) -> &'static str {
        match &*self.kind {
            RepoKind::Memory(_) => "memory",
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(_) => "sqlite",
        }
    }

    fn store(&self) -> &dyn Store {
        match &*self.kind {
            RepoKind::Memory(r) => r,
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r,
        }
    }
}

impl UrlRepository for AnyRepo {
    fn find_by_id(&self, id: UrlId) -> Result<Option<UrlRecord>, CoreError> {
        UrlRepository::find_by_id(self.store(), id)
    }

    fn find_by_short_code(&self, code: &ShortCode) -> Result<Option<UrlRecord>, CoreError> {
        self.store().find_by_short_code(code)
    }

    fn count_by_email_since(&self, email: &Email, since: SystemTime) -> Result<u64, CoreError> {
        self.store().count_by_email_since(email, since)
    }

    fn save(&self, record: &mut UrlRecord) -> Result<(), CoreError> {
        UrlRepository::save(self.store(), record)
    }

    fn delete(&self, id: UrlId) -> Result<(), CoreError> {
        UrlRepository::delete(self.store(), id)
    }

    fn list_temporarily_blocked(&self) -> Result<Vec<UrlRecord>, CoreError> {
        self.store().list_temporarily_blocked()
    }

    fn list(&self, options: &ListOptions) -> Result<ListResult<UrlRecord>, CoreError> {
        UrlRepository::list(self.store(), options)
    }
}

impl TagRepository for AnyRepo {
    fn find_by_id(&self, id: TagId) -> Result<Option<Tag>, CoreError> {
        TagRepository::find_by_id(self.store(), id)
    }

    fn find_by_title(&self, title: &str) -> Result<Option<Tag>, CoreError> {
        self.store().find_by_title(title)
    }

    fn save(&self, tag: &mut Tag) -> Result<(), CoreError> {
        TagRepository::save(self.store(), tag)
    }

    fn delete(&self, id: TagId) -> Result<(), CoreError> {
        TagRepository::delete(self.store(), id)
    }

    fn list(&self, page: Page) -> Result<ListResult<Tag>, CoreError> {
        TagRepository::list(self.store(), page)
    }
}

impl UserRepository for AnyRepo {
    fn find_by_id(&self, id: UserId) -> Result<Option<User>, CoreError> {
        UserRepository::find_by_id(self.store(), id)
    }

    fn find_by_email(&self, email: &Email) -> Result<Option<User>, CoreError> {
        self.store().find_by_email(email)
    }

    fn save(&self, user: &mut User) -> Result<(), CoreError> {
        UserRepository::save(self.store(), user)
    }

    fn list(&self, page: Page) -> Result<ListResult<User>, CoreError> {
        UserRepository::list(self.store(), page)
    }

    fn count_admins(&self) -> Result<u64, CoreError> {
        self.store().count_admins()
    }
}
