use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use crate::{
    permanent_block_sentinel, CoreError, Email, ListOptions, ListResult, Page, ShortCode, Tag,
    TagId, TagRepository, UrlFilter, UrlId, UrlOrder, UrlRecord, UrlRepository, User, UserId,
    UserRepository,
};

/// In-memory store implementing every repository port. A single mutex
/// guards all three tables, so tag renames reach URL records atomically.
pub struct InMemoryRepo {
    inner: Mutex<State>,
}

#[derive(Default)]
struct State {
    urls: BTreeMap<i64, UrlRecord>,
    tags: BTreeMap<i64, Tag>,
    users: BTreeMap<i64, User>,
    last_url_id: i64,
    last_tag_id: i64,
    last_user_id: i64,
}

impl InMemoryRepo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, CoreError> {
        self.inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))
    }
}

impl Default for InMemoryRepo {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filter(record: &UrlRecord, filter: &UrlFilter) -> bool {
    match filter {
        UrlFilter::Published => record.is_published,
        UrlFilter::Unpublished => !record.is_published,
        UrlFilter::Tagged(title) => record.is_published && record.tags.contains(title),
        UrlFilter::Search(q) => {
            let q = q.to_lowercase();
            record.is_published
                && (record.original_url.to_lowercase().contains(&q)
                    || record.short_code.as_str().to_lowercase().contains(&q)
                    || record.tags.iter().any(|t| t.to_lowercase().contains(&q)))
        }
        UrlFilter::Author(id) => record.author == Some(*id),
    }
}

fn compare(a: &UrlRecord, b: &UrlRecord, order: UrlOrder) -> Ordering {
    let primary = match order {
        UrlOrder::RecentlyUpdated => b.updated_at.cmp(&a.updated_at),
        UrlOrder::Newest => b.created_at.cmp(&a.created_at),
        UrlOrder::MostClicked => b.click_count.cmp(&a.click_count),
    };
    primary.then_with(|| b.id.cmp(&a.id))
}

impl UrlRepository for InMemoryRepo {
    fn find_by_id(&self, id: UrlId) -> Result<Option<UrlRecord>, CoreError> {
        Ok(self.state()?.urls.get(&id.0).cloned())
    }

    fn find_by_short_code(&self, code: &ShortCode) -> Result<Option<UrlRecord>, CoreError> {
        let state = self.state()?;
        Ok(state.urls.values().find(|r| &r.short_code == code).cloned())
    }

    fn count_by_email_since(&self, email: &Email, since: SystemTime) -> Result<u64, CoreError> {
        let state = self.state()?;
        Ok(state
            .urls
            .values()
            .filter(|r| r.author_email.as_ref() == Some(email) && r.created_at >= since)
            .count() as u64)
    }

    fn save(&self, record: &mut UrlRecord) -> Result<(), CoreError> {
        let mut state = self.state()?;
        let taken = state
            .urls
            .values()
            .any(|r| r.short_code == record.short_code && r.id != record.id);
        if taken {
            return Err(CoreError::UniqueConstraintViolation("short code"));
        }
        if let Some(missing) = record
            .tags
            .iter()
            .find(|t| !state.tags.values().any(|tag| &tag.title == *t))
        {
            return Err(CoreError::InvalidTag(format!("unknown tag {missing}")));
        }
        let id = match record.id {
            Some(id) => {
                if !state.urls.contains_key(&id.0) {
                    return Err(CoreError::NotFound);
                }
                id
            }
            None => {
                state.last_url_id += 1;
                UrlId(state.last_url_id)
            }
        };
        record.id = Some(id);
        state.urls.insert(id.0, record.clone());
        Ok(())
    }

    fn delete(&self, id: UrlId) -> Result<(), CoreError> {
        match self.state()?.urls.remove(&id.0) {
            Some(_) => Ok(()),
            None => Err(CoreError::NotFound),
        }
    }

    fn list_temporarily_blocked(&self) -> Result<Vec<UrlRecord>, CoreError> {
        let sentinel = permanent_block_sentinel();
        let state = self.state()?;
        Ok(state
            .urls
            .values()
            .filter(|r| r.blocked_until.is_some_and(|until| until < sentinel))
            .cloned()
            .collect())
    }

    fn list(&self, options: &ListOptions) -> Result<ListResult<UrlRecord>, CoreError> {
        let state = self.state()?;
        let mut items: Vec<_> = state
            .urls
            .values()
            .filter(|r| matches_filter(r, &options.filter))
            .cloned()
            .collect();
        items.sort_by(|a, b| compare(a, b, options.order));
        Ok(ListResult::from_sorted(items, options.page))
    }
}

impl TagRepository for InMemoryRepo {
    fn find_by_id(&self, id: TagId) -> Result<Option<Tag>, CoreError> {
        Ok(self.state()?.tags.get(&id.0).cloned())
    }

    fn find_by_title(&self, title: &str) -> Result<Option<Tag>, CoreError> {
        let state = self.state()?;
        Ok(state.tags.values().find(|t| t.title == title).cloned())
    }

    fn save(&self, tag: &mut Tag) -> Result<(), CoreError> {
        let mut state = self.state()?;
        if state
            .tags
            .values()
            .any(|t| t.title == tag.title && t.id != tag.id)
        {
            return Err(CoreError::UniqueConstraintViolation("tag title"));
        }
        let id = match tag.id {
            Some(id) => {
                let previous = state
                    .tags
                    .get(&id.0)
                    .map(|t| t.title.clone())
                    .ok_or(CoreError::NotFound)?;
                if previous != tag.title {
                    for record in state.urls.values_mut() {
                        if record.tags.remove(&previous) {
                            record.tags.insert(tag.title.clone());
                        }
                    }
                }
                id
            }
            None => {
                state.last_tag_id += 1;
                TagId(state.last_tag_id)
            }
        };
        tag.id = Some(id);
        state.tags.insert(id.0, tag.clone());
        Ok(())
    }

    fn delete(&self, id: TagId) -> Result<(), CoreError> {
        let mut state = self.state()?;
        let tag = state.tags.remove(&id.0).ok_or(CoreError::NotFound)?;
        for record in state.urls.values_mut() {
            record.tags.remove(&tag.title);
        }
        Ok(())
    }

    fn list(&self, page: Page) -> Result<ListResult<Tag>, CoreError> {
        let state = self.state()?;
        let mut items: Vec<_> = state.tags.values().cloned().collect();
        items.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(ListResult::from_sorted(items, page))
    }
}

impl UserRepository for InMemoryRepo {
    fn find_by_id(&self, id: UserId) -> Result<Option<User>, CoreError> {
        Ok(self.state()?.users.get(&id.0).cloned())
    }

    fn find_by_email(&self, email: &Email) -> Result<Option<User>, CoreError> {
        let state = self.state()?;
        Ok(state.users.values().find(|u| &u.email == email).cloned())
    }

    fn save(&self, user: &mut User) -> Result<(), CoreError> {
        let mut state = self.state()?;
        if state
            .users
            .values()
            .any(|u| u.email == user.email && u.id != user.id)
        {
            return Err(CoreError::UniqueConstraintViolation("email"));
        }
        let id = match user.id {
            Some(id) if state.users.contains_key(&id.0) => id,
            Some(_) => return Err(CoreError::NotFound),
            None => {
                state.last_user_id += 1;
                UserId(state.last_user_id)
            }
        };
        user.id = Some(id);
        state.users.insert(id.0, user.clone());
        Ok(())
    }

    fn list(&self, page: Page) -> Result<ListResult<User>, CoreError> {
        let state = self.state()?;
        let items: Vec<_> = state.users.values().rev().cloned().collect();
        Ok(ListResult::from_sorted(items, page))
    }

    fn count_admins(&self) -> Result<u64, CoreError> {
        let state = self.state()?;
        Ok(state.users.values().filter(|u| u.is_admin()).count() as u64)
    }
}
