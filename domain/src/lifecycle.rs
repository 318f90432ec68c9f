use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::tags::{discard_tags, ensure_tags};
use crate::validate::{validate_original_url, validate_short_code};
use crate::{
    permanent_block_sentinel, BlockPolicy, Clock, CoreError, Email, ListOptions, ListResult,
    NewUrl, RedirectOutcome, ShortCode, ShortCodeGenerator, TagRepository, UrlChanges, UrlId,
    UrlRecord, UrlRepository, User,
};

/// Records one anonymous email may submit per UTC day.
pub const DEFAULT_DAILY_LIMIT: u64 = 10;

/// Times a generated code is regenerated after the store reports it taken.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 5;

// Hard cap on the lookup loop to avoid spinning forever on a degenerate generator
const MAX_CODE_LOOKUPS: usize = 100;

/// Application service owning short-code allocation, publish state and
/// blocking of URL records.
///
/// Every operation runs synchronously against the repository. Nothing here
/// is transactional: a generated code is unique when looked up, and a racing
/// writer is caught by the store's unique constraint at save time.
pub struct UrlLifecycleManager<R: UrlRepository, G: ShortCodeGenerator, C: Clock> {
    repo: R,
    generator: G,
    clock: C,
    daily_limit: u64,
}

impl<R: UrlRepository, G: ShortCodeGenerator, C: Clock> UrlLifecycleManager<R, G, C> {
    pub fn new(repo: R, generator: G, clock: C) -> Self {
        Self {
            repo,
            generator,
            clock,
            daily_limit: DEFAULT_DAILY_LIMIT,
        }
    }

    pub fn with_daily_limit(mut self, daily_limit: u64) -> Self {
        self.daily_limit = daily_limit;
        self
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn now(&self) -> SystemTime {
        self.clock.now()
    }

    /// Return `existing` when it is non-blank, otherwise a generated code
    /// that no stored record uses at the moment of the check.
    pub fn allocate_short_code(&self, existing: Option<&str>) -> Result<ShortCode, CoreError> {
        if let Some(code) = existing.filter(|c| !c.trim().is_empty()) {
            return validate_short_code(code);
        }
        for _ in 0..MAX_CODE_LOOKUPS {
            let code = self.generator.generate();
            if self.repo.find_by_short_code(&code)?.is_none() {
                return Ok(code);
            }
        }
        Err(CoreError::Repository(
            "failed to generate unique short code".into(),
        ))
    }

    /// Block a record permanently or until a point in the future.
    pub fn block(&self, record: &mut UrlRecord, policy: BlockPolicy) -> Result<(), CoreError> {
        let now = self.clock.now();
        let until = match policy {
            BlockPolicy::Permanent => permanent_block_sentinel(),
            BlockPolicy::Until(until) if until > now => until,
            BlockPolicy::Until(_) => return Err(CoreError::InvalidBlockExpiry),
        };
        record.blocked_until = Some(until);
        record.is_blocked = true;
        record.updated_at = now;
        self.repo.save(record)
    }

    pub fn unblock(&self, record: &mut UrlRecord) -> Result<(), CoreError> {
        record.blocked_until = None;
        record.is_blocked = false;
        record.updated_at = self.clock.now();
        self.repo.save(record)
    }

    /// Lift a block whose expiry has passed. Returns whether the record
    /// changed (and was saved).
    pub fn reconcile_block_status(
        &self,
        record: &mut UrlRecord,
        now: SystemTime,
    ) -> Result<bool, CoreError> {
        if !record.has_expired_block(now) {
            return Ok(false);
        }
        record.blocked_until = None;
        record.is_blocked = false;
        record.updated_at = now;
        self.repo.save(record)?;
        Ok(true)
    }

    pub fn is_effectively_blocked(&self, record: &UrlRecord, now: SystemTime) -> bool {
        record.is_effectively_blocked(now)
    }

    /// Follow a short code, counting the click when the redirect succeeds.
    pub fn handle_redirect(&self, short_code: &str) -> Result<RedirectOutcome, CoreError> {
        let Ok(code) = ShortCode::new(short_code) else {
            return Ok(RedirectOutcome::NotFound);
        };
        let Some(mut record) = self.repo.find_by_short_code(&code)? else {
            return Ok(RedirectOutcome::NotFound);
        };
        if !record.is_published {
            return Ok(RedirectOutcome::Unpublished);
        }
        let now = self.clock.now();
        self.reconcile_block_status(&mut record, now)?;
        if record.is_effectively_blocked(now) {
            return Ok(RedirectOutcome::Blocked);
        }
        record.click_count = record.click_count.saturating_add(1);
        record.updated_at = now;
        self.repo.save(&mut record)?;
        Ok(RedirectOutcome::Ok {
            destination: record.original_url,
        })
    }

    /// Whether `email` may submit another anonymous record today.
    pub fn can_create_for_email(&self, email: &Email) -> Result<bool, CoreError> {
        let since = start_of_day(self.clock.now());
        let count = self.repo.count_by_email_since(email, since)?;
        Ok(count < self.daily_limit)
    }

    /// Load a record, lifting an expired block on the way.
    pub fn get(&self, id: UrlId) -> Result<UrlRecord, CoreError> {
        let mut record = self.repo.find_by_id(id)?.ok_or(CoreError::NotFound)?;
        self.reconcile_block_status(&mut record, self.clock.now())?;
        Ok(record)
    }

    pub fn list(&self, options: &ListOptions) -> Result<ListResult<UrlRecord>, CoreError> {
        self.repo.list(options)
    }

    /// Reconcile every temporarily blocked record. Returns how many were
    /// unblocked.
    pub fn sweep_expired_blocks(&self) -> Result<usize, CoreError> {
        let now = self.clock.now();
        let mut lifted = 0;
        for mut record in self.repo.list_temporarily_blocked()? {
            if self.reconcile_block_status(&mut record, now)? {
                lifted += 1;
            }
        }
        Ok(lifted)
    }

    pub fn delete(&self, record: &UrlRecord) -> Result<(), CoreError> {
        let id = record.id.ok_or(CoreError::NotFound)?;
        self.repo.delete(id)
    }
}

impl<R, G, C> UrlLifecycleManager<R, G, C>
where
    R: UrlRepository + TagRepository,
    G: ShortCodeGenerator,
    C: Clock,
{
    /// Create and persist a record.
    ///
    /// Anonymous submissions (no `author`) need `author_email` and are
    /// subject to the daily limit. A generated code that loses a race at
    /// save time is regenerated up to [`MAX_ALLOCATION_ATTEMPTS`] times; an
    /// explicit code that is taken fails right away.
    pub fn create(&self, input: NewUrl, author: Option<&User>) -> Result<UrlRecord, CoreError> {
        validate_original_url(&input.original_url)?;
        let author_email = match author {
            Some(_) => None,
            None => {
                let email = input.author_email.clone().ok_or(CoreError::InvalidEmail)?;
                if !self.can_create_for_email(&email)? {
                    return Err(CoreError::QuotaExceeded);
                }
                Some(email)
            }
        };
        let explicit = input
            .short_code
            .as_deref()
            .filter(|c| !c.trim().is_empty());
        if let Some(code) = explicit {
            validate_short_code(code)?;
        }
        let now = self.clock.now();
        let ensured = ensure_tags(&self.repo, &input.tags, now)?;

        let created = self.allocate_short_code(explicit).and_then(|code| {
            let mut record = UrlRecord::new(code, input.original_url.trim().to_string(), now);
            record.is_published = input.is_published;
            record.tags = ensured.titles;
            record.author = author.and_then(|u| u.id);
            record.author_email = author_email;
            self.insert_with_fresh_code(&mut record, explicit)?;
            Ok(record)
        });
        if created.is_err() {
            discard_tags(&self.repo, &ensured.created);
        }
        created
    }

    // Save `record`, drawing a new generated code each time the store
    // reports the current one taken.
    fn insert_with_fresh_code(
        &self,
        record: &mut UrlRecord,
        explicit: Option<&str>,
    ) -> Result<(), CoreError> {
        let mut last_err = CoreError::UniqueConstraintViolation("short code");
        for attempt in 0..MAX_ALLOCATION_ATTEMPTS {
            if attempt > 0 {
                record.short_code = self.allocate_short_code(explicit)?;
            }
            match UrlRepository::save(&self.repo, record) {
                Ok(()) => return Ok(()),
                Err(err @ CoreError::UniqueConstraintViolation(_)) if explicit.is_none() => {
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }

    /// Apply `changes` to a stored record. Nothing is written if a change
    /// is invalid.
    pub fn edit(&self, record: &mut UrlRecord, changes: UrlChanges) -> Result<(), CoreError> {
        let mut updated = record.clone();
        if let Some(url) = changes.original_url {
            validate_original_url(&url)?;
            updated.original_url = url.trim().to_string();
        }
        if let Some(code) = changes.short_code.filter(|c| !c.trim().is_empty()) {
            updated.short_code = validate_short_code(&code)?;
        }
        if let Some(published) = changes.is_published {
            updated.is_published = published;
        }
        let now = self.clock.now();
        updated.updated_at = now;
        let created = match changes.tags {
            Some(titles) => {
                let ensured = ensure_tags(&self.repo, &titles, now)?;
                updated.tags = ensured.titles;
                ensured.created
            }
            None => Vec::new(),
        };
        match UrlRepository::save(&self.repo, &mut updated) {
            Ok(()) => {
                *record = updated;
                Ok(())
            }
            Err(e) => {
                discard_tags(&self.repo, &created);
                Err(e)
            }
        }
    }
}

/// Midnight UTC of the day containing `now`.
fn start_of_day(now: SystemTime) -> SystemTime {
    let dt: DateTime<Utc> = now.into();
    dt.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc().into())
        .unwrap_or(now)
}
