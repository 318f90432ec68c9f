//! Tag parsing and the tag application service.

use std::collections::BTreeSet;

use crate::validate::validate_tag_title;
use crate::{Clock, CoreError, ListResult, Page, Tag, TagId, TagRepository};

/// Split a comma-separated tag field into titles: trimmed, empties dropped,
/// duplicates removed, first spelling kept.
pub fn parse_titles(input: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    input
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Titles resolved by [`ensure_tags`], with the ids of tags it had to create.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnsuredTags {
    pub titles: BTreeSet<String>,
    pub created: Vec<TagId>,
}

/// Find or create a tag for every title and return the stored titles.
///
/// All titles are validated before anything is written. If a write fails,
/// tags created by this call are removed again.
pub fn ensure_tags<R: TagRepository + ?Sized>(
    repo: &R,
    titles: &[String],
    now: std::time::SystemTime,
) -> Result<EnsuredTags, CoreError> {
    let titles = titles
        .iter()
        .map(|raw| validate_tag_title(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = EnsuredTags::default();
    for title in titles {
        let found = match repo.find_by_title(&title) {
            Ok(found) => found,
            Err(e) => {
                discard_tags(repo, &out.created);
                return Err(e);
            }
        };
        match found {
            Some(existing) => {
                out.titles.insert(existing.title);
            }
            None => {
                let mut tag = Tag::new(title, now);
                if let Err(e) = repo.save(&mut tag) {
                    discard_tags(repo, &out.created);
                    return Err(e);
                }
                out.created.extend(tag.id);
                out.titles.insert(tag.title);
            }
        }
    }
    Ok(out)
}

/// Best-effort removal of tags created for a write that did not happen.
pub fn discard_tags<R: TagRepository + ?Sized>(repo: &R, ids: &[TagId]) {
    for id in ids {
        let _ = repo.delete(*id);
    }
}

/// Application service for tag administration.
pub struct TagService<R: TagRepository, C: Clock> {
    repo: R,
    clock: C,
}

impl<R: TagRepository, C: Clock> TagService<R, C> {
    pub fn new(repo: R, clock: C) -> Self {
        Self { repo, clock }
    }

    pub fn get(&self, id: TagId) -> Result<Tag, CoreError> {
        self.repo.find_by_id(id)?.ok_or(CoreError::NotFound)
    }

    pub fn list(&self, page: Page) -> Result<ListResult<Tag>, CoreError> {
        self.repo.list(page)
    }

    pub fn create(&self, title: &str) -> Result<Tag, CoreError> {
        let title = validate_tag_title(title)?;
        if self.repo.find_by_title(&title)?.is_some() {
            return Err(CoreError::UniqueConstraintViolation("tag title"));
        }
        let mut tag = Tag::new(title, self.clock.now());
        self.repo.save(&mut tag)?;
        Ok(tag)
    }

    /// Rename a tag; URL records carrying it follow the new title.
    pub fn rename(&self, tag: &mut Tag, title: &str) -> Result<(), CoreError> {
        let title = validate_tag_title(title)?;
        if title == tag.title {
            return Ok(());
        }
        if self.repo.find_by_title(&title)?.is_some() {
            return Err(CoreError::UniqueConstraintViolation("tag title"));
        }
        tag.title = title;
        tag.updated_at = self.clock.now();
        self.repo.save(tag)
    }

    /// Delete a tag and detach it from every URL record.
    pub fn delete(&self, tag: &Tag) -> Result<(), CoreError> {
        let id = tag.id.ok_or(CoreError::NotFound)?;
        self.repo.delete(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_repo::InMemoryRepo;
    use std::time::SystemTime;

    struct TestClock;
    impl Clock for TestClock {
        fn now(&self) -> SystemTime {
            SystemTime::UNIX_EPOCH
        }
    }

    #[test]
    fn parse_titles_trims_and_dedups() {
        assert_eq!(
            parse_titles(" rust, web ,, Rust,news , "),
            vec!["rust".to_string(), "web".to_string(), "news".to_string()]
        );
        assert!(parse_titles("").is_empty());
        assert!(parse_titles(" , ,").is_empty());
    }

    #[test]
    fn ensure_tags_reuses_existing_titles() {
        let repo = InMemoryRepo::new();
        let first = ensure_tags(&repo, &["news".into(), "rust".into()], SystemTime::UNIX_EPOCH)
            .unwrap();
        assert_eq!(first.titles.len(), 2);
        assert_eq!(first.created.len(), 2);
        let again = ensure_tags(&repo, &["Rust".into()], SystemTime::UNIX_EPOCH).unwrap();
        assert!(again.titles.contains("rust"));
        assert!(again.created.is_empty());
        assert_eq!(repo.list(Page::default()).unwrap().total, 2);
    }

    #[test]
    fn ensure_tags_rejects_short_titles() {
        let repo = InMemoryRepo::new();
        let err = ensure_tags(&repo, &["ok!".into(), "no".into()], SystemTime::UNIX_EPOCH)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTag(_)));
        assert_eq!(repo.list(Page::default()).unwrap().total, 0);
    }

    #[test]
    fn titles_differing_in_case_share_one_tag() {
        let svc = TagService::new(InMemoryRepo::new(), TestClock);
        let tag = svc.create("Rust").unwrap();
        assert_eq!(tag.title, "rust");
        assert_eq!(
            svc.create("RUST").unwrap_err(),
            CoreError::UniqueConstraintViolation("tag title")
        );
        let ensured = ensure_tags(&svc.repo, &["rUsT".into()], SystemTime::UNIX_EPOCH).unwrap();
        assert!(ensured.created.is_empty());
        assert_eq!(ensured.titles, BTreeSet::from(["rust".to_string()]));
    }

    #[test]
    fn discarded_tags_are_gone() {
        let repo = InMemoryRepo::new();
        let ensured = ensure_tags(&repo, &["news".into()], SystemTime::UNIX_EPOCH).unwrap();
        discard_tags(&repo, &ensured.created);
        assert!(repo.find_by_title("news").unwrap().is_none());
    }

    #[test]
    fn create_rename_delete() {
        let svc = TagService::new(InMemoryRepo::new(), TestClock);
        let mut tag = svc.create("rust").unwrap();
        assert!(tag.id.is_some());
        assert_eq!(
            svc.create(" rust ").unwrap_err(),
            CoreError::UniqueConstraintViolation("tag title")
        );

        svc.rename(&mut tag, "rustlang").unwrap();
        assert_eq!(svc.get(tag.id.unwrap()).unwrap().title, "rustlang");

        svc.create("other").unwrap();
        let mut other = svc.list(Page::default()).unwrap().items[0].clone();
        assert_eq!(other.title, "other");
        assert!(svc.rename(&mut other, "rustlang").is_err());

        svc.delete(&tag).unwrap();
        assert_eq!(svc.get(tag.id.unwrap()).unwrap_err(), CoreError::NotFound);
    }
}
