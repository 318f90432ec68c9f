//! Access rules: pure functions of the acting user and the subject.
//!
//! `None` as actor means an anonymous caller.

use crate::{CoreError, UrlRecord, User};

/// What an actor may do with one URL record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UrlPermissions {
    pub view: bool,
    pub edit: bool,
    pub delete: bool,
    /// Covers both block and unblock.
    pub block: bool,
}

/// What an actor may do with tags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TagPermissions {
    pub view: bool,
    pub create: bool,
    pub edit: bool,
    pub delete: bool,
}

/// What an actor may do with another user account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UserPermissions {
    pub view: bool,
    pub edit: bool,
    pub block: bool,
}

/// Owners may change their record only until it has been clicked; admins
/// always may. Unpublished records are visible to their owner and admins.
pub fn url_permissions(actor: Option<&User>, record: &UrlRecord) -> UrlPermissions {
    let Some(user) = actor else {
        return UrlPermissions {
            view: record.is_published,
            ..UrlPermissions::default()
        };
    };
    let admin = user.is_admin();
    let owner = record.is_owned_by(user);
    let owner_may_change = owner && record.click_count == 0;
    UrlPermissions {
        view: record.is_published || owner || admin,
        edit: owner_may_change || admin,
        delete: owner_may_change || admin,
        block: admin,
    }
}

pub fn tag_permissions(actor: Option<&User>) -> TagPermissions {
    let signed_in = actor.is_some();
    let admin = actor.is_some_and(User::is_admin);
    TagPermissions {
        view: true,
        create: signed_in,
        edit: admin,
        delete: admin,
    }
}

/// Only admins manage users; nobody blocks themselves or another admin.
pub fn user_permissions(actor: Option<&User>, target: &User) -> UserPermissions {
    let Some(user) = actor.filter(|u| u.is_admin()) else {
        return UserPermissions::default();
    };
    UserPermissions {
        view: true,
        edit: true,
        block: !user.is_same(target) && !target.is_admin(),
    }
}

/// Turn a permission bit into a `Forbidden` error.
pub fn ensure(allowed: bool) -> Result<(), CoreError> {
    if allowed {
        Ok(())
    } else {
        Err(CoreError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Email, Role, ShortCode, UserId};
    use std::time::SystemTime;

    fn user(id: i64, admin: bool) -> User {
        let mut u = User::new(
            Email::new(format!("u{id}@example.com")).unwrap(),
            SystemTime::UNIX_EPOCH,
        );
        u.id = Some(UserId(id));
        if admin {
            u.roles.insert(Role::Admin);
        }
        u
    }

    fn record(author: Option<i64>) -> UrlRecord {
        let mut r = UrlRecord::new(
            ShortCode::new("abc").unwrap(),
            "https://example.com".into(),
            SystemTime::UNIX_EPOCH,
        );
        r.author = author.map(UserId);
        r
    }

    #[test]
    fn anonymous_may_only_view_published() {
        let mut r = record(None);
        assert_eq!(
            url_permissions(None, &r),
            UrlPermissions {
                view: true,
                ..Default::default()
            }
        );
        r.is_published = false;
        assert!(!url_permissions(None, &r).view);
    }

    #[test]
    fn owner_may_change_until_first_click() {
        let owner = user(1, false);
        let mut r = record(Some(1));
        let p = url_permissions(Some(&owner), &r);
        assert!(p.edit && p.delete && !p.block);

        r.click_count = 1;
        let p = url_permissions(Some(&owner), &r);
        assert!(p.view && !p.edit && !p.delete);
    }

    #[test]
    fn stranger_cannot_change_or_see_unpublished() {
        let stranger = user(2, false);
        let mut r = record(Some(1));
        r.is_published = false;
        assert_eq!(url_permissions(Some(&stranger), &r), UrlPermissions::default());
    }

    #[test]
    fn admin_may_do_everything_with_urls() {
        let admin = user(9, true);
        let mut r = record(Some(1));
        r.click_count = 42;
        r.is_published = false;
        let p = url_permissions(Some(&admin), &r);
        assert!(p.view && p.edit && p.delete && p.block);
    }

    #[test]
    fn tag_rules() {
        assert_eq!(
            tag_permissions(None),
            TagPermissions {
                view: true,
                ..Default::default()
            }
        );
        let p = tag_permissions(Some(&user(1, false)));
        assert!(p.create && !p.edit && !p.delete);
        let p = tag_permissions(Some(&user(2, true)));
        assert!(p.create && p.edit && p.delete);
    }

    #[test]
    fn user_rules() {
        let admin = user(1, true);
        let other_admin = user(2, true);
        let plain = user(3, false);

        assert_eq!(user_permissions(Some(&plain), &admin), UserPermissions::default());
        assert_eq!(user_permissions(None, &plain), UserPermissions::default());

        let p = user_permissions(Some(&admin), &plain);
        assert!(p.view && p.edit && p.block);
        let p = user_permissions(Some(&admin), &admin);
        assert!(p.view && p.edit && !p.block);
        let p = user_permissions(Some(&admin), &other_admin);
        assert!(p.edit && !p.block);
    }

    #[test]
    fn ensure_maps_to_forbidden() {
        assert!(ensure(true).is_ok());
        assert_eq!(ensure(false).unwrap_err(), CoreError::Forbidden);
    }
}
