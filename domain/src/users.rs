use std::collections::BTreeSet;

use crate::{Clock, CoreError, Email, ListResult, Page, Role, User, UserId, UserRepository};

/// Application service for user accounts.
pub struct UserService<R: UserRepository, C: Clock> {
    repo: R,
    clock: C,
}

impl<R: UserRepository, C: Clock> UserService<R, C> {
    pub fn new(repo: R, clock: C) -> Self {
        Self { repo, clock }
    }

    /// Load the account behind `email`, provisioning it on first sight.
    ///
    /// Addresses listed in `admin_emails` are granted [`Role::Admin`]
    /// whenever they sign in. Blocked accounts are refused.
    pub fn resolve_actor(&self, email: &Email, admin_emails: &[Email]) -> Result<User, CoreError> {
        let promote = admin_emails.contains(email);
        let mut user = match self.repo.find_by_email(email)? {
            Some(user) => user,
            None => {
                let mut user = User::new(email.clone(), self.clock.now());
                if promote {
                    user.roles.insert(Role::Admin);
                }
                self.repo.save(&mut user)?;
                user
            }
        };
        if user.is_blocked {
            return Err(CoreError::AccountBlocked);
        }
        if promote && !user.is_admin() {
            user.roles.insert(Role::Admin);
            self.repo.save(&mut user)?;
        }
        Ok(user)
    }

    pub fn get(&self, id: UserId) -> Result<User, CoreError> {
        self.repo.find_by_id(id)?.ok_or(CoreError::NotFound)
    }

    pub fn list(&self, page: Page) -> Result<ListResult<User>, CoreError> {
        self.repo.list(page)
    }

    pub fn block(&self, user: &mut User) -> Result<(), CoreError> {
        user.is_blocked = true;
        self.repo.save(user)
    }

    pub fn unblock(&self, user: &mut User) -> Result<(), CoreError> {
        user.is_blocked = false;
        self.repo.save(user)
    }

    /// Replace the role set. [`Role::User`] is always kept, and the last
    /// administrator keeps [`Role::Admin`].
    pub fn set_roles(&self, user: &mut User, mut roles: BTreeSet<Role>) -> Result<(), CoreError> {
        roles.insert(Role::User);
        let demotes = user.is_admin() && !roles.contains(&Role::Admin);
        if demotes && self.repo.count_admins()? <= 1 {
            return Err(CoreError::LastAdmin);
        }
        user.roles = roles;
        self.repo.save(user)
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

    fn email(s: &str) -> Email {
        Email::new(s).unwrap()
    }

    #[test]
    fn first_sight_provisions_plain_user() {
        let svc = UserService::new(InMemoryRepo::new(), TestClock);
        let u = svc.resolve_actor(&email("a@b.com"), &[]).unwrap();
        assert!(u.id.is_some());
        assert_eq!(u.roles, BTreeSet::from([Role::User]));

        let again = svc.resolve_actor(&email("a@b.com"), &[]).unwrap();
        assert_eq!(again.id, u.id);
        assert_eq!(svc.list(Page::default()).unwrap().total, 1);
    }

    #[test]
    fn admin_emails_are_promoted() {
        let svc = UserService::new(InMemoryRepo::new(), TestClock);
        let admins = [email("root@b.com")];
        assert!(svc.resolve_actor(&email("root@b.com"), &admins).unwrap().is_admin());

        // Existing account promoted on next sign-in
        let plain = svc.resolve_actor(&email("x@b.com"), &[]).unwrap();
        assert!(!plain.is_admin());
        let promoted = svc.resolve_actor(&email("x@b.com"), &[email("x@b.com")]).unwrap();
        assert!(promoted.is_admin());
        assert!(svc.get(plain.id.unwrap()).unwrap().is_admin());
    }

    #[test]
    fn blocked_accounts_are_refused() {
        let svc = UserService::new(InMemoryRepo::new(), TestClock);
        let mut u = svc.resolve_actor(&email("a@b.com"), &[]).unwrap();
        svc.block(&mut u).unwrap();
        assert_eq!(
            svc.resolve_actor(&email("a@b.com"), &[]).unwrap_err(),
            CoreError::AccountBlocked
        );
        svc.unblock(&mut u).unwrap();
        assert!(svc.resolve_actor(&email("a@b.com"), &[]).is_ok());
    }

    #[test]
    fn set_roles_keeps_user_role() {
        let svc = UserService::new(InMemoryRepo::new(), TestClock);
        svc.resolve_actor(&email("root@b.com"), &[email("root@b.com")])
            .unwrap();
        let mut u = svc.resolve_actor(&email("a@b.com"), &[]).unwrap();
        svc.set_roles(&mut u, BTreeSet::from([Role::Admin])).unwrap();
        let stored = svc.get(u.id.unwrap()).unwrap();
        assert_eq!(stored.roles, BTreeSet::from([Role::User, Role::Admin]));

        svc.set_roles(&mut u, BTreeSet::new()).unwrap();
        assert!(!svc.get(u.id.unwrap()).unwrap().is_admin());
    }

    #[test]
    fn last_admin_keeps_admin_role() {
        let svc = UserService::new(InMemoryRepo::new(), TestClock);
        let mut root = svc
            .resolve_actor(&email("root@b.com"), &[email("root@b.com")])
            .unwrap();
        assert_eq!(
            svc.set_roles(&mut root, BTreeSet::from([Role::User]))
                .unwrap_err(),
            CoreError::LastAdmin
        );
        assert!(root.is_admin());
        assert!(svc.get(root.id.unwrap()).unwrap().is_admin());

        // Re-asserting the admin role is not a demotion
        svc.set_roles(&mut root, BTreeSet::from([Role::Admin])).unwrap();

        let mut other = svc.resolve_actor(&email("b@b.com"), &[]).unwrap();
        svc.set_roles(&mut other, BTreeSet::from([Role::Admin])).unwrap();
        svc.set_roles(&mut root, BTreeSet::new()).unwrap();
        assert!(!svc.get(root.id.unwrap()).unwrap().is_admin());
        assert_eq!(
            svc.set_roles(&mut other, BTreeSet::new()).unwrap_err(),
            CoreError::LastAdmin
        );
    }

    #[test]
    fn unknown_id_is_not_found() {
        let svc = UserService::new(InMemoryRepo::new(), TestClock);
        assert_eq!(svc.get(UserId(99)).unwrap_err(), CoreError::NotFound);
    }
}
