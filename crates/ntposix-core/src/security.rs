//! Permission oracle and user context.
//!
//! The descriptor layer does not interpret ACLs. It asks a
//! [`PermissionOracle`] whether the current user may perform an access and
//! turns a refusal into `EACCES`/`EPERM`.

use parking_lot::RwLock;

use crate::errno::Errno;

pub const R_OK: u32 = 4;
pub const W_OK: u32 = 2;
pub const X_OK: u32 = 1;

/// Identity of the calling process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub uid: u32,
    pub gid: u32,
    pub name: String,
}

impl Default for UserContext {
    fn default() -> Self {
        Self {
            uid: 1000,
            gid: 513,
            name: "user".to_owned(),
        }
    }
}

/// Attribute change being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Mode(u32),
    Owner { uid: u32, gid: u32 },
}

pub trait PermissionOracle: Send + Sync {
    /// May `user` open `path` for `access` (a mask of `R_OK`/`W_OK`/`X_OK`)?
    fn check(&self, user: &UserContext, path: &str, access: u32) -> bool;

    /// May `user` change the mode or owner of `path`?
    fn check_change(&self, user: &UserContext, path: &str, change: Change) -> bool;
}

/// Grants everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionOracle for AllowAll {
    fn check(&self, _user: &UserContext, _path: &str, _access: u32) -> bool {
        true
    }

    fn check_change(&self, _user: &UserContext, _path: &str, _change: Change) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    denied_access: u32,
    deny_change: bool,
}

/// Denies accesses under configured path prefixes, allows the rest.
#[derive(Debug, Default)]
pub struct PrefixRules {
    rules: RwLock<Vec<Rule>>,
}

impl PrefixRules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny the bits in `access` for every path starting with `prefix`.
    pub fn deny(&self, prefix: &str, access: u32) -> &Self {
        self.rules.write().push(Rule {
            prefix: prefix.to_owned(),
            denied_access: access,
            deny_change: false,
        });
        self
    }

    /// Deny `fchmod`/`fchown` for every path starting with `prefix`.
    pub fn deny_changes(&self, prefix: &str) -> &Self {
        self.rules.write().push(Rule {
            prefix: prefix.to_owned(),
            denied_access: 0,
            deny_change: true,
        });
        self
    }
}

impl PermissionOracle for PrefixRules {
    fn check(&self, _user: &UserContext, path: &str, access: u32) -> bool {
        !self
            .rules
            .read()
            .iter()
            .any(|r| path.starts_with(&r.prefix) && r.denied_access & access != 0)
    }

    fn check_change(&self, _user: &UserContext, path: &str, _change: Change) -> bool {
        !self
            .rules
            .read()
            .iter()
            .any(|r| path.starts_with(&r.prefix) && r.deny_change)
    }
}

/// `Ok` when `oracle` grants `access`, `EACCES` otherwise.
pub fn require(
    oracle: &dyn PermissionOracle,
    user: &UserContext,
    path: &str,
    access: u32,
) -> Result<(), Errno> {
    if oracle.check(user, path, access) {
        Ok(())
    } else {
        log::debug!("{}: access {access:#o} to {path} denied", user.name);
        Err(Errno::EACCES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_rules_deny_selected_bits() {
        let rules = PrefixRules::new();
        rules.deny("/dev/mem", W_OK).deny_changes("/dev/");
        let user = UserContext::default();
        assert!(rules.check(&user, "/dev/mem", R_OK));
        assert!(!rules.check(&user, "/dev/mem", R_OK | W_OK));
        assert!(rules.check(&user, "/dev/null", W_OK));
        assert!(!rules.check_change(&user, "/dev/st0", Change::Mode(0o600)));
        assert!(rules.check_change(&user, "/proc/self", Change::Mode(0o600)));
    }

    #[test]
    fn require_maps_to_eacces() {
        let rules = PrefixRules::new();
        rules.deny("/secret", R_OK);
        let user = UserContext::default();
        assert_eq!(require(&rules, &user, "/secret/x", R_OK), Err(Errno::EACCES));
        assert_eq!(require(&AllowAll, &user, "/secret/x", R_OK), Ok(()));
    }
}
