//! core::os
//!
//! Identity of the calling process: user name and host name.
//!
//! These feed the lock owner record, the audit trail, and the author of
//! every Production commit, so they must be stable for the lifetime of a
//! session.

/// The current OS user name.
///
/// Resolved from the effective uid; `$USER` is the fallback when the
/// passwd lookup fails (e.g. restricted containers).
pub fn username() -> String {
    if let Ok(Some(user)) = nix::unistd::User::from_uid(nix::unistd::geteuid()) {
        return user.name;
    }
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

/// The local host name, `$HOSTNAME` or `"unknown-host"` as fallbacks.
pub fn hostname() -> String {
    if let Ok(name) = nix::unistd::gethostname() {
        if let Ok(name) = name.into_string() {
            if !name.is_empty() {
                return name;
            }
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_is_nonempty() {
        assert!(!username().is_empty());
    }

    #[test]
    fn hostname_is_nonempty() {
        assert!(!hostname().is_empty());
    }
}
