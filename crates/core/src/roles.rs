//! Well-known role name constants carried in the JWT `role` claim.

/// Administrative role. Admins generate without being charged.
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

/// Every role a token may carry.
pub const KNOWN_ROLES: &[&str] = &[ROLE_ADMIN, ROLE_USER];

pub fn is_known_role(role: &str) -> bool {
    KNOWN_ROLES.contains(&role)
}

/// Whether a role bypasses credit cost and balance checks.
pub fn is_unlimited(role: &str) -> bool {
    role == ROLE_ADMIN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admin_and_user_are_known() {
        assert!(is_known_role(ROLE_ADMIN));
        assert!(is_known_role(ROLE_USER));
        assert!(!is_known_role("superuser"));
        assert!(!is_known_role("Admin"));
        assert!(!is_known_role(""));
    }

    #[test]
    fn only_admin_is_unlimited() {
        assert!(is_unlimited(ROLE_ADMIN));
        assert!(!is_unlimited(ROLE_USER));
    }
}
