use crate::models::MemberRole;
use crate::{Error, Result};

/// Keywords a viewer's query may not contain anywhere in its text.
pub const FORBIDDEN_FOR_VIEWER: [&str; 7] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE",
];

/// Substring match on the upper-cased query, so identifiers such as
/// `updated_at` are rejected as well.
pub fn check_viewer_query(role: MemberRole, sql: &str) -> Result<()> {
    if role != MemberRole::Viewer {
        return Ok(());
    }
    let upper = sql.to_uppercase();
    match FORBIDDEN_FOR_VIEWER.iter().find(|kw| upper.contains(*kw)) {
        Some(kw) => Err(Error::Forbidden(format!(
            "Viewers can only execute SELECT queries ({kw} is not allowed)"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_is_read_only() {
        assert!(check_viewer_query(MemberRole::Viewer, "select id from users").is_ok());
        for sql in [
            "insert into t values (1)",
            "Drop table t",
            "SELECT * FROM t; truncate t",
            "select updated_at from t",
        ] {
            let err = check_viewer_query(MemberRole::Viewer, sql).unwrap_err();
            assert!(matches!(err, Error::Forbidden(_)), "{sql}");
        }
    }

    #[test]
    fn other_roles_pass() {
        assert!(check_viewer_query(MemberRole::Admin, "DROP TABLE t").is_ok());
        assert!(check_viewer_query(MemberRole::Member, "DELETE FROM t").is_ok());
    }
}
