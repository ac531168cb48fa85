//! Referral code generation and validation.

use rand::Rng;
use rusqlite::Connection;
use verba_types::{UserId, REFERRAL_CODE_LEN};

use verba_db::queries::users;

use crate::{ReferralError, Result};

/// Confusable characters (0/O, 1/I) are left out; codes end up in
/// hand-typed links.
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const MAX_ATTEMPTS: usize = 10;

/// Generate a random code. Uniqueness is enforced by the database, not
/// here.
pub fn generate<R: Rng>(rng: &mut R) -> String {
    (0..REFERRAL_CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// The user's referral code, generating and storing one on first use.
/// Collisions retry with a fresh code a bounded number of times.
pub fn ensure_code(conn: &Connection, user_id: &str) -> Result<String> {
    let user = match users::get(conn, user_id) {
        Ok(user) => user,
        Err(verba_db::DbError::NotFound(_)) => {
            return Err(ReferralError::UserNotFound(user_id.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    if let Some(code) = user.referral_code {
        return Ok(code);
    }

    let mut rng = rand::thread_rng();
    for _ in 0..MAX_ATTEMPTS {
        let code = generate(&mut rng);
        match users::set_referral_code(conn, user_id, &code) {
            Ok(()) => return Ok(code),
            Err(e) if e.is_constraint_violation() => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ReferralError::CodeExhausted)
}

/// Resolve a code to its owner, if it exists. Unknown codes are not an
/// error; callers skip the bonus rather than fail.
pub fn validate(conn: &Connection, code: &str) -> Result<Option<UserId>> {
    Ok(users::get_by_referral_code(conn, code)?.map(|user| user.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use verba_types::access::Role;

    fn test_db() -> Connection {
        let conn = verba_db::open_memory().expect("open test db");
        users::insert(&conn, "u1", "a@example.com", Role::User, None, None, 0).expect("user");
        conn
    }

    #[test]
    fn test_generate_shape() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let code = generate(&mut rng);
            assert_eq!(code.len(), REFERRAL_CODE_LEN);
            assert!(code.bytes().all(|b| ALPHABET.contains(&b)));
            assert!(!code.contains('0') && !code.contains('O'));
            assert!(!code.contains('1') && !code.contains('I'));
        }
    }

    #[test]
    fn test_ensure_code_is_stable() {
        let conn = test_db();
        let first = ensure_code(&conn, "u1").expect("first");
        let second = ensure_code(&conn, "u1").expect("second");
        assert_eq!(first, second, "lazy generation happens once");
    }

    #[test]
    fn test_ensure_code_unknown_user() {
        let conn = test_db();
        assert!(matches!(
            ensure_code(&conn, "ghost"),
            Err(ReferralError::UserNotFound(_))
        ));
    }

    #[test]
    fn test_validate() {
        let conn = test_db();
        let code = ensure_code(&conn, "u1").expect("code");
        assert_eq!(validate(&conn, &code).expect("validate"), Some("u1".to_string()));
        assert_eq!(validate(&conn, "ZZZZZZZZ22").expect("validate"), None);
    }
}
