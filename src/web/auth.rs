//! Bearer-token authentication and the permission checks used by the v1
//! surface. Tokens are HS256 JWTs whose payload carries the user's `name`;
//! the user row decides whether the bearer may do anything at all.

use crate::errors::*;
use crate::ids;
use crate::model::{self, UserRole};
use crate::store;

use actix_web::HttpRequest;
use diesel::sqlite::SqliteConnection;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

#[derive(Debug, Deserialize, Serialize)]
pub struct Claims {
    pub name: String,
}

/// Pulls the bearer token out of the `Authorization` header, if any.
pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    let header = req.headers().get("Authorization")?.to_str().ok()?;
    Some(header.trim_start_matches("Bearer ").to_owned())
}

/// Verifies the token and resolves it to a `Normal` user. Everything that
/// can go wrong here is a 401: a missing token, a bad signature, a payload
/// without `name`, an unknown user, a revoked user.
pub fn authenticate(
    conn: &mut SqliteConnection,
    secret: Option<&str>,
    token: Option<&str>,
) -> Result<model::User> {
    let secret = secret.ok_or_else(|| error::validation("server has no SECRET configured"))?;
    let token = token.ok_or_else(|| error::validation("JWT token is missing"))?;

    // Platform tokens are long-lived service credentials without an `exp`
    // claim, so expiry validation must be off.
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;

    let claims = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| error::validation("JWT token is invalid"))?
    .claims;

    match store::user_find(conn, &claims.name)? {
        Some(ref user) if user.is_normal() => Ok(user.clone()),
        _ => Err(error::validation("JWT token is invalid")),
    }
}

/// Job mutations are open to operators and to sibling nodes driving their
/// mirrored jobs.
pub fn require_job_mutation_role(user: &model::User) -> Result<()> {
    match user.parsed_role()? {
        UserRole::Operator | UserRole::Node => Ok(()),
        _ => Err(error::authorization("Unauthorized operation")),
    }
}

/// Task status reports are reserved for node identities.
pub fn require_node(user: &model::User) -> Result<()> {
    match user.parsed_role()? {
        UserRole::Node => Ok(()),
        _ => Err(error::authorization("Unauthorized operation")),
    }
}

/// Per-job access: the path id must look like a job id, the job must exist,
/// and the authenticated user must be its owner. Every failure collapses
/// into the same opaque 403.
pub fn check_job_permission(
    conn: &mut SqliteConnection,
    user: &model::User,
    job_id: &str,
) -> Result<model::Job> {
    if !ids::is_job_id(job_id) {
        return Err(error::authorization("Unauthorized operation"));
    }
    match store::job_find(conn, job_id)? {
        Some(ref job) if job.user_name == user.name => Ok(job.clone()),
        _ => Err(error::authorization("Unauthorized operation")),
    }
}

//
// Tests
//

#[cfg(test)]
mod tests {
    use crate::test_data;
    use crate::test_helpers;
    use crate::web::auth::*;

    use jsonwebtoken::{EncodingKey, Header};

    #[test]
    fn test_auth_authenticate() {
        let mut conn = test_helpers::connection();
        test_data::user::insert(&mut conn, "test_account_1", "Operator");

        let user = authenticate(
            &mut conn,
            Some(SECRET),
            Some(&token("test_account_1")),
        )
        .unwrap();
        assert_eq!("test_account_1", user.name);
        assert_eq!("Operator", user.role);
    }

    #[test]
    fn test_auth_authenticate_failures() {
        let mut conn = test_helpers::connection();
        test_data::user::insert(&mut conn, "test_account_1", "Operator");

        // Missing token.
        assert!(authenticate(&mut conn, Some(SECRET), None).is_err());
        // Wrong secret.
        assert!(authenticate(&mut conn, Some("other-secret"), Some(&token("test_account_1"))).is_err());
        // Unknown user.
        assert!(authenticate(&mut conn, Some(SECRET), Some(&token("ghost"))).is_err());
        // Garbage token.
        assert!(authenticate(&mut conn, Some(SECRET), Some("not.a.jwt")).is_err());
    }

    #[test]
    fn test_auth_revoked_user() {
        let mut conn = test_helpers::connection();
        let user = test_data::user::insert_with_status(&mut conn, "revoked_1", "Operator", "Revoked");
        assert!(authenticate(&mut conn, Some(SECRET), Some(&token(&user.name))).is_err());
    }

    #[test]
    fn test_auth_roles() {
        let mut conn = test_helpers::connection();
        let operator = test_data::user::insert(&mut conn, "op_1", "Operator");
        let node = test_data::user::insert(&mut conn, "node_1", "Node");
        let admin = test_data::user::insert(&mut conn, "admin_1", "Admin");

        assert!(require_job_mutation_role(&operator).is_ok());
        assert!(require_job_mutation_role(&node).is_ok());
        assert!(require_job_mutation_role(&admin).is_err());

        assert!(require_node(&node).is_ok());
        assert!(require_node(&operator).is_err());
    }

    #[test]
    fn test_auth_check_job_permission() {
        let mut conn = test_helpers::connection();
        let job = test_data::job::insert(&mut conn);
        let owner = test_data::user::insert(&mut conn, "user_0", "Operator");
        let other = test_data::user::insert(&mut conn, "user_1", "Operator");

        assert!(check_job_permission(&mut conn, &owner, &job.job_id).is_ok());
        assert!(check_job_permission(&mut conn, &other, &job.job_id).is_err());
        assert!(check_job_permission(&mut conn, &owner, "j_no_such_job").is_err());
        assert!(check_job_permission(&mut conn, &owner, "badly-shaped-id").is_err());
    }

    //
    // Private constants/functions
    //

    const SECRET: &str = "test-secret";

    fn token(name: &str) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            &Claims {
                name: name.to_owned(),
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }
}
