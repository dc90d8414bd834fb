use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rocket::http::Status;
use rocket::outcome::Outcome::{Error as Failure, Success};
use rocket::request::{self, FromRequest, Request};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::resp::problem::{problems, Problem};
use crate::role::Role;

pub static SESSION_COOKIE_NAME: &str = "session";

/// Claims of a session token issued by the external auth provider and
/// verified here with the shared secret. Resolving a token yields the
/// caller's identity and role; routes then check the role against their
/// allowed set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    #[serde(with = "unix_seconds")]
    iat: DateTime<Utc>,
    #[serde(with = "unix_seconds")]
    exp: DateTime<Utc>,
    #[serde(rename = "sub")]
    pub user: String,
    pub role: Role,
}

impl AuthSession {
    pub fn new(user: impl ToString, role: Role) -> AuthSession {
        let now = Utc::now();
        AuthSession {
            iat: now,
            exp: now + Duration::weeks(1),
            user: user.to_string(),
            role,
        }
    }

    pub fn encode_jwt(&self, secret: impl AsRef<[u8]>) -> jsonwebtoken::errors::Result<String> {
        let header = Header::new(Algorithm::HS256);
        encode(&header, &self, &EncodingKey::from_secret(secret.as_ref()))
    }

    pub fn decode_jwt(
        token: &str,
        secret: impl AsRef<[u8]>,
    ) -> jsonwebtoken::errors::Result<AuthSession> {
        decode::<AuthSession>(
            token,
            &DecodingKey::from_secret(secret.as_ref()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
    }
}

pub fn auth_problem(detail: impl ToString) -> Problem {
    problems::unauthenticated().message(detail).take()
}

fn token_from_request(req: &Request<'_>) -> Option<String> {
    req.headers()
        .get_one("Authorization")
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::to_owned)
        .or_else(|| {
            req.cookies()
                .get(SESSION_COOKIE_NAME)
                .map(|cookie| cookie.value().to_owned())
        })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthSession {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let config: &Config = req
            .rocket()
            .state()
            .expect("Config must be managed before mounting routes");

        let token = match token_from_request(req) {
            Some(it) => it,
            None => {
                return Failure((
                    Status::Unauthorized,
                    auth_problem("no session token in Authorization header or cookie"),
                ));
            }
        };

        match AuthSession::decode_jwt(&token, &config.session_secret) {
            Ok(session) => {
                tracing::debug!("resolved session for user: {}", session.user);
                Success(session)
            }
            Err(e) => {
                tracing::debug!("session token rejected: {}", e);
                Failure((
                    Status::Unauthorized,
                    auth_problem("session token is invalid or expired"),
                ))
            }
        }
    }
}

mod unix_seconds {
    //! Serialization of `DateTime<Utc>` as JWT numeric dates (seconds since
    //! the Unix epoch).
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(date.timestamp())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Utc.timestamp_opt(i64::deserialize(deserializer)?, 0)
            .single()
            .ok_or_else(|| serde::de::Error::custom("Invalid Unix timestamp value."))
    }
}

pub mod doc {
    use utoipa::openapi::security::*;

    #[derive(Clone, Copy)]
    pub struct SessionAuth;

    impl From<SessionAuth> for SecurityScheme {
        fn from(_: SessionAuth) -> SecurityScheme {
            let mut http = Http::new(HttpAuthScheme::Bearer);
            http.bearer_format = Some("JWT".to_string());
            SecurityScheme::Http(http)
        }
    }

    impl utoipa::Modify for SessionAuth {
        fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
            if let Some(components) = openapi.components.as_mut() {
                components.add_security_scheme("session", *self);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;

    const SECRET: &str = "test-secret";

    #[test]
    fn session_tokens_round_trip() {
        let mut now = Utc::now();
        now = now.round_subsecs(0);

        let session = AuthSession {
            iat: now,
            exp: now + Duration::weeks(1),
            user: "user_t1".to_string(),
            role: Role::Teacher,
        };

        let token = session.encode_jwt(SECRET).expect("encoding should work");
        let decoded = AuthSession::decode_jwt(&token, SECRET).expect("decoding should work");

        assert_eq!(decoded.iat, now);
        assert_eq!(decoded.exp, now + Duration::weeks(1));
        assert_eq!(decoded.user, "user_t1");
        assert_eq!(decoded.role, Role::Teacher);
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let token = AuthSession::new("user_s1", Role::Student)
            .encode_jwt("other-secret")
            .expect("encoding should work");

        assert!(AuthSession::decode_jwt(&token, SECRET).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let past = Utc::now() - Duration::weeks(2);
        let session = AuthSession {
            iat: past,
            exp: past + Duration::weeks(1),
            user: "user_s1".to_string(),
            role: Role::Student,
        };

        let token = session.encode_jwt(SECRET).expect("encoding should work");
        assert!(AuthSession::decode_jwt(&token, SECRET).is_err());
    }
}
