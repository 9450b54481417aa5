use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::board::Moderator;
use crate::models::Capcode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Moderator,
    Admin,
    Dev,
}

impl Role {
    pub fn capcode(&self) -> Capcode {
        match self {
            Role::Moderator => Capcode::Mod,
            Role::Admin => Capcode::Admin,
            Role::Dev => Capcode::Dev,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub roles: Vec<Role>,
}

impl Claims {
    /// Badge for posts made under these claims; admin outranks mod outranks dev.
    pub fn moderator(&self) -> Option<Moderator> {
        [Role::Admin, Role::Moderator, Role::Dev]
            .into_iter()
            .find(|r| self.roles.contains(r))
            .map(|r| Moderator { capcode: r.capcode() })
    }
}

fn jwt_secret() -> Result<String, jsonwebtoken::errors::Error> {
    env::var("JWT_SECRET").map_err(|_| ErrorKind::InvalidKeyFormat.into())
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret = jwt_secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            return match decode_jwt(bearer.token()) {
                Ok(claims) => ready(Ok(Auth(claims))),
                Err(e) => {
                    tracing::debug!(error = %e, "rejected bearer token");
                    ready(Err(actix_web::error::ErrorUnauthorized("Invalid JWT")))
                }
            };
        }
        ready(Err(actix_web::error::ErrorUnauthorized("Authorization required")))
    }
}

/// Extractor for moderator-only handlers: a valid token carrying at least
/// one privileged role.
pub struct ModAuth {
    pub claims: Claims,
    pub moderator: Moderator,
}

impl FromRequest for ModAuth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let auth = match Auth::from_request(req, pl).into_inner() {
            Ok(a) => a,
            Err(e) => return ready(Err(e)),
        };
        match auth.0.moderator() {
            Some(moderator) => ready(Ok(ModAuth { claims: auth.0, moderator })),
            None => ready(Err(actix_web::error::ErrorForbidden("Insufficient role"))),
        }
    }
}

/// Mint a moderator token valid for `ttl`.
pub fn create_jwt(subject: &str, roles: Vec<Role>, ttl: chrono::Duration) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = jwt_secret()?;
    let expiration = chrono::Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| jsonwebtoken::errors::Error::from(ErrorKind::ExpiredSignature))?
        .timestamp() as usize;
    let claims = Claims { sub: subject.to_string(), exp: expiration, roles };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}
