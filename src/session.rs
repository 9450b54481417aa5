//! Per-visitor identity for public posting: the anti-spam bucket key and
//! the stored poster hash.

use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use sha2::{Digest, Sha256};
use std::future::{ready, Ready};

use crate::gate::Visitor;

/// First 16 hex chars of SHA-256 over the client address.
pub fn poster_hash(addr: &str) -> String {
    let digest = Sha256::digest(addr.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Keyed on the hashed peer address. Client-supplied values such as
/// cookies are ignored: a client could mint a fresh one per request.
pub fn visitor_for(req: &HttpRequest) -> Visitor {
    let addr = req
        .peer_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let hash = poster_hash(&addr);
    Visitor::new(format!("addr:{hash}")).with_poster_hash(hash)
}

/// Extractor wrapper; never fails.
pub struct Session(pub Visitor);

impl FromRequest for Session {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(Session(visitor_for(req))))
    }
}
