//! Identity seam.
//!
//! Credentials are verified outside this service. A provider turns whatever the
//! caller presented into an [`Identity`]; the ledger trusts that value as-is.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ApiError;
use crate::models::is_valid_id;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Faculty,
    Staff,
    Admin,
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "faculty" => Ok(Role::Faculty),
            "staff" => Ok(Role::Staff),
            "admin" => Ok(Role::Admin),
            _ => Err(AuthError::UnknownRole(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub actor_id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(actor_id: impl Into<String>, role: Role) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing credential")]
    Missing,

    #[error("Malformed actor id")]
    MalformedActor,

    #[error("Unknown role: {0}")]
    UnknownRole(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, headers: &HeaderMap) -> Result<Identity, AuthError>;
}

/// Reads the identity the portal's auth gateway attached after verifying the
/// caller. Only deploy behind a gateway that strips these headers from client
/// traffic.
#[derive(Debug, Default, Clone)]
pub struct TrustedHeaderProvider;

#[async_trait]
impl IdentityProvider for TrustedHeaderProvider {
    async fn verify(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let actor_id = header(headers, ACTOR_ID_HEADER).ok_or(AuthError::Missing)?;
        if !is_valid_id(actor_id) {
            return Err(AuthError::MalformedActor);
        }
        let role: Role = header(headers, ACTOR_ROLE_HEADER).ok_or(AuthError::Missing)?.parse()?;

        Ok(Identity::new(actor_id, role))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Extractor for handlers that need a verified caller.
pub struct Authenticated(pub Identity);

impl<S> FromRequestParts<S> for Authenticated
where
    Arc<dyn IdentityProvider>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let provider = Arc::<dyn IdentityProvider>::from_ref(state);
        match provider.verify(&parts.headers).await {
            Ok(identity) => Ok(Authenticated(identity)),
            Err(e) => {
                info!("Rejected {} {}: {}", parts.method, parts.uri.path(), e);
                Err(e.into())
            }
        }
    }
}
