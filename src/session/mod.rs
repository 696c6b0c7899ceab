//! Explicit session passed to the realtime context
//!
//! The session carries the subject id presence is announced for and, when the
//! platform issued one, the bearer token used for the channel and the REST
//! snapshot. The token is decoded without signature verification: the server
//! verifies it, the client only reads its claims.

mod claims;

pub use claims::Claims;

use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use url::Url;

use crate::config::SessionConfig;
use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct Session {
    subject_id: String,
    token: Option<String>,
    claims: Option<Claims>,
}

impl Session {
    /// Session without a token
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            token: None,
            claims: None,
        }
    }

    /// Session whose subject comes from the token claims
    pub fn from_token(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let claims = read_claims(&token)?;

        let subject_id = claims
            .subject()
            .ok_or_else(|| AppError::Session("token carries no subject".to_string()))?
            .to_string();

        Ok(Self {
            subject_id,
            token: Some(token),
            claims: Some(claims),
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        match (&config.token, &config.user_id) {
            (Some(token), user_id) => {
                let claims = read_claims(token)?;
                let subject_id = claims
                    .subject()
                    .map(str::to_string)
                    .or_else(|| user_id.clone())
                    .ok_or_else(|| {
                        AppError::Session("token carries no subject and no user_id is set".to_string())
                    })?;

                Ok(Self {
                    subject_id,
                    token: Some(token.clone()),
                    claims: Some(claims),
                })
            }
            (None, Some(user_id)) if !user_id.is_empty() => Ok(Self::new(user_id.clone())),
            _ => Err(AppError::Session(
                "either session.token or session.user_id must be set".to_string(),
            )),
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn claims(&self) -> Option<&Claims> {
        self.claims.as_ref()
    }

    /// Channel URL with the token appended as the `token` query parameter
    pub fn realtime_url(&self, base: &str) -> Result<String> {
        let mut url = Url::parse(base)?;
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url.into())
    }
}

fn read_claims(token: &str) -> Result<Claims> {
    let header = decode_header(token)?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let claims = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?.claims;

    if claims.is_expired() {
        return Err(AppError::Session("session token has expired".to_string()));
    }

    Ok(claims)
}
