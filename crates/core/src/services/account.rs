//! Account subsystem boundary.
//!
//! Token issuance, registration and password storage belong to the
//! account subsystem. This service only decodes a credential it is
//! handed into a user row, which is all the chat core needs.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use kaiwa_common::{AppError, AppResult};
use kaiwa_db::{entities::user, repositories::UserRepository};
use serde::{Deserialize, Serialize};

/// JWT claims issued by the account subsystem.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user id.
    pub user_id: i64,
    /// Issued-at, epoch seconds.
    pub iat: i64,
    /// Expiry, epoch seconds.
    pub exp: i64,
}

/// Credential decoding service.
#[derive(Clone)]
pub struct AccountService {
    user_repo: UserRepository,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AccountService {
    /// Create a new account service with the shared HS256 secret.
    #[must_use]
    pub fn new(user_repo: UserRepository, jwt_secret: &str) -> Self {
        Self {
            user_repo,
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Decode an opaque credential into the user it identifies.
    ///
    /// Expired or malformed tokens, and tokens naming an unknown user,
    /// all map to [`AppError::Unauthorized`].
    pub async fn decode_credential(&self, raw: &str) -> AppResult<user::Model> {
        let data = jsonwebtoken::decode::<Claims>(raw, &self.decoding_key, &self.validation)
            .map_err(|_| AppError::Unauthorized)?;

        self.user_repo
            .find_by_id(data.claims.user_id)
            .await?
            .ok_or(AppError::Unauthorized)
    }
}
