use actix_web::{get, post, web, Error};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::ApiError;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::User;
use crate::types::{AuthResponse, LoginRequest, RegisterRequest, UserProfile};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

#[post("/register")]
pub async fn register(
    app_state: web::Data<AppState>,
    web::Json(request): web::Json<RegisterRequest>,
) -> Result<web::Json<AuthResponse>, Error> {
    let email = request.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("A valid email is required".to_string()).into());
    }
    if request.password.len() < 8 {
        return Err(
            ApiError::BadRequest("Password must be at least 8 characters".to_string()).into(),
        );
    }

    let password_hash = bcrypt::hash(&request.password, bcrypt::DEFAULT_COST).map_err(|e| {
        error!("Failed to hash password: {:?}", e);
        ApiError::Internal(e.into())
    })?;

    let user = User::create(&app_state.pool, &email, &password_hash, request.name.trim())
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ApiError::Conflict("An account with this email already exists")
            }
            _ => {
                error!("Failed to create user: {:?}", e);
                ApiError::from(e)
            }
        })?;

    info!("User registered: {}", user.email);

    let token = sign_jwt(&user, &app_state.config.jwt_secret)
        .map_err(|e| ApiError::Internal(e.into()))?;

    Ok(web::Json(AuthResponse {
        token,
        user: UserProfile::from(&user),
    }))
}

#[post("/login")]
pub async fn login(
    app_state: web::Data<AppState>,
    web::Json(request): web::Json<LoginRequest>,
) -> Result<web::Json<AuthResponse>, Error> {
    let email = request.email.trim().to_lowercase();

    // Same rejection for a missing user and a wrong password.
    let user = User::get_by_email(&app_state.pool, &email)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::Unauthorized)?;

    let valid = bcrypt::verify(&request.password, &user.password_hash).map_err(|e| {
        error!("Failed to verify password: {:?}", e);
        ApiError::Internal(e.into())
    })?;
    if !valid {
        return Err(ApiError::Unauthorized.into());
    }

    User::record_login(&app_state.pool, user.id)
        .await
        .map_err(ApiError::from)?;

    info!("User logged in: {}", user.email);

    let token = sign_jwt(&user, &app_state.config.jwt_secret)
        .map_err(|e| ApiError::Internal(e.into()))?;

    Ok(web::Json(AuthResponse {
        token,
        user: UserProfile::from(&user),
    }))
}

#[get("/me")]
pub async fn me(
    app_state: web::Data<AppState>,
    authenticated_user: AuthenticatedUser,
) -> Result<web::Json<UserProfile>, Error> {
    let user = User::get_by_id(&app_state.pool, authenticated_user.user_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound("User"))?;

    Ok(web::Json(UserProfile::from(&user)))
}

fn sign_jwt(user: &User, jwt_secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user.id.to_string(),
        exp: now + 3600 * 24 * 7, // Token expires after 1 week
        iat: now,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_ref()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    #[test]
    fn signed_token_round_trips_the_user_id() {
        let user = User::default();
        let token = sign_jwt(&user, "test-secret").unwrap();

        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret("test-secret".as_ref()),
            &Validation::default(),
        )
        .unwrap();

        assert_eq!(decoded.claims.sub, user.id.to_string());
        assert!(decoded.claims.exp > decoded.claims.iat);
    }

    #[test]
    fn token_rejects_a_different_secret() {
        let user = User::default();
        let token = sign_jwt(&user, "test-secret").unwrap();

        let result = decode::<Claims>(
            &token,
            &DecodingKey::from_secret("other-secret".as_ref()),
            &Validation::default(),
        );
        assert!(result.is_err());
    }
}
