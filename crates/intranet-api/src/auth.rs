use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::info;

use intranet_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, Status, StatusMessage};
use intranet_types::models::Role;

use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::state::{AppState, run_blocking};

pub const MIN_PASSWORD_LEN: usize = 6;
const TOKEN_LIFETIME_DAYS: i64 = 30;

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let role: Role = req
        .role
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid role selected."))?;

    let id_number = req.id_number.trim().to_string();
    let email = req.email.trim().to_string();
    let password = req.password.trim();
    let full_name = req.full_name.as_deref().unwrap_or("").trim().to_string();

    // Validate input
    if id_number.is_empty() || email.is_empty() || password.is_empty() {
        return Err(ApiError::bad_request("All fields are required."));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email format."));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password must be at least 6 characters."));
    }

    let password_hash = hash_password(password)?;

    let uid = id_number.clone();
    let created = run_blocking(&state, move |db| {
        db.create_user(role.as_str(), &uid, &email, &password_hash, &full_name)
    })
    .await?;
    if !created {
        return Err(ApiError::Conflict(
            "Account with this ID or email already exists!".into(),
        ));
    }

    info!("Registered {} account {}", role, id_number);

    Ok((
        StatusCode::CREATED,
        Json(StatusMessage::ok("Account created successfully! You can now log in.")),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let role: Role = req
        .role
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid role."))?;

    let user_id = req.id.trim().to_string();
    let password = req.password.trim().to_string();
    if user_id.is_empty() || password.is_empty() {
        return Err(ApiError::bad_request("Please provide credentials."));
    }

    let uid = user_id.clone();
    let user = run_blocking(&state, move |db| db.get_user(role.as_str(), &uid))
        .await?
        .ok_or_else(invalid_credentials)?;

    match check_password(&password, &user.password) {
        PasswordCheck::Verified => {}
        PasswordCheck::LegacyMatch => {
            let new_hash = hash_password(&password)?;
            let uid = user_id.clone();
            run_blocking(&state, move |db| db.update_password(role.as_str(), &uid, &new_hash)).await?;
            info!("Upgraded legacy password for {} {}", role, user_id);
        }
        PasswordCheck::Mismatch => return Err(invalid_credentials()),
    }

    let token = create_token(&state.jwt_secret, &user.user_id, role, &user.full_name)?;

    info!("{} {} logged in", role, user.user_id);

    Ok(Json(LoginResponse {
        status: Status::Ok,
        token,
        user_id: user.user_id,
        role,
        full_name: user.full_name,
        email: user.email,
        profile_picture: user.profile_picture,
        redirect: role.dashboard_path().to_string(),
    }))
}

fn invalid_credentials() -> ApiError {
    ApiError::Unauthorized("Invalid credentials.".into())
}

#[derive(Debug, PartialEq, Eq)]
pub enum PasswordCheck {
    Verified,
    /// Stored value predates hashing and matched verbatim; caller should re-hash it.
    LegacyMatch,
    Mismatch,
}

/// Compare a candidate password against the stored value: an Argon2 PHC
/// string, or a legacy plaintext password.
pub fn check_password(candidate: &str, stored: &str) -> PasswordCheck {
    if stored.is_empty() {
        return PasswordCheck::Mismatch;
    }

    match PasswordHash::new(stored) {
        Ok(parsed) => {
            if Argon2::default().verify_password(candidate.as_bytes(), &parsed).is_ok() {
                PasswordCheck::Verified
            } else {
                PasswordCheck::Mismatch
            }
        }
        Err(_) if candidate == stored => PasswordCheck::LegacyMatch,
        Err(_) => PasswordCheck::Mismatch,
    }
}

/// Hash password with Argon2id
pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

pub fn create_token(secret: &str, user_id: &str, role: Role, full_name: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        full_name: full_name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn decode_token(secret: &str, token: &str) -> anyhow::Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Loose `local@domain.tld` shape check.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') || email.chars().any(char::is_whitespace) {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => {
            !host.is_empty() && !tld.is_empty() && !domain.starts_with('.') && !domain.contains("..")
        }
        None => false,
    }
}
