//! Credential checks used at login
//!
//! The strategy is chosen once from configuration. Password login verifies an
//! Argon2 hash. Signature login recovers the signer of the account's current
//! nonce and compares the derived address with the one bound to the account.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::Rng;
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, Secp256k1,
};
use sha3::{Digest, Keccak256};

use crate::{
    config::AuthMethod,
    error::{AppError, AppResult},
    models::user::{LoginRequest, User},
};

use super::tokens::{IssuedToken, TokenIssuer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authenticator {
    Password,
    Signature,
}

impl From<AuthMethod> for Authenticator {
    fn from(method: AuthMethod) -> Self {
        match method {
            AuthMethod::Password => Authenticator::Password,
            AuthMethod::Signature => Authenticator::Signature,
        }
    }
}

impl Authenticator {
    /// Check the request's credentials against the user record
    pub fn verify(&self, user: &User, request: &LoginRequest) -> AppResult<()> {
        match self {
            Authenticator::Password => verify_password(user, &request.credential),
            Authenticator::Signature => verify_signature(user, &request.address, &request.signature),
        }
    }

    /// Verify, then sign an access token for the user
    pub fn login(&self, user: &User, request: &LoginRequest, tokens: &TokenIssuer) -> AppResult<IssuedToken> {
        self.verify(user, request)?;
        tokens.issue(user)
    }

    /// Whether a successful login consumes the user's nonce
    pub fn consumes_nonce(&self) -> bool {
        matches!(self, Authenticator::Signature)
    }
}

fn verify_password(user: &User, password: &str) -> AppResult<()> {
    if user.password_hash.is_empty() {
        return Err(AppError::InvalidCredentials);
    }
    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::InvalidCredentials)
}

fn verify_signature(user: &User, claimed: &str, signature: &str) -> AppResult<()> {
    if user.nonce.is_empty() {
        return Err(AppError::InvalidSignature);
    }
    // only a wallet bound to the account may sign for it
    let bound = user.address.as_deref().ok_or(AppError::InvalidSignature)?;
    if !bound.eq_ignore_ascii_case(claimed) {
        return Err(AppError::InvalidSignature);
    }

    let signer = recover_address(user.nonce.as_bytes(), signature)?;
    if signer.eq_ignore_ascii_case(bound) {
        Ok(())
    } else {
        Err(AppError::InvalidSignature)
    }
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

/// Fresh challenge for signature login: 16 random bytes, hex encoded
pub fn generate_nonce() -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    hex::encode(bytes)
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&Keccak256::digest(data));
    digest
}

/// 0x-prefixed lowercase address of a public key
pub fn address_of(public_key: &PublicKey) -> String {
    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Recover the address that produced `signature` over keccak256(`message`).
///
/// The signature is 65 bytes of hex, r‖s‖v, with v in {0, 1, 27, 28}.
pub fn recover_address(message: &[u8], signature: &str) -> AppResult<String> {
    let raw = signature.strip_prefix("0x").unwrap_or(signature);
    let bytes = hex::decode(raw).map_err(|_| AppError::InvalidSignature)?;
    if bytes.len() != 65 {
        return Err(AppError::InvalidSignature);
    }

    let v = match bytes[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        _ => return Err(AppError::InvalidSignature),
    };
    let recovery_id = RecoveryId::from_i32(i32::from(v)).map_err(|_| AppError::InvalidSignature)?;
    let signature = RecoverableSignature::from_compact(&bytes[..64], recovery_id)
        .map_err(|_| AppError::InvalidSignature)?;

    let message = Message::from_digest(keccak256(message));
    let public_key = Secp256k1::verification_only()
        .recover_ecdsa(&message, &signature)
        .map_err(|_| AppError::InvalidSignature)?;

    Ok(address_of(&public_key))
}
