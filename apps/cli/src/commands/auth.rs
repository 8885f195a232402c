//! Team password hashing and verification (argon2id, PHC strings).

use anyhow::{anyhow, Result};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

pub fn hash_password(password: &str) -> Result<String> {
	let salt = SaltString::generate(&mut OsRng);
	Argon2::default()
		.hash_password(password.as_bytes(), &salt)
		.map(|hash| hash.to_string())
		.map_err(|e| anyhow!("failed to hash password: {e}"))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
	let parsed = PasswordHash::new(hash).map_err(|e| anyhow!("corrupt team password hash: {e}"))?;
	Ok(Argon2::default()
		.verify_password(password.as_bytes(), &parsed)
		.is_ok())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hash_and_verify_round_trip() {
		let hash = hash_password("hunter2").unwrap();
		assert!(hash.starts_with("$argon2"));
		assert!(verify_password("hunter2", &hash).unwrap());
		assert!(!verify_password("hunter3", &hash).unwrap());
	}
}
