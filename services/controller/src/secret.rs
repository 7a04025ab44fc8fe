//! Shared authentication secret generation.

use rand::distr::Alphanumeric;
use rand::Rng;

/// Length of a generated secret, in characters.
pub const SECRET_LENGTH: usize = 4096;

/// Source of new shared secrets.
pub trait SecretSource: Send + Sync {
    fn generate(&self) -> String;
}

/// Random alphanumeric secrets from the thread-local generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSecret;

impl SecretSource for RandomSecret {
    fn generate(&self) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_LENGTH)
            .map(char::from)
            .collect()
    }
}

/// Always hands out the same secret.
#[derive(Debug, Clone)]
pub struct FixedSecret(pub String);

impl SecretSource for FixedSecret {
    fn generate(&self) -> String {
        self.0.clone()
    }
}
