//! Authentication strategies for SSH connections.
//!
//! Each server record carries exactly one credential, so each connection
//! offers exactly one method:
//!
//! - [`PasswordAuth`]: Password-based authentication
//! - [`KeyAuth`]: In-memory private key authentication

mod key;
mod password;
mod traits;

pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use traits::AuthStrategy;

use crate::gateway::vault::Credential;

/// The single strategy matching a decrypted credential.
///
/// Takes ownership so the secret is wiped when the strategy is dropped.
pub fn strategy_for(credential: Credential) -> Box<dyn AuthStrategy> {
    match credential {
        Credential::Password(password) => Box::new(PasswordAuth::new(password)),
        Credential::PrivateKey { pem, passphrase } => Box::new(KeyAuth::new(pem, passphrase)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_matches_credential() {
        assert_eq!(strategy_for(Credential::password("pw")).name(), "password");
        assert_eq!(
            strategy_for(Credential::private_key("-----BEGIN", None)).name(),
            "key"
        );
    }
}
