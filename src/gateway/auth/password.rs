//! Password-based SSH authentication.

use async_trait::async_trait;
use russh::client;
use zeroize::Zeroizing;

use crate::gateway::error::{SessionError, classify_ssh_error};
use crate::gateway::session::handler::GatewayClientHandler;

use super::traits::AuthStrategy;

/// Password authentication strategy.
///
/// The password is wiped from memory when the strategy is dropped.
pub struct PasswordAuth {
    password: Zeroizing<String>,
}

impl PasswordAuth {
    pub fn new(password: Zeroizing<String>) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<GatewayClientHandler>,
        username: &str,
    ) -> Result<bool, SessionError> {
        let result = handle
            .authenticate_password(username, self.password.as_str())
            .await
            .map_err(|e| classify_ssh_error("Password authentication", &e))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "password"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_auth_name() {
        let auth = PasswordAuth::new(Zeroizing::new("secret".to_string()));
        assert_eq!(auth.name(), "password");
    }

    #[test]
    fn test_password_auth_holds_password() {
        let auth = PasswordAuth::new(Zeroizing::new("my-password".to_string()));
        assert_eq!(auth.password.as_str(), "my-password");
    }
}
