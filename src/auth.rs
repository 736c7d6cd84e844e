use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Cleartext password check against one shared server password. Any
/// user name is accepted; it becomes the connection's principal.
#[derive(Debug)]
pub struct AulasAuthSource {
    password: String,
}

impl AulasAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for AulasAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!("password login for user {:?}", login.user());
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
