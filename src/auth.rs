use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// One shared password for every login. The login's user name is taken as
/// the caller identity after authentication.
#[derive(Debug)]
pub struct TandemAuthSource {
    password: String,
}

impl TandemAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for TandemAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(user = login.user().unwrap_or(""), "password requested");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
