//! Per-user network definitions.

use crate::crypt::{Crypt, CryptError};

/// A row from `user_networks`: the settings for one upstream IRC network.
///
/// `sasl_pass` is private: it holds either legacy plaintext or the
/// encrypted serialized form, and all access goes through the accessors so
/// the plaintext-vs-encrypted distinction is applied in exactly one place.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Network {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: bool,
    pub bind_host: Option<String>,
    pub nick: Option<String>,
    pub username: Option<String>,
    pub realname: Option<String>,
    pub password: Option<String>,
    pub sasl_account: Option<String>,
    sasl_pass: Option<String>,
}

impl Network {
    /// The SASL password, decrypted when needed.
    ///
    /// Passwords not containing the `:` separator were put in as plaintext
    /// by some other means; those are returned verbatim.
    pub fn sasl_pass(&self, crypt: &Crypt) -> Result<Option<String>, CryptError> {
        self.sasl_pass
            .as_deref()
            .map(|stored| crypt.maybe_decrypt(stored))
            .transpose()
    }

    /// Set the SASL password. Always stored encrypted.
    pub fn set_sasl_pass(&mut self, crypt: &Crypt, value: &str) -> Result<(), CryptError> {
        self.sasl_pass = Some(crypt.encrypt(value)?);
        Ok(())
    }

    /// The raw stored value, for persistence only.
    pub(crate) fn sasl_pass_raw(&self) -> Option<&str> {
        self.sasl_pass.as_deref()
    }
}
