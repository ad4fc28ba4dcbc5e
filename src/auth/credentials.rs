//! NTLM account credentials

use std::fmt;

/// Account used for every handshake a handler performs.
///
/// Built once and never mutated; handlers share it read-only across
/// concurrent handshakes.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    domain: String,
    workstation: String,
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        domain: impl Into<String>,
        workstation: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            workstation: workstation.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Split a `DOMAIN\user` login into its parts. A login without a
    /// backslash keeps an empty domain.
    pub fn from_login(
        login: &str,
        password: impl Into<String>,
        workstation: impl Into<String>,
    ) -> Self {
        let (domain, username) = login.split_once('\\').unwrap_or(("", login));
        Self::new(username, password, domain, workstation)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn workstation(&self) -> &str {
        &self.workstation
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("domain", &self.domain)
            .field("workstation", &self.workstation)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
