//! Connection parameters for the user state service.
//!
//! The parameters are owned by a [`SettingsHandle`], which is shared between all clients of a
//! load test. They can be changed while the test is running, either field by field through
//! [`SettingsHandle::update`] or wholesale through [`SettingsHandle::replace`]. Clients read the
//! current parameters for every request, so changes apply to the next call.

use std::fmt;
use std::sync::{Arc, RwLock};

use secrecy::{CloneableSecret, ExposeSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Newtype around `String` that protects against accidental logging of the password. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Password(String);

impl Password {
    /// Returns the password as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Password {
    fn from(str: &str) -> Self {
        Password(str.to_owned())
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for Password {}
impl SerializableSecret for Password {}
impl Zeroize for Password {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Connection parameters of the user state service.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// URL scheme, `http` or `https`.
    pub scheme: String,
    /// Host name or address of the service.
    pub host: String,
    /// Port of the service.
    pub port: u16,
    /// Name of the database holding the student state.
    ///
    /// Becomes the first path segment of every request.
    pub name: String,
    /// User for basic authentication. Authentication is disabled when empty.
    pub user: String,
    /// Password for basic authentication.
    pub password: SecretBox<Password>,
}

impl ConnectionSettings {
    /// Returns the base URL of the service, ending in a slash.
    pub fn base_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("{}://{}:{}/", self.scheme, self.host, self.port))?;
        if !self.name.is_empty() {
            let base = url.to_string();
            url.path_segments_mut()
                .map_err(|_| Error::CannotBeABase(base))?
                .pop_if_empty()
                .push(&self.name)
                .push("");
        }
        Ok(url)
    }

    /// Returns the credentials for basic authentication, if a user is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.user.is_empty() {
            return None;
        }
        Some((&self.user, self.password.expose_secret().as_str()))
    }

    /// Applies a form-style update to these settings.
    ///
    /// All fields of the update replace the current values, except for an empty password, which
    /// keeps the current password.
    pub fn apply(&mut self, update: ConnectionUpdate) {
        let ConnectionUpdate {
            host,
            port,
            name,
            user,
            password,
        } = update;

        if !password.is_empty() {
            self.password = SecretBox::new(Box::new(Password(password)));
        }
        self.host = host;
        self.port = port;
        self.name = name;
        self.user = user;
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            scheme: "http".to_owned(),
            host: "localhost".to_owned(),
            port: 3306,
            name: "wwc".to_owned(),
            user: String::new(),
            password: SecretBox::default(),
        }
    }
}

/// A partial update of [`ConnectionSettings`], as submitted by an operator.
///
/// Deserializes from the fields of a settings form. Applications embedding the load test pass it
/// to [`SettingsHandle::update`] while virtual users are running.
#[derive(Clone, Deserialize)]
pub struct ConnectionUpdate {
    /// New host.
    pub host: String,
    /// New port.
    pub port: u16,
    /// New database name.
    pub name: String,
    /// New user.
    pub user: String,
    /// New password. Empty keeps the current password.
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for ConnectionUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionUpdate")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Shared ownership of the current [`ConnectionSettings`].
///
/// Cloning the handle is cheap; all clones observe the same settings.
#[derive(Clone, Debug, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<ConnectionSettings>>,
}

impl SettingsHandle {
    /// Creates a handle owning the given settings.
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Returns a snapshot of the current settings.
    pub fn current(&self) -> ConnectionSettings {
        self.inner.read().unwrap().clone()
    }

    /// Applies a form-style update and returns the resulting settings.
    ///
    /// This is the entry point for operator-driven changes, such as a settings form served by an
    /// application embedding the load test. The `csm-loadtest` binary reloads its configuration
    /// file through [`replace`](Self::replace) instead. See [`ConnectionSettings::apply`].
    pub fn update(&self, update: ConnectionUpdate) -> ConnectionSettings {
        let mut settings = self.inner.write().unwrap();
        settings.apply(update);
        tracing::info!(
            host = %settings.host,
            port = settings.port,
            name = %settings.name,
            "connection settings updated"
        );
        settings.clone()
    }

    /// Replaces all settings, for example after reloading the configuration.
    pub fn replace(&self, settings: ConnectionSettings) {
        tracing::info!(
            host = %settings.host,
            port = settings.port,
            name = %settings.name,
            "connection settings replaced"
        );
        *self.inner.write().unwrap() = settings;
    }
}
