use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use csm_types::{BlockData, UsageKey};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{BlockStates, Error, Result, SettingsHandle, UserStateClient};

const USER_AGENT: &str = concat!("csm-client/", env!("CARGO_PKG_VERSION"));

/// Request body of the `get_many` endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetManyRequest {
    /// The blocks to read.
    pub keys: BTreeSet<UsageKey>,
}

/// Response body of the `get_many` endpoint.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GetManyResponse {
    /// The stored blocks. Blocks without state are omitted.
    pub blocks: Vec<BlockState>,
}

/// The stored state of a single block.
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockState {
    /// The block this state belongs to.
    pub usage_key: UsageKey,
    /// The stored fields.
    pub state: BlockData,
}

/// Request body of the `set_many` endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct SetManyRequest {
    /// The blocks to write, mapped to the fields to merge into their state.
    pub blocks: BTreeMap<UsageKey, BlockData>,
}

/// Builder to create an [`HttpUserStateClient`].
#[must_use]
#[derive(Debug)]
pub struct HttpClientBuilder {
    settings: SettingsHandle,
    reqwest_builder: reqwest::ClientBuilder,
}

impl HttpClientBuilder {
    /// Sets both the connect and the total request timeout.
    ///
    /// For more fine-grained configuration, use [`Self::configure_reqwest`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.reqwest_builder = self
            .reqwest_builder
            .connect_timeout(timeout)
            .timeout(timeout);
        self
    }

    /// Calls the closure with the underlying [`reqwest::ClientBuilder`].
    pub fn configure_reqwest<F>(mut self, closure: F) -> Self
    where
        F: FnOnce(reqwest::ClientBuilder) -> reqwest::ClientBuilder,
    {
        self.reqwest_builder = closure(self.reqwest_builder);
        self
    }

    /// Returns an [`HttpUserStateClient`] that uses this configuration.
    ///
    /// # Errors
    ///
    /// Fails if the [`reqwest::Client`] cannot be built. Invalid connection settings are only
    /// detected when a request is made, since the settings may change at runtime.
    pub fn build(self) -> Result<HttpUserStateClient> {
        Ok(HttpUserStateClient {
            reqwest: self.reqwest_builder.build()?,
            settings: self.settings,
        })
    }
}

/// A [`UserStateClient`] talking JSON over HTTP to the user state service.
///
/// The service exposes two endpoints relative to the base URL of the current
/// [`ConnectionSettings`](crate::ConnectionSettings):
///
/// - `POST users/{username}/state/get_many` with a [`GetManyRequest`], returning a
///   [`GetManyResponse`]
/// - `POST users/{username}/state/set_many` with a [`SetManyRequest`]
///
/// Any non-success status is returned as [`Error::Reqwest`].
#[derive(Debug, Clone)]
pub struct HttpUserStateClient {
    reqwest: reqwest::Client,
    settings: SettingsHandle,
}

impl HttpUserStateClient {
    /// Creates a new [`HttpClientBuilder`] reading connection parameters from `settings`.
    pub fn builder(settings: SettingsHandle) -> HttpClientBuilder {
        let reqwest_builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(5))
            .user_agent(USER_AGENT);

        HttpClientBuilder {
            settings,
            reqwest_builder,
        }
    }

    fn endpoint(&self, username: &str, operation: &str) -> Result<(Url, Option<(String, String)>)> {
        let settings = self.settings.current();
        let mut url = settings.base_url()?;
        let base = url.to_string();
        url.path_segments_mut()
            .map_err(|_| Error::CannotBeABase(base))?
            .pop_if_empty()
            .extend(["users", username, "state", operation]);

        let credentials = settings
            .credentials()
            .map(|(user, password)| (user.to_owned(), password.to_owned()));
        Ok((url, credentials))
    }

    fn post(&self, username: &str, operation: &str) -> Result<reqwest::RequestBuilder> {
        let (url, credentials) = self.endpoint(username, operation)?;
        tracing::trace!(%url, "sending request");

        let mut builder = self.reqwest.post(url);
        if let Some((user, password)) = credentials {
            builder = builder.basic_auth(user, Some(password));
        }
        Ok(builder)
    }
}

#[async_trait::async_trait]
impl UserStateClient for HttpUserStateClient {
    async fn get_many(&self, username: &str, keys: &BTreeSet<UsageKey>) -> Result<BlockStates> {
        let body = GetManyRequest { keys: keys.clone() };
        let response: GetManyResponse = self
            .post(username, "get_many")?
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .blocks
            .into_iter()
            .map(|block| (block.usage_key, block.state))
            .collect())
    }

    async fn set_many(&self, username: &str, blocks: BTreeMap<UsageKey, BlockData>) -> Result<()> {
        self.post(username, "set_many")?
            .json(&SetManyRequest { blocks })
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretBox;

    use super::*;
    use crate::ConnectionSettings;

    fn client(settings: ConnectionSettings) -> HttpUserStateClient {
        HttpUserStateClient::builder(SettingsHandle::new(settings))
            .build()
            .unwrap()
    }

    #[test]
    fn endpoint_from_settings() {
        let client = client(ConnectionSettings::default());
        let (url, credentials) = client.endpoint("learner", "get_many").unwrap();

        assert_eq!(
            url.as_str(),
            "http://localhost:3306/wwc/users/learner/state/get_many"
        );
        assert!(credentials.is_none());
    }

    #[test]
    fn endpoint_encodes_username() {
        let client = client(ConnectionSettings::default());
        let (url, _) = client.endpoint("a b/c", "set_many").unwrap();

        assert_eq!(
            url.as_str(),
            "http://localhost:3306/wwc/users/a%20b%2Fc/state/set_many"
        );
    }

    #[test]
    fn endpoint_follows_settings_changes() {
        let settings = SettingsHandle::default();
        let client = HttpUserStateClient::builder(settings.clone())
            .build()
            .unwrap();

        settings.replace(ConnectionSettings {
            host: "example.com".into(),
            port: 8080,
            name: String::new(),
            user: "admin".into(),
            password: SecretBox::new(Box::new("secret".into())),
            ..Default::default()
        });

        let (url, credentials) = client.endpoint("learner", "get_many").unwrap();
        assert_eq!(
            url.as_str(),
            "http://example.com:8080/users/learner/state/get_many"
        );
        assert_eq!(credentials, Some(("admin".into(), "secret".into())));
    }

    #[test]
    fn set_many_body_uses_key_strings() {
        let key: UsageKey = "block-v1:org+course+run+type@html+block@3"
            .parse()
            .unwrap();
        let body = SetManyRequest {
            blocks: BTreeMap::from([(key, BlockData::from([("0".into(), "x".into())]))]),
        };

        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"blocks":{"block-v1:org+course+run+type@html+block@3":{"0":"x"}}}"#
        );
    }
}
