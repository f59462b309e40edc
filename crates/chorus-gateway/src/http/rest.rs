//! `reqwest` implementation of [`GatewayHttp`]

use async_trait::async_trait;
use chorus_common::{AuthConfig, HttpConfig};
use chorus_core::{Message, Snowflake, User};
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{GatewayBot, GatewayHttp, HttpError};
use crate::events::payloads::MessagePayload;

/// REST client for the few endpoints the gateway needs
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    api_base: String,
    authorization: String,
    user_account: bool,
}

impl RestClient {
    /// Build a client from the HTTP and auth configuration
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built
    pub fn new(http: &HttpConfig, auth: &AuthConfig) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(http.timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            client,
            api_base: http.api_base.trim_end_matches('/').to_string(),
            authorization: auth.authorization(),
            user_account: auth.user_account,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HttpError> {
        let response = self
            .client
            .get(self.url(path))
            .header(header::AUTHORIZATION, &self.authorization)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(HttpError::Unauthorized);
        }

        let body = response.text().await?;
        if !status.is_success() {
            tracing::warn!(path = %path, status = %status, "HTTP request failed");
            return Err(HttpError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("api_base", &self.api_base)
            .field("user_account", &self.user_account)
            .finish_non_exhaustive()
    }
}

/// `GET /gateway` only carries the URL
#[derive(Deserialize)]
struct GatewayUrl {
    url: String,
}

#[async_trait]
impl GatewayHttp for RestClient {
    async fn gateway_bot(&self) -> Result<GatewayBot, HttpError> {
        if self.user_account {
            let gateway: GatewayUrl = self.get("/gateway").await?;
            return Ok(GatewayBot {
                url: gateway.url,
                shards: 1,
                session_start_limit: None,
            });
        }

        let bot: GatewayBot = self.get("/gateway/bot").await?;
        tracing::debug!(url = %bot.url, shards = bot.shards, "Gateway info fetched");
        Ok(bot)
    }

    async fn fetch_user(&self, user_id: Snowflake) -> Result<User, HttpError> {
        self.get(&format!("/users/{user_id}")).await
    }

    async fn fetch_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> Result<(Message, User), HttpError> {
        let payload: MessagePayload = self
            .get(&format!("/channels/{channel_id}/messages/{message_id}"))
            .await?;
        Ok(payload.into_parts())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config(user_account: bool) -> (HttpConfig, AuthConfig) {
        (
            HttpConfig {
                api_base: "https://api.example/v6/".to_string(),
                timeout: Duration::from_secs(5),
            },
            AuthConfig {
                token: "secret".to_string(),
                user_account,
            },
        )
    }

    #[test]
    fn test_bot_authorization_and_base() {
        let (http, auth) = config(false);
        let client = RestClient::new(&http, &auth).unwrap();

        assert_eq!(client.authorization, "Bot secret");
        assert_eq!(client.url("/gateway/bot"), "https://api.example/v6/gateway/bot");
    }

    #[test]
    fn test_debug_hides_token() {
        let (http, auth) = config(true);
        let client = RestClient::new(&http, &auth).unwrap();

        assert_eq!(client.authorization, "secret");
        assert!(!format!("{client:?}").contains("secret"));
    }
}
