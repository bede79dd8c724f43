use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Error;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct OAuthToken {
	pub access_token: String,
	pub token_type: String,
	pub refresh_token: String,
	pub expiry: Option<DateTime<Utc>>,
	pub scope: String,
}

impl OAuthToken {
	/// Expired, or about to within `margin`
	#[must_use]
	pub fn expires_within(&self, margin: Duration) -> bool {
		self.access_token.is_empty()
			|| self
				.expiry
				.is_some_and(|expiry| expiry <= Utc::now() + margin)
	}

	pub(crate) fn header_value(&self) -> String {
		let token_type = if self.token_type.is_empty() {
			"Bearer"
		} else {
			&self.token_type
		};

		format!("{token_type} {}", self.access_token)
	}
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ClientCredentials {
	pub client_id: String,
	pub client_secret: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
	access_token: String,
	token_type: String,
	expires_in: i64,
	#[serde(default)]
	scope: String,
}

/// Exchanges the refresh token of `token` for a fresh access token.
///
/// Obtaining the first token needs the interactive consent flow, which lives outside
/// this crate; without a refresh token this fails with [`Error::Unauthenticated`].
pub async fn refresh(
	client: &reqwest::Client,
	credentials: &ClientCredentials,
	token: &OAuthToken,
) -> Result<OAuthToken, Error> {
	if token.refresh_token.is_empty() {
		return Err(Error::Unauthenticated);
	}

	let response = client
		.post(TOKEN_URL)
		.form(&[
			("client_id", credentials.client_id.as_str()),
			("client_secret", credentials.client_secret.as_str()),
			("refresh_token", token.refresh_token.as_str()),
			("grant_type", "refresh_token"),
		])
		.send()
		.await
		.and_then(reqwest::Response::error_for_status)?
		.json::<RefreshResponse>()
		.await?;

	debug!(expires_in = response.expires_in, "Refreshed access token;");

	Ok(OAuthToken {
		access_token: response.access_token,
		token_type: response.token_type,
		refresh_token: token.refresh_token.clone(),
		expiry: Some(Utc::now() + Duration::seconds(response.expires_in)),
		scope: response.scope,
	})
}
