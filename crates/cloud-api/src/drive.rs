//! Google Drive backed store: objects are Drive files, changes come from the Drive
//! Activity history.

use std::{collections::HashMap, path::Path};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, instrument};

use crate::{
	auth::{self, ClientCredentials, OAuthToken},
	Error, ObjectMetadata, RemoteChangeRecord, RemoteObject, RemoteStore,
};

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const ACTIVITY_URL: &str = "https://driveactivity.googleapis.com/v2/activity:query";

const FILE_FIELDS: &str =
	"id, name, mimeType, parents, createdTime, modifiedTime, appProperties, properties";

pub struct RequestConfig {
	pub client: reqwest::Client,
	pub auth_token: OAuthToken,
}

trait WithAuth {
	fn with_auth(self, token: &OAuthToken) -> Self;
}

impl WithAuth for reqwest::RequestBuilder {
	fn with_auth(self, token: &OAuthToken) -> Self {
		self.header("authorization", token.header_value())
	}
}

fn check_status(res: reqwest::Response, id: Option<&str>) -> Result<reqwest::Response, Error> {
	match res.status() {
		reqwest::StatusCode::NOT_FOUND => Err(Error::NotFound(id.unwrap_or_default().to_string())),
		reqwest::StatusCode::UNAUTHORIZED => Err(Error::Unauthenticated),
		_ => res.error_for_status().map_err(Into::into),
	}
}

async fn into_json<T: serde::de::DeserializeOwned>(
	res: Result<reqwest::Response, reqwest::Error>,
	id: Option<&str>,
) -> Result<T, Error> {
	check_status(res?, id)?.json().await.map_err(Into::into)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileBody<'a> {
	name: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	parents: Option<[&'a str; 1]>,
	#[serde(skip_serializing_if = "Option::is_none")]
	mime_type: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	modified_time: Option<DateTime<Utc>>,
	app_properties: &'a HashMap<String, String>,
	/// Duplicated so the values are also visible to other applications
	properties: &'a HashMap<String, String>,
}

impl<'a> FileBody<'a> {
	fn new(metadata: &'a ObjectMetadata, with_parent: bool) -> Self {
		Self {
			name: &metadata.name,
			parents: metadata
				.parent_id
				.as_deref()
				.filter(|_| with_parent)
				.map(|parent| [parent]),
			mime_type: metadata.mime_type.as_deref(),
			modified_time: metadata.modified_time,
			app_properties: &metadata.app_properties,
			properties: &metadata.app_properties,
		}
	}
}

pub mod files {
	use super::*;

	pub use create::exec as create;
	pub mod create {
		use super::*;

		pub async fn exec(config: &RequestConfig, metadata: &ObjectMetadata) -> Result<RemoteObject, Error> {
			into_json(
				config
					.client
					.post(FILES_URL)
					.query(&[("fields", FILE_FIELDS)])
					.with_auth(&config.auth_token)
					.json(&FileBody::new(metadata, true))
					.send()
					.await,
				None,
			)
			.await
		}
	}

	pub use update::exec as update;
	pub mod update {
		use super::*;

		pub async fn exec(
			config: &RequestConfig,
			id: &str,
			metadata: &ObjectMetadata,
		) -> Result<RemoteObject, Error> {
			into_json(
				config
					.client
					.patch(format!("{FILES_URL}/{id}"))
					.query(&[("fields", FILE_FIELDS)])
					.with_auth(&config.auth_token)
					.json(&FileBody::new(metadata, false))
					.send()
					.await,
				Some(id),
			)
			.await
		}
	}

	pub use upload::exec as upload;
	pub mod upload {
		use super::*;

		/// Replaces the content of an existing file
		pub async fn exec(config: &RequestConfig, id: &str, content: Vec<u8>) -> Result<RemoteObject, Error> {
			into_json(
				config
					.client
					.patch(format!("{UPLOAD_URL}/{id}"))
					.query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
					.with_auth(&config.auth_token)
					.body(content)
					.send()
					.await,
				Some(id),
			)
			.await
		}
	}

	pub use delete::exec as delete;
	pub mod delete {
		use super::*;

		pub async fn exec(config: &RequestConfig, id: &str) -> Result<(), Error> {
			let res = config
				.client
				.delete(format!("{FILES_URL}/{id}"))
				.with_auth(&config.auth_token)
				.send()
				.await?;

			check_status(res, Some(id))?;

			Ok(())
		}
	}

	pub use get::exec as get;
	pub mod get {
		use super::*;

		pub async fn exec(config: &RequestConfig, id: &str) -> Result<RemoteObject, Error> {
			into_json(
				config
					.client
					.get(format!("{FILES_URL}/{id}"))
					.query(&[("fields", FILE_FIELDS)])
					.with_auth(&config.auth_token)
					.send()
					.await,
				Some(id),
			)
			.await
		}
	}

	pub use download::exec as download;
	pub mod download {
		use super::*;

		pub async fn exec(config: &RequestConfig, id: &str) -> Result<Vec<u8>, Error> {
			let res = config
				.client
				.get(format!("{FILES_URL}/{id}"))
				.query(&[("alt", "media")])
				.with_auth(&config.auth_token)
				.send()
				.await?;

			Ok(check_status(res, Some(id))?.bytes().await?.to_vec())
		}
	}

	pub use list::exec as list;
	pub mod list {
		use super::*;

		#[derive(serde::Deserialize)]
		pub struct Response {
			#[serde(default)]
			pub files: Vec<RemoteObject>,
		}

		/// Files matching a Drive search query
		pub async fn exec(config: &RequestConfig, query: &str) -> Result<Response, Error> {
			let fields = format!("files({FILE_FIELDS})");

			into_json(
				config
					.client
					.get(FILES_URL)
					.query(&[("q", query), ("fields", fields.as_str())])
					.with_auth(&config.auth_token)
					.send()
					.await,
				None,
			)
			.await
		}
	}
}

pub mod activity {
	use serde::Deserialize;
	use serde_json::{json, Map, Value};

	use super::*;
	use crate::ObjectAction;

	pub use query::exec as query;
	pub mod query {
		use super::*;

		#[derive(Deserialize)]
		#[serde(rename_all = "camelCase")]
		pub struct Response {
			#[serde(default)]
			pub activities: Vec<Activity>,
			pub next_page_token: Option<String>,
		}

		#[derive(Deserialize)]
		#[serde(rename_all = "camelCase")]
		pub struct Activity {
			/// Single key object naming the action, like `{"edit": {}}`
			#[serde(default)]
			pub primary_action_detail: Map<String, Value>,
			#[serde(default)]
			pub targets: Vec<Target>,
			pub timestamp: Option<DateTime<Utc>>,
			pub time_range: Option<TimeRange>,
		}

		#[derive(Deserialize)]
		#[serde(rename_all = "camelCase")]
		pub struct Target {
			pub drive_item: Option<DriveItem>,
		}

		#[derive(Deserialize)]
		pub struct DriveItem {
			/// `items/<file id>`
			pub name: String,
		}

		#[derive(Deserialize)]
		#[serde(rename_all = "camelCase")]
		pub struct TimeRange {
			pub end_time: DateTime<Utc>,
		}

		impl Activity {
			pub fn into_records(self) -> impl Iterator<Item = RemoteChangeRecord> {
				let action = self
					.primary_action_detail
					.keys()
					.next()
					.map_or_else(
						|| ObjectAction::Other("unknown".to_string()),
						|name| ObjectAction::from_activity(name),
					);
				let time = self
					.timestamp
					.or_else(|| self.time_range.map(|range| range.end_time))
					.unwrap_or_else(Utc::now);

				self.targets
					.into_iter()
					.filter_map(|target| target.drive_item)
					.map(move |item| RemoteChangeRecord {
						object_id: item
							.name
							.strip_prefix("items/")
							.unwrap_or(&item.name)
							.to_string(),
						action: action.clone(),
						time,
					})
			}
		}

		pub async fn exec(
			config: &RequestConfig,
			root_id: &str,
			since: DateTime<Utc>,
			page_token: Option<&str>,
		) -> Result<Response, Error> {
			let mut body = json!({
				"ancestorName": format!("items/{root_id}"),
				"filter": format!("time >= \"{}\"", since.to_rfc3339()),
			});
			if let Some(page_token) = page_token {
				body["pageToken"] = json!(page_token);
			}

			into_json(
				config
					.client
					.post(ACTIVITY_URL)
					.with_auth(&config.auth_token)
					.json(&body)
					.send()
					.await,
				None,
			)
			.await
		}
	}
}

/// [`RemoteStore`] talking to the Drive v3 and Drive Activity v2 APIs.
pub struct DriveStore {
	client: reqwest::Client,
	credentials: ClientCredentials,
	token: Mutex<OAuthToken>,
	token_tx: watch::Sender<OAuthToken>,
}

impl DriveStore {
	#[must_use]
	pub fn new(credentials: ClientCredentials, token: OAuthToken) -> Self {
		let (token_tx, _) = watch::channel(token.clone());

		Self {
			client: reqwest::Client::new(),
			credentials,
			token: Mutex::new(token),
			token_tx,
		}
	}

	/// Notified with every refreshed token, so it can be persisted
	#[must_use]
	pub fn subscribe_tokens(&self) -> watch::Receiver<OAuthToken> {
		self.token_tx.subscribe()
	}

	async fn request_config(&self) -> Result<RequestConfig, Error> {
		let mut token = self.token.lock().await;

		if token.expires_within(Duration::seconds(60)) {
			*token = auth::refresh(&self.client, &self.credentials, &token).await?;
			self.token_tx.send_replace(token.clone());
		}

		Ok(RequestConfig {
			client: self.client.clone(),
			auth_token: token.clone(),
		})
	}
}

fn quote(value: &str) -> String {
	value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl RemoteStore for DriveStore {
	#[instrument(skip_all, fields(name = %metadata.name), err)]
	async fn create(
		&self,
		metadata: ObjectMetadata,
		content: Option<Vec<u8>>,
	) -> Result<RemoteObject, Error> {
		let config = self.request_config().await?;
		let created = files::create(&config, &metadata).await?;

		match content {
			Some(content) => files::upload(&config, &created.id, content).await,
			None => Ok(created),
		}
	}

	#[instrument(skip(self, metadata, content), err)]
	async fn update(
		&self,
		id: &str,
		metadata: ObjectMetadata,
		content: Option<Vec<u8>>,
	) -> Result<RemoteObject, Error> {
		let config = self.request_config().await?;
		let updated = files::update(&config, id, &metadata).await?;

		match content {
			Some(content) => files::upload(&config, &updated.id, content).await,
			None => Ok(updated),
		}
	}

	#[instrument(skip(self), err)]
	async fn delete(&self, id: &str) -> Result<(), Error> {
		files::delete(&self.request_config().await?, id).await
	}

	async fn get(&self, id: &str) -> Result<RemoteObject, Error> {
		files::get(&self.request_config().await?, id).await
	}

	async fn find_by_path(
		&self,
		full_path: &Path,
		parent_id: Option<&str>,
	) -> Result<Option<RemoteObject>, Error> {
		let mut query = format!(
			"appProperties has {{ key='{}' and value='{}' }} and trashed = false",
			crate::FULL_PATH_PROPERTY,
			quote(&full_path.to_string_lossy())
		);
		if let Some(parent_id) = parent_id {
			query.push_str(&format!(" and '{}' in parents", quote(parent_id)));
		}

		let found = files::list(&self.request_config().await?, &query).await?;

		Ok(found.files.into_iter().next())
	}

	async fn download(&self, id: &str) -> Result<Vec<u8>, Error> {
		files::download(&self.request_config().await?, id).await
	}

	async fn changes_since(
		&self,
		root_id: &str,
		since: DateTime<Utc>,
	) -> Result<Vec<RemoteChangeRecord>, Error> {
		let config = self.request_config().await?;

		let mut records = Vec::new();
		let mut page_token = None;

		loop {
			let page = activity::query(&config, root_id, since, page_token.as_deref()).await?;

			records.extend(page.activities.into_iter().flat_map(activity::query::Activity::into_records));

			match page.next_page_token.filter(|token| !token.is_empty()) {
				Some(token) => page_token = Some(token),
				None => break,
			}
		}

		// Activity history comes newest first
		records.sort_by_key(|record| record.time);
		debug!(count = records.len(), "Fetched remote changes;");

		Ok(records)
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
	use super::*;
	use crate::ObjectAction;

	#[test]
	fn decodes_activity_records() {
		let page: activity::query::Response = serde_json::from_value(serde_json::json!({
			"activities": [{
				"primaryActionDetail": { "edit": {} },
				"targets": [
					{ "driveItem": { "name": "items/abc", "title": "a.txt" } },
					{ "teamDrive": { "name": "teamDrives/x" } }
				],
				"timestamp": "2024-05-01T10:00:00Z"
			}, {
				"primaryActionDetail": { "delete": { "type": "TRASH" } },
				"targets": [{ "driveItem": { "name": "items/def" } }],
				"timeRange": { "startTime": "2024-05-01T09:00:00Z", "endTime": "2024-05-01T09:30:00Z" }
			}]
		}))
		.unwrap();

		let records = page
			.activities
			.into_iter()
			.flat_map(activity::query::Activity::into_records)
			.collect::<Vec<_>>();

		assert_eq!(records.len(), 2);
		assert_eq!(records[0].object_id, "abc");
		assert_eq!(records[0].action, ObjectAction::Update);
		assert_eq!(records[1].object_id, "def");
		assert_eq!(records[1].action, ObjectAction::Delete);
		assert_eq!(records[1].time.to_rfc3339(), "2024-05-01T09:30:00+00:00");
	}

	#[test]
	fn quotes_search_values() {
		assert_eq!(quote("/home/o'neil/a\\b"), "/home/o\\'neil/a\\\\b");
	}
}
