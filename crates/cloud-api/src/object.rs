use std::{collections::HashMap, fmt, path::Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mime type marking an object as a folder
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Property holding the canonical local path an object mirrors
pub const FULL_PATH_PROPERTY: &str = "fullPath";
/// Property holding the local permission bits, as an octal string like `0644`
pub const MODE_PROPERTY: &str = "mode";
/// Property holding the local modification time at upload
pub const CHANGED_AT_PROPERTY: &str = "changedAt";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
	pub id: String,
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub mime_type: String,
	#[serde(default)]
	pub parents: Vec<String>,
	pub created_time: Option<DateTime<Utc>>,
	pub modified_time: Option<DateTime<Utc>>,
	#[serde(default)]
	pub app_properties: HashMap<String, String>,
}

impl RemoteObject {
	#[must_use]
	pub fn full_path(&self) -> Option<&Path> {
		self.app_properties
			.get(FULL_PATH_PROPERTY)
			.filter(|path| !path.is_empty())
			.map(Path::new)
	}

	/// Permission bits recorded at upload, if they parse as octal
	#[must_use]
	pub fn mode(&self) -> Option<u32> {
		self.app_properties
			.get(MODE_PROPERTY)
			.and_then(|mode| u32::from_str_radix(mode.trim_start_matches("0o"), 8).ok())
	}

	#[must_use]
	pub fn is_dir(&self) -> bool {
		self.mime_type == FOLDER_MIME_TYPE
	}

	#[must_use]
	pub fn parent_id(&self) -> Option<&str> {
		self.parents.first().map(String::as_str)
	}
}

/// Metadata written on create or update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
	pub name: String,
	/// Ignored on update, objects are never reparented
	pub parent_id: Option<String>,
	pub mime_type: Option<String>,
	pub modified_time: Option<DateTime<Utc>>,
	pub app_properties: HashMap<String, String>,
}

impl ObjectMetadata {
	#[must_use]
	pub fn folder(name: impl Into<String>, parent_id: impl Into<String>, full_path: &Path) -> Self {
		Self {
			name: name.into(),
			parent_id: Some(parent_id.into()),
			mime_type: Some(FOLDER_MIME_TYPE.to_string()),
			modified_time: None,
			app_properties: HashMap::from([(
				FULL_PATH_PROPERTY.to_string(),
				full_path.to_string_lossy().into_owned(),
			)]),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectAction {
	Create,
	Update,
	Delete,
	/// Object was looked up by path and found
	Lookup,
	Move,
	Rename,
	Restore,
	Other(String),
}

impl ObjectAction {
	#[must_use]
	pub const fn is_removal(&self) -> bool {
		matches!(self, Self::Delete)
	}

	/// Maps the name of a remote activity detail, like `edit` or `delete`
	#[must_use]
	pub fn from_activity(name: &str) -> Self {
		match name.to_ascii_lowercase().as_str() {
			"create" => Self::Create,
			"edit" => Self::Update,
			"delete" => Self::Delete,
			"move" => Self::Move,
			"rename" => Self::Rename,
			"restore" => Self::Restore,
			_ => Self::Other(name.to_string()),
		}
	}
}

impl fmt::Display for ObjectAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Other(name) => f.write_str(name),
			known => write!(f, "{known:?}"),
		}
	}
}

/// Who caused an object change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOrigin {
	/// Performed by this process, mirroring a local edit
	Local,
	/// Reported by the remote change history
	Remote,
}

/// Normalized notification that an object changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectChange {
	pub object: RemoteObject,
	pub action: ObjectAction,
	pub origin: ChangeOrigin,
}

/// One entry of the remote change history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChangeRecord {
	pub object_id: String,
	pub action: ObjectAction,
	pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reads_properties() {
		let object = RemoteObject {
			id: "1".into(),
			mime_type: FOLDER_MIME_TYPE.into(),
			parents: vec!["root".into()],
			app_properties: HashMap::from([
				(FULL_PATH_PROPERTY.into(), "/home/me/docs".into()),
				(MODE_PROPERTY.into(), "0755".into()),
			]),
			..Default::default()
		};

		assert_eq!(object.full_path(), Some(Path::new("/home/me/docs")));
		assert_eq!(object.mode(), Some(0o755));
		assert!(object.is_dir());
		assert_eq!(object.parent_id(), Some("root"));
		assert_eq!(RemoteObject::default().full_path(), None);
	}

	#[test]
	fn maps_activity_names() {
		assert_eq!(ObjectAction::from_activity("edit"), ObjectAction::Update);
		assert!(ObjectAction::from_activity("delete").is_removal());
		assert_eq!(
			ObjectAction::from_activity("permissionChange"),
			ObjectAction::Other("permissionChange".into())
		);
	}
}
