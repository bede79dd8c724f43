use std::{fmt, str::FromStr};

use bitflags::bitflags;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::WatcherError;

bitflags! {
	/// Set of filesystem conditions reported for a single kernel record.
	///
	/// The bit values are the ones used by the Linux inotify ABI, so a raw kernel mask
	/// can be turned into [`Conditions`] with [`Conditions::from_bits_truncate`].
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct Conditions: u32 {
		const ACCESS = 0x0000_0001;
		const MODIFY = 0x0000_0002;
		const ATTRIB = 0x0000_0004;
		const CLOSE_WRITE = 0x0000_0008;
		const CLOSE_NOWRITE = 0x0000_0010;
		const OPEN = 0x0000_0020;
		const MOVED_FROM = 0x0000_0040;
		const MOVED_TO = 0x0000_0080;
		const CREATE = 0x0000_0100;
		const DELETE = 0x0000_0200;
		const DELETE_SELF = 0x0000_0400;
		const MOVE_SELF = 0x0000_0800;
		const UNMOUNT = 0x0000_2000;
		const Q_OVERFLOW = 0x0000_4000;
		const IGNORED = 0x0000_8000;
		const ISDIR = 0x4000_0000;

		const CLOSE = Self::CLOSE_WRITE.bits() | Self::CLOSE_NOWRITE.bits();
		const MOVE = Self::MOVED_FROM.bits() | Self::MOVED_TO.bits();
		const ALL_EVENTS = Self::ACCESS.bits()
			| Self::MODIFY.bits()
			| Self::ATTRIB.bits()
			| Self::CLOSE.bits()
			| Self::OPEN.bits()
			| Self::MOVE.bits()
			| Self::CREATE.bits()
			| Self::DELETE.bits()
			| Self::DELETE_SELF.bits()
			| Self::MOVE_SELF.bits();

		/// Conditions that end a local change burst.
		const TERMINAL = Self::CLOSE_WRITE.bits()
			| Self::DELETE.bits()
			| Self::DELETE_SELF.bits()
			| Self::MOVE.bits();

		/// Conditions meaning the subject is gone from its previous location.
		const REMOVAL = Self::DELETE.bits() | Self::DELETE_SELF.bits() | Self::MOVED_FROM.bits();
	}
}

const NAMES: &[(&str, Conditions)] = &[
	("IN_ACCESS", Conditions::ACCESS),
	("IN_MODIFY", Conditions::MODIFY),
	("IN_ATTRIB", Conditions::ATTRIB),
	("IN_CLOSE_WRITE", Conditions::CLOSE_WRITE),
	("IN_CLOSE_NOWRITE", Conditions::CLOSE_NOWRITE),
	("IN_OPEN", Conditions::OPEN),
	("IN_MOVED_FROM", Conditions::MOVED_FROM),
	("IN_MOVED_TO", Conditions::MOVED_TO),
	("IN_CREATE", Conditions::CREATE),
	("IN_DELETE", Conditions::DELETE),
	("IN_DELETE_SELF", Conditions::DELETE_SELF),
	("IN_MOVE_SELF", Conditions::MOVE_SELF),
	("IN_UNMOUNT", Conditions::UNMOUNT),
	("IN_Q_OVERFLOW", Conditions::Q_OVERFLOW),
	("IN_IGNORED", Conditions::IGNORED),
	("IN_ISDIR", Conditions::ISDIR),
	// Composite aliases, accepted on input only
	("IN_CLOSE", Conditions::CLOSE),
	("IN_MOVE", Conditions::MOVE),
	("IN_ALL_EVENTS", Conditions::ALL_EVENTS),
];

impl Conditions {
	#[must_use]
	pub const fn is_dir(self) -> bool {
		self.contains(Self::ISDIR)
	}

	/// Whether the set carries a condition that must flush pending sync state.
	#[must_use]
	pub const fn is_terminal(self) -> bool {
		self.intersects(Self::TERMINAL)
	}
}

impl FromStr for Conditions {
	type Err = WatcherError;

	/// Parses names such as `IN_CLOSE_WRITE|IN_DELETE`; whitespace around names is ignored.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		s.split('|')
			.map(str::trim)
			.filter(|name| !name.is_empty())
			.try_fold(Self::empty(), |acc, name| {
				NAMES
					.iter()
					.find(|(known, _)| known.eq_ignore_ascii_case(name))
					.map(|(_, flag)| acc | *flag)
					.ok_or_else(|| WatcherError::UnknownCondition(name.to_string()))
			})
	}
}

impl fmt::Display for Conditions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut first = true;
		// Only single bits are rendered, composites would duplicate them
		for (name, flag) in NAMES.iter().filter(|(_, flag)| flag.bits().is_power_of_two()) {
			if self.contains(*flag) {
				if !first {
					f.write_str("|")?;
				}
				f.write_str(name)?;
				first = false;
			}
		}

		Ok(())
	}
}

impl Serialize for Conditions {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for Conditions {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		String::deserialize(deserializer)?
			.parse()
			.map_err(de::Error::custom)
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
	use super::*;

	#[test]
	fn parses_pipe_separated_names() {
		let conditions = " IN_CLOSE_WRITE | IN_DELETE|in_moved_from "
			.parse::<Conditions>()
			.unwrap();

		assert_eq!(
			conditions,
			Conditions::CLOSE_WRITE | Conditions::DELETE | Conditions::MOVED_FROM
		);
	}

	#[test]
	fn rejects_unknown_names() {
		let err = "IN_CLOSE_WRITE|IN_BOGUS".parse::<Conditions>().unwrap_err();

		assert!(matches!(err, WatcherError::UnknownCondition(name) if name == "IN_BOGUS"));
	}

	#[test]
	fn displays_single_bits_only() {
		let conditions = Conditions::MOVE | Conditions::ISDIR;

		assert_eq!(conditions.to_string(), "IN_MOVED_FROM|IN_MOVED_TO|IN_ISDIR");
		assert_eq!(conditions.to_string().parse::<Conditions>().unwrap(), conditions);
	}

	#[test]
	fn terminal_set() {
		assert!(Conditions::CLOSE_WRITE.is_terminal());
		assert!((Conditions::MODIFY | Conditions::MOVED_TO).is_terminal());
		assert!(!(Conditions::CREATE | Conditions::MODIFY | Conditions::OPEN).is_terminal());
	}
}
