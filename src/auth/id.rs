//! Strongly typed identifiers for users, providers, and recorded failures.

// std
use std::{borrow::Borrow, ops::Deref};
// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;
const ERROR_ID_LEN: usize = 16;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (user, provider, error).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (user, provider, error).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (user, provider, error).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

def_id! { UserId, "Provider-assigned identifier of the user owning a credential.", "User" }
def_id! { ProviderId, "Identifier for an OAuth provider descriptor.", "Provider" }
def_id! { ErrorId, "Opaque identifier of one recorded chain failure.", "Error" }
impl ErrorId {
	/// Generates a fresh random identifier.
	///
	/// A new id is minted for every recorded failure so a scheduled retry can tell whether it
	/// still addresses the failure it was scheduled for.
	pub fn generate() -> Self {
		let value = rand::rng()
			.sample_iter(Alphanumeric)
			.take(ERROR_ID_LEN)
			.map(char::from)
			.collect::<String>();

		Self(value)
	}
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_whitespace_and_empty_values() {
		assert!(UserId::new(" 1234").is_err(), "Leading whitespace must be rejected.");
		assert!(UserId::new("1234 ").is_err(), "Trailing whitespace must be rejected.");

		let user = UserId::new("1234").expect("User fixture should be considered valid.");

		assert_eq!(user.as_ref(), "1234");
		assert!(UserId::new("").is_err());
		assert!(ProviderId::new("with space").is_err());
	}

	#[test]
	fn serde_enforces_validation() {
		let user: UserId =
			serde_json::from_str("\"42\"").expect("User id should deserialize successfully.");

		assert_eq!(user.as_ref(), "42");
		assert!(serde_json::from_str::<UserId>("\"with space\"").is_err());
		assert!(serde_json::from_str::<UserId>("\"\"").is_err());
	}

	#[test]
	fn length_limit_is_enforced() {
		UserId::new("a".repeat(IDENTIFIER_MAX_LEN)).expect("Exact length should succeed.");

		assert!(UserId::new("a".repeat(IDENTIFIER_MAX_LEN + 1)).is_err());
	}

	#[test]
	fn generated_error_ids_are_valid_and_distinct() {
		let first = ErrorId::generate();
		let second = ErrorId::generate();

		assert_eq!(first.len(), ERROR_ID_LEN);
		assert_ne!(first, second);
		ErrorId::new(first.as_ref()).expect("Generated error ids should pass validation.");
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<UserId, u8> = HashMap::from_iter([(
			UserId::new("1234").expect("User used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("1234"), Some(&7));
	}
}
