//! Serde codecs for the epoch-millisecond and relative-second fields of persisted records.

// self
use crate::_prelude::*;

const NANOS_PER_MILLI: i128 = 1_000_000;

/// Drops sub-millisecond precision so values survive a persistence round trip unchanged.
pub fn truncate_to_millis(instant: OffsetDateTime) -> OffsetDateTime {
	let nanos = instant.unix_timestamp_nanos();

	OffsetDateTime::from_unix_timestamp_nanos(nanos - nanos.rem_euclid(NANOS_PER_MILLI))
		.unwrap_or(instant)
}

/// Current clock at millisecond precision.
pub fn now_millis() -> OffsetDateTime {
	truncate_to_millis(OffsetDateTime::now_utc())
}

fn to_millis(instant: &OffsetDateTime) -> i64 {
	(instant.unix_timestamp_nanos() / NANOS_PER_MILLI) as i64
}

fn from_millis<E>(millis: f64) -> Result<OffsetDateTime, E>
where
	E: serde::de::Error,
{
	if !millis.is_finite() {
		return Err(E::custom("timestamp must be a finite number"));
	}

	OffsetDateTime::from_unix_timestamp_nanos(millis.trunc() as i128 * NANOS_PER_MILLI)
		.map_err(E::custom)
}

/// `OffsetDateTime` as integer milliseconds since the Unix epoch.
pub mod epoch_ms {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use super::*;

	/// Serializes the instant as epoch milliseconds.
	pub fn serialize<S>(instant: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(to_millis(instant))
	}

	/// Deserializes epoch milliseconds (integer or float) into an instant.
	pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
	where
		D: Deserializer<'de>,
	{
		from_millis(f64::deserialize(deserializer)?)
	}
}

/// Optional `OffsetDateTime` as nullable epoch milliseconds.
pub mod option_epoch_ms {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use super::*;

	/// Serializes the instant as epoch milliseconds or `null`.
	pub fn serialize<S>(instant: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match instant {
			Some(instant) => serializer.serialize_some(&to_millis(instant)),
			None => serializer.serialize_none(),
		}
	}

	/// Deserializes nullable epoch milliseconds.
	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
	where
		D: Deserializer<'de>,
	{
		Option::<f64>::deserialize(deserializer)?.map(from_millis).transpose()
	}
}

/// Optional `Duration` as a nullable signed number of seconds.
pub mod option_seconds {
	// crates.io
	use serde::{Deserializer, Serializer, de::Error as DeError};
	// self
	use super::*;

	/// Serializes the lifetime as whole seconds or `null`.
	pub fn serialize<S>(lifetime: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match lifetime {
			Some(lifetime) => serializer.serialize_some(&lifetime.whole_seconds()),
			None => serializer.serialize_none(),
		}
	}

	/// Deserializes a nullable number of seconds.
	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		match Option::<f64>::deserialize(deserializer)? {
			Some(seconds) if seconds.is_finite() => Ok(Some(Duration::seconds_f64(seconds))),
			Some(_) => Err(D::Error::custom("lifetime must be a finite number")),
			None => Ok(None),
		}
	}
}
