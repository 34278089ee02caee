pub mod conversation;
pub mod message;
pub mod reference;
pub mod token_count;

use serde::{Deserialize, Deserializer};

/// Read an explicit `null` the same way as a missing field.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
