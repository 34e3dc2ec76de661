use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ChatError;

pub const DELIMITER: char = '_';

/// Identifies the single conversation between two users. Both participants
/// derive the same key no matter who starts talking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomKey(String);

pub fn room_key(a: &str, b: &str) -> Result<RoomKey, ChatError> {
    if a.is_empty() || b.is_empty() {
        return Err(ChatError::MissingParticipant);
    }

    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    Ok(RoomKey(format!("{first}{DELIMITER}{second}")))
}

impl RoomKey {
    /// Wraps a key read back from storage, where it was written by `room_key`.
    pub(crate) fn from_stored(raw: String) -> RoomKey {
        RoomKey(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The other participant, as seen by `user`. Only unambiguous when the
    /// ids themselves contain no delimiter.
    pub fn peer_of(&self, user: &str) -> Option<&str> {
        let (first, second) = self.0.split_once(DELIMITER)?;
        if first == user {
            Some(second)
        } else if second == user {
            Some(first)
        } else {
            None
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
