//! Room codes and display names.
//!
//! A room code is the short token a host reads out to a joining peer.
//! The alphabet leaves out characters that are easy to confuse when read
//! aloud or typed from a phone screen (I, O, 0, 1).

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;

pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const ROOM_CODE_LEN: usize = 6;

const NICKNAMES: &[&str] = &[
    "Teddy Bear",
    "Chubby Cat",
    "Little Chick",
    "Jade Rabbit",
    "Clever Fox",
    "Panda",
    "Koala",
    "Lion",
    "Tiger Cub",
    "Green Frog",
    "Penguin",
    "Butterfly",
    "Puppy",
    "Pink Piglet",
    "Unicorn",
    "Little Turtle",
    "Owl",
    "Honey Bee",
    "Shark",
    "Octopus",
    "Red Crab",
    "Whale",
    "Flamingo",
    "Parrot",
    "Brown Squirrel",
    "Hedgehog",
    "Baby Dragon",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomCodeError {
    #[error("room code must be 6 characters, got {0}")]
    Length(usize),
    #[error("room code contains invalid character {0:?}")]
    Character(char),
}

/// A validated, upper-case room code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Normalize user input (trim, upper-case) and validate it.
    pub fn parse(input: &str) -> Result<Self, RoomCodeError> {
        let code = input.trim().to_uppercase();
        let len = code.chars().count();
        if len != ROOM_CODE_LEN {
            return Err(RoomCodeError::Length(len));
        }
        if let Some(bad) = code
            .chars()
            .find(|c| !c.is_ascii() || !ROOM_CODE_ALPHABET.contains(&(*c as u8)))
        {
            return Err(RoomCodeError::Character(bad));
        }
        Ok(Self(code))
    }

    /// True when `input` normalizes to this code.
    pub fn matches(&self, input: &str) -> bool {
        Self::parse(input).map(|c| c == *self).unwrap_or(false)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = RoomCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A random playful display name.
pub fn random_nickname() -> String {
    NICKNAMES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("Anonymous")
        .to_string()
}
