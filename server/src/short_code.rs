// fadebin Ephemeral Paste Server
// Copyright (C) 2021  Edward Shen
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::fmt::{Debug, Display};
use std::str::FromStr;

use rand::prelude::Distribution;
use rand::Rng;
use serde::de::{Unexpected, Visitor};
use serde::{Deserialize, Serialize};

pub const SHORT_CODE_SIZE: usize = 12;

/// Identifier of a stored paste.
pub type PasteId = ShortCode<SHORT_CODE_SIZE>;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortCode<const N: usize>([ShortCodeChar; N]);

impl<const N: usize> ShortCode<N> {
    pub fn as_bytes(&self) -> [u8; N] {
        self.0.map(|v| v.0 as u8)
    }
}

impl<const N: usize> Debug for ShortCode<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ShortCode").field(&self.to_string()).finish()
    }
}

impl<const N: usize> Display for ShortCode<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_iter(self.0.map(|v| v.0)))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseShortCodeError {
    Length(usize),
    Char(char),
}

impl Display for ParseShortCodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Length(len) => write!(f, "short code has the wrong length ({len})"),
            Self::Char(c) => write!(f, "{c:?} is not a valid short code character"),
        }
    }
}

impl<const N: usize> FromStr for ShortCode<N> {
    type Err = ParseShortCodeError;

    fn from_str(v: &str) -> Result<Self, Self::Err> {
        if v.len() != N {
            return Err(ParseShortCodeError::Length(v.len()));
        }

        // This is fine, it'll get overwritten anyways.
        let mut output = [ShortCodeChar('\0'); N];
        // Length was checked in bytes, so a non-ascii char fails here before
        // the index can run past N.
        for (slot, c) in output.iter_mut().zip(v.chars()) {
            *slot = c.try_into().map_err(|_| ParseShortCodeError::Char(c))?;
        }

        Ok(Self(output))
    }
}

impl<const N: usize> Serialize for ShortCode<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de, const N: usize> Deserialize<'de> for ShortCode<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ShortCodeVisitor<const N: usize>;
        impl<'de, const N: usize> Visitor<'de> for ShortCodeVisitor<N> {
            type Value = ShortCode<N>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "a {N} character short code")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(|e| match e {
                    ParseShortCodeError::Length(len) => E::invalid_length(len, &self),
                    ParseShortCodeError::Char(c) => {
                        E::invalid_value(Unexpected::Char(c), &"a valid short code character")
                    }
                })
            }
        }

        deserializer.deserialize_str(ShortCodeVisitor)
    }
}

/// `ShortCodeChar` uses the Word-safe alphabet, a Base32 extension of the Open
/// Location Code Base20 alphabet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ShortCodeChar(char);

impl TryFrom<char> for ShortCodeChar {
    type Error = &'static str;

    fn try_from(v: char) -> Result<Self, Self::Error> {
        if v.is_ascii() && ALPHABET.contains(&(v as u8)) {
            Ok(Self(v))
        } else {
            Err("a valid short code character")
        }
    }
}

pub struct Generator;

const ALPHABET: &[u8; 32] = b"23456789CFGHJMPQRVWXcfghjmpqrvwx";

impl Distribution<ShortCodeChar> for Generator {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ShortCodeChar {
        let value = rng.gen_range(0..ALPHABET.len());
        ShortCodeChar(ALPHABET[value] as char)
    }
}

impl<const N: usize> Distribution<ShortCode<N>> for Generator {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ShortCode<N> {
        let mut arr = [ShortCodeChar('\0'); N];

        for c in &mut arr {
            *c = self.sample(rng);
        }

        ShortCode(arr)
    }
}
