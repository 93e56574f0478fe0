// ttlpaste Expiring Paste Hosting
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
use serde::Deserialize;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ShortCode<const N: usize>([ShortCodeChar; N]);

impl<const N: usize> ShortCode<N> {
    pub fn as_string(&self) -> String {
        String::from_iter(self.0.map(|v| v.0))
    }
}

impl<const N: usize> Display for ShortCode<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl<const N: usize> Debug for ShortCode<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ShortCode").field(&self.as_string()).finish()
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
            Self::Length(len) => write!(f, "expected a short code, got {} characters", len),
            Self::Char(c) => write!(f, "{:?} is not a valid short code character", c),
        }
    }
}

impl<const N: usize> FromStr for ShortCode<N> {
    type Err = ParseShortCodeError;

    fn from_str(v: &str) -> Result<Self, Self::Err> {
        if v.chars().count() != N {
            return Err(ParseShortCodeError::Length(v.chars().count()));
        }

        // This is fine, it'll get overwritten anyways.
        let mut output = [ShortCodeChar('\0'); N];
        for (slot, c) in output.iter_mut().zip(v.chars()) {
            *slot = c.try_into().map_err(|_| ParseShortCodeError::Char(c))?;
        }

        Ok(Self(output))
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
                write!(formatter, "a {} character short code", N)
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
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
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
        let value = rng.gen_range(0..32);
        ShortCodeChar(ALPHABET[value] as char)
    }
}

impl<const N: usize> Distribution<ShortCode<N>> for Generator {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ShortCode<N> {
        let mut arr = [ShortCodeChar('\0'); N];

        for c in arr.iter_mut() {
            *c = self.sample(rng);
        }

        ShortCode(arr)
    }
}
