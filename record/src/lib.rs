// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A *serde* data format for fixed-width, little-endian binary records.
//!
//! Records are plain structs of unsigned integers and byte arrays. Fields are laid out in
//! declaration order with no padding, which matches the on-disk layout of FAT boot sectors and
//! xmount cache files. Anything that has no fixed width (strings, sequences, options, maps) is
//! rejected with [`Error::Unsupported`].

mod de;
mod ser;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use de::Deserializer;
pub use ser::Serializer;

/// The error type of both [`Deserializer`] and [`Serializer`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error("record ended early; expected {expected}")]
    UnexpectedEnd { expected: &'static str },
    #[error("{len} trailing bytes after record")]
    TrailingBytes { len: usize },
    #[error("`{0}` has no fixed-width encoding")]
    Unsupported(&'static str),
}

impl serde::de::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: fmt::Display,
    {
        Self::Message(msg.to_string())
    }
}

impl serde::ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: fmt::Display,
    {
        Self::Message(msg.to_string())
    }
}

/// A record whose encoding always occupies exactly [`Record::SIZE`] bytes.
pub trait Record: Sized {
    const SIZE: usize;
}

/// Decodes a `T` that must consume all of `input`.
pub fn from_bytes<'de, T: Deserialize<'de>>(input: &'de [u8]) -> Result<T, Error> {
    let (value, rest) = from_prefix(input)?;
    if !rest.is_empty() {
        return Err(Error::TrailingBytes { len: rest.len() });
    }

    Ok(value)
}

/// Decodes a `T` from the start of `input`, returning it with the unconsumed remainder.
pub fn from_prefix<'de, T: Deserialize<'de>>(input: &'de [u8]) -> Result<(T, &'de [u8]), Error> {
    let mut de = Deserializer::from_bytes(input);
    let value = T::deserialize(&mut de)?;

    Ok((value, de.remaining()))
}

/// Encodes `value` into a freshly allocated buffer.
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    let mut ser = Serializer::default();
    value.serialize(&mut ser)?;

    Ok(ser.into_inner())
}
