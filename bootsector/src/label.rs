// SPDX-License-Identifier: MPL-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

/// A fixed-size, space-padded text field such as the OEM name or volume label.
///
/// The bytes are kept verbatim; legacy media frequently store non-ASCII markers here.
#[derive(Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Label<const SIZE: usize> {
    #[serde(with = "serde_arrays")]
    inner: [u8; SIZE],
}

impl<const SIZE: usize> Label<SIZE> {
    pub const fn new(inner: [u8; SIZE]) -> Self {
        Self { inner }
    }

    pub fn as_bytes(&self) -> &[u8; SIZE] {
        &self.inner
    }

    /// The label with trailing filler spaces removed, if it is printable ASCII.
    pub fn to_str(&self) -> Option<&str> {
        if !self.inner.iter().all(|it| it.is_ascii_graphic() || *it == b' ') {
            return None;
        }

        // Printable ASCII is always valid UTF-8.
        std::str::from_utf8(&self.inner)
            .ok()
            .map(|it| it.trim_end_matches(' '))
    }
}

impl<const SIZE: usize> From<[u8; SIZE]> for Label<SIZE> {
    fn from(inner: [u8; SIZE]) -> Self {
        Self::new(inner)
    }
}

impl<const SIZE: usize> fmt::Debug for Label<SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(string) = self.to_str() {
            write!(f, "\"{}\"", string)
        } else {
            <[u8; SIZE] as fmt::Debug>::fmt(&self.inner, f)
        }
    }
}
