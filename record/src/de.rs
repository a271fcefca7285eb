// SPDX-License-Identifier: MPL-2.0

use serde::de;

use crate::Error;

impl<'de> Deserializer<'de> {
    pub fn from_bytes(input: &'de [u8]) -> Self {
        Self { input }
    }
}

#[derive(Debug)]
pub struct Deserializer<'de> {
    input: &'de [u8],
}

impl<'de> Deserializer<'de> {
    /// The bytes that have not been consumed yet.
    pub fn remaining(&self) -> &'de [u8] {
        self.input
    }

    fn take<const N: usize>(&mut self, expected: &'static str) -> Result<[u8; N], Error> {
        let head = self
            .input
            .get(..N)
            .ok_or(Error::UnexpectedEnd { expected })?;
        let mut buf = [0; N];
        buf.copy_from_slice(head);
        self.input = &self.input[N..];

        Ok(buf)
    }
}

macro_rules! def_deserialize_unimpl {
    ($lt:lifetime $($fn:ident($($arg:ty),* $(,)?))*) => {
        $(
            fn $fn<V>(self, $(_: $arg,)* _: V) -> Result<V::Value, Error>
            where
                V: de::Visitor<$lt>,
            {
                Err(Error::Unsupported(stringify!($fn)))
            }
        )*
    };
}

macro_rules! def_deserialize_le {
    (
        fn: $fn:ident<$lt:lifetime> -> $ty:ty,
        visit: $visit:ident $(,)?
    ) => {
        fn $fn<V>(self, visitor: V) -> Result<V::Value, Error>
        where
            V: de::Visitor<$lt>,
        {
            const TYPE_SIZE: usize = std::mem::size_of::<$ty>();

            let bytes = self.take::<TYPE_SIZE>(stringify!($ty))?;

            visitor.$visit(<$ty>::from_le_bytes(bytes))
        }
    };
}

impl<'de, 'a> de::Deserializer<'de> for &'a mut Deserializer<'de> {
    type Error = Error;

    def_deserialize_unimpl! {
        'de
        deserialize_any()
        deserialize_bool()
        deserialize_i8()
        deserialize_i16()
        deserialize_i32()
        deserialize_i64()
        deserialize_f32()
        deserialize_f64()
        deserialize_char()
        deserialize_str()
        deserialize_string()
        deserialize_bytes()
        deserialize_byte_buf()
        deserialize_option()
        deserialize_unit()
        deserialize_seq()
        deserialize_map()
        deserialize_identifier()
        deserialize_ignored_any()
        deserialize_tuple_struct(&'static str, usize)
        deserialize_enum(&'static str, &'static [&'static str])
        deserialize_unit_struct(&'static str)
        deserialize_newtype_struct(&'static str)
    }

    def_deserialize_le! {
        fn: deserialize_u8<'de> -> u8,
        visit: visit_u8,
    }

    // Every multi-byte integer in the records we handle is little-endian, even on media written
    // by big-endian machines.

    def_deserialize_le! {
        fn: deserialize_u16<'de> -> u16,
        visit: visit_u16,
    }

    def_deserialize_le! {
        fn: deserialize_u32<'de> -> u32,
        visit: visit_u32,
    }

    def_deserialize_le! {
        fn: deserialize_u64<'de> -> u64,
        visit: visit_u64,
    }

    fn deserialize_struct<V>(
        self,
        _: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        // A struct is essentially a named tuple.
        self.deserialize_tuple(fields.len(), visitor)
    }

    fn deserialize_tuple<V>(self, len: usize, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        struct Access<'a, 'de> {
            de: &'a mut Deserializer<'de>,
            len: usize,
        }

        impl<'de> de::SeqAccess<'de> for Access<'_, 'de> {
            type Error = Error;

            fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>, Error>
            where
                T: de::DeserializeSeed<'de>,
            {
                if self.len > 0 {
                    self.len -= 1;
                    let value = seed.deserialize(&mut *self.de)?;

                    Ok(Some(value))
                } else {
                    Ok(None)
                }
            }

            fn size_hint(&self) -> Option<usize> {
                Some(self.len)
            }
        }

        visitor.visit_seq(Access { de: self, len })
    }
}
