//! XDR (External Data Representation, RFC 4506) serialization.
//!
//! Every XDR datum occupies a multiple of 4 octets, integers are big-endian
//! two's complement, and variable-length data carries a 4-byte length prefix
//! followed by zero padding up to the next 4-octet boundary.
//!
//! Types that cross the wire implement [`Serialize`] and [`Deserialize`].
//! Composite types are wired up with the `SerializeStruct!` /
//! `DeserializeStruct!` / `SerializeEnum!` / `DeserializeEnum!` macros so the
//! field order stated in the protocol definition is the single source of
//! truth.

use std::io::{Read, Write};

use byteorder::BigEndian;
use byteorder::{ReadBytesExt, WriteBytesExt};

pub mod gss;
pub mod portmap;
pub mod rpc;
pub mod stream;

pub use stream::{StreamRole, XdrConfig, XdrStream};

/// Byte order used throughout XDR (big endian).
pub type XdrEndian = BigEndian;

/// XDR quantum: every datum is padded to a multiple of this many octets.
pub const ALIGNMENT: usize = 4;

/// Decode step reads opaque payloads in bounded chunks so a hostile length
/// prefix cannot force a huge allocation before the input runs dry.
const OPAQUE_READ_CHUNK: usize = 64 * 1024;

/// Serializes the implementing type into the provided writer.
pub trait Serialize {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()>;
}

/// Deserializes data from the provided reader into the implementing type.
pub trait Deserialize {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()>;
}

/// Reads a complete value of type `T` from `src`.
pub fn deserialize<T: Deserialize + Default>(src: &mut impl Read) -> std::io::Result<T> {
    let mut value = T::default();
    value.deserialize(src)?;
    Ok(value)
}

/// Number of zero octets that pad a datum of `len` octets to the quantum.
pub fn pad_len(len: usize) -> usize {
    (ALIGNMENT - len % ALIGNMENT) % ALIGNMENT
}

/// Writes the zero padding that follows a datum of `len` octets.
pub fn write_padding(len: usize, dest: &mut impl Write) -> std::io::Result<()> {
    let zeros = [0u8; ALIGNMENT];
    dest.write_all(&zeros[..pad_len(len)])
}

/// Skips the padding that follows a datum of `len` octets. Padding content
/// is not inspected.
pub fn read_padding(len: usize, src: &mut impl Read) -> std::io::Result<()> {
    let mut scratch = [0u8; ALIGNMENT];
    src.read_exact(&mut scratch[..pad_len(len)])
}

/// Shorthand for the decode-failure error the codec surfaces.
pub fn invalid_data(m: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, m.into())
}

/// XDR void occupies no octets; used for procedures without arguments or
/// results.
impl Serialize for () {
    fn serialize<W: Write>(&self, _dest: &mut W) -> std::io::Result<()> {
        Ok(())
    }
}

impl Deserialize for () {
    fn deserialize<R: Read>(&mut self, _src: &mut R) -> std::io::Result<()> {
        Ok(())
    }
}

/// Booleans travel as a 4-byte integer. Zero is false; any non-zero value
/// decodes as true, matching deployed ONC-RPC peers. Strict RFC 4506
/// checking is available through [`XdrStream::decode_bool`] when the stream
/// is configured with [`XdrConfig::strict_bool`].
impl Serialize for bool {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u32::<XdrEndian>(*self as u32)
    }
}

impl Deserialize for bool {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let val: u32 = src.read_u32::<XdrEndian>()?;
        *self = val > 0;
        Ok(())
    }
}

impl Serialize for i32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_i32::<XdrEndian>(*self)
    }
}

impl Deserialize for i32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_i32::<XdrEndian>()?;
        Ok(())
    }
}

impl Serialize for u32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u32::<XdrEndian>(*self)
    }
}

impl Deserialize for u32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u32::<XdrEndian>()?;
        Ok(())
    }
}

impl Serialize for i64 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_i64::<XdrEndian>(*self)
    }
}

impl Deserialize for i64 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_i64::<XdrEndian>()?;
        Ok(())
    }
}

impl Serialize for u64 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u64::<XdrEndian>(*self)
    }
}

impl Deserialize for u64 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u64::<XdrEndian>()?;
        Ok(())
    }
}

/// IEEE-754 single precision, 4 octets big-endian.
impl Serialize for f32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_f32::<XdrEndian>(*self)
    }
}

impl Deserialize for f32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_f32::<XdrEndian>()?;
        Ok(())
    }
}

/// IEEE-754 double precision, 8 octets big-endian.
impl Serialize for f64 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_f64::<XdrEndian>(*self)
    }
}

impl Deserialize for f64 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_f64::<XdrEndian>()?;
        Ok(())
    }
}

/// Fixed-length opaque data: the octets themselves followed by padding.
impl<const N: usize> Serialize for [u8; N] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_all(self)?;
        write_padding(N, dest)
    }
}

impl<const N: usize> Deserialize for [u8; N] {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        src.read_exact(self)?;
        read_padding(N, src)
    }
}

/// Variable-length opaque data: length prefix, octets, padding.
impl Serialize for Vec<u8> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        assert!(self.len() < u32::MAX as usize);
        let length = self.len() as u32;
        length.serialize(dest)?;
        dest.write_all(self)?;
        write_padding(self.len(), dest)
    }
}

impl Deserialize for Vec<u8> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let length = deserialize::<u32>(src)? as usize;
        self.clear();
        // Fill in bounded chunks; a short read fails before a hostile length
        // prefix can reserve the whole declared size.
        while self.len() < length {
            let step = (length - self.len()).min(OPAQUE_READ_CHUNK);
            let start = self.len();
            self.resize(start + step, 0);
            src.read_exact(&mut self[start..])?;
        }
        read_padding(length, src)
    }
}

/// Strings are variable-length opaque UTF-8. Malformed UTF-8 is a decode
/// error. A null/absent string encodes as length 0 and decodes to "".
impl Serialize for String {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.as_bytes().to_vec().serialize(dest)
    }
}

impl Deserialize for String {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let raw = deserialize::<Vec<u8>>(src)?;
        *self = String::from_utf8(raw)
            .map_err(|e| invalid_data(format!("string is not valid UTF-8: {e}")))?;
        Ok(())
    }
}

/// Optional data: a boolean discriminator, then the value when present.
impl<T: Serialize> Serialize for Option<T> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            None => false.serialize(dest),
            Some(v) => {
                true.serialize(dest)?;
                v.serialize(dest)
            }
        }
    }
}

impl<T: Deserialize + Default> Deserialize for Option<T> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let present = deserialize::<bool>(src)?;
        if present {
            *self = Some(deserialize::<T>(src)?);
        } else {
            *self = None;
        }
        Ok(())
    }
}

impl<T: Serialize> Serialize for Box<T> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.as_ref().serialize(dest)
    }
}

impl<T: Deserialize + Default> Deserialize for Box<T> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.as_mut().deserialize(src)
    }
}

/// Implements [`Serialize`] for a struct by serializing each named field in
/// declaration order.
#[macro_export]
macro_rules! SerializeStruct {
    (
        $t:ident,
        $($element:ident),*
    ) => {
        impl $crate::xdr::Serialize for $t {
            fn serialize<W: std::io::Write>(&self, dest: &mut W) -> std::io::Result<()> {
                $($crate::xdr::Serialize::serialize(&self.$element, dest)?;)*
                Ok(())
            }
        }
    };
}

/// Implements [`Deserialize`] for a struct by deserializing each named field
/// in declaration order.
#[macro_export]
macro_rules! DeserializeStruct {
    (
        $t:ident,
        $($element:ident),*
    ) => {
        impl $crate::xdr::Deserialize for $t {
            fn deserialize<R: std::io::Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                $($crate::xdr::Deserialize::deserialize(&mut self.$element, src)?;)*
                Ok(())
            }
        }
    };
}

/// Implements [`Serialize`] for a fieldless enum as its 32-bit discriminant.
#[macro_export]
macro_rules! SerializeEnum {
    ($t:ident) => {
        impl $crate::xdr::Serialize for $t {
            fn serialize<W: std::io::Write>(&self, dest: &mut W) -> std::io::Result<()> {
                $crate::xdr::Serialize::serialize(&(*self as u32), dest)
            }
        }
    };
}

/// Implements [`Deserialize`] for a fieldless enum, rejecting discriminants
/// the enum does not define.
#[macro_export]
macro_rules! DeserializeEnum {
    ($t:ident) => {
        impl $crate::xdr::Deserialize for $t {
            fn deserialize<R: std::io::Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                let raw = $crate::xdr::deserialize::<u32>(src)?;
                match <$t as num_traits::FromPrimitive>::from_u32(raw) {
                    Some(v) => {
                        *self = v;
                        Ok(())
                    }
                    None => Err($crate::xdr::invalid_data(format!(
                        "invalid value {} for {}",
                        raw,
                        stringify!($t)
                    ))),
                }
            }
        }
    };
}

/// Implements [`Serialize`] for `Vec<$t>` as a counted array.
#[macro_export]
macro_rules! SerializeVec {
    ($t:ty) => {
        impl $crate::xdr::Serialize for Vec<$t> {
            fn serialize<W: std::io::Write>(&self, dest: &mut W) -> std::io::Result<()> {
                assert!(self.len() < u32::MAX as usize);
                $crate::xdr::Serialize::serialize(&(self.len() as u32), dest)?;
                for item in self {
                    $crate::xdr::Serialize::serialize(item, dest)?;
                }
                Ok(())
            }
        }
    };
}

/// Implements [`Deserialize`] for `Vec<$t>` as a counted array.
#[macro_export]
macro_rules! DeserializeVec {
    ($t:ty) => {
        impl $crate::xdr::Deserialize for Vec<$t> {
            fn deserialize<R: std::io::Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                let count = $crate::xdr::deserialize::<u32>(src)? as usize;
                self.clear();
                for _ in 0..count {
                    self.push($crate::xdr::deserialize::<$t>(src)?);
                }
                Ok(())
            }
        }
    };
}

SerializeVec!(u32);
DeserializeVec!(u32);
SerializeVec!(u64);
DeserializeVec!(u64);

// Re-export the macro family for use in other modules.
pub use crate::DeserializeEnum;
pub use crate::DeserializeStruct;
pub use crate::DeserializeVec;
pub use crate::SerializeEnum;
pub use crate::SerializeStruct;
pub use crate::SerializeVec;
