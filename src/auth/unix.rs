//! AUTH_SYS (AUTH_UNIX) credential body (RFC 5531 appendix A).

use std::io::{Read, Write};

use smallvec::SmallVec;

use crate::xdr::{deserialize, invalid_data, Deserialize, Serialize};

/// Longest machine name the credential may carry.
pub const MAX_MACHINE_NAME_LENGTH: usize = 255;
/// Most supplementary gids the credential may carry.
pub const MAX_GIDS: usize = 16;

/// Parsed AUTH_SYS credential.
///
/// The caller asserts this identity; nothing about AUTH_SYS is verified
/// cryptographically, which is why it is accepted as-is and merely recorded
/// on the call context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthUnixParams {
    /// Arbitrary client-chosen stamp.
    pub stamp: u32,
    /// Caller's machine name, at most 255 octets. Not required to be UTF-8.
    pub machinename: Vec<u8>,
    /// Effective user id.
    pub uid: u32,
    /// Effective group id.
    pub gid: u32,
    /// Supplementary group ids, at most 16.
    pub gids: SmallVec<[u32; MAX_GIDS]>,
}

impl AuthUnixParams {
    /// Parses the opaque body of an AUTH_SYS credential.
    pub fn parse(body: &[u8]) -> std::io::Result<AuthUnixParams> {
        let mut cursor = std::io::Cursor::new(body);
        deserialize::<AuthUnixParams>(&mut cursor)
    }
}

impl Serialize for AuthUnixParams {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        assert!(self.machinename.len() <= MAX_MACHINE_NAME_LENGTH);
        assert!(self.gids.len() <= MAX_GIDS);
        self.stamp.serialize(dest)?;
        self.machinename.serialize(dest)?;
        self.uid.serialize(dest)?;
        self.gid.serialize(dest)?;
        (self.gids.len() as u32).serialize(dest)?;
        for gid in &self.gids {
            gid.serialize(dest)?;
        }
        Ok(())
    }
}

impl Deserialize for AuthUnixParams {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.stamp.deserialize(src)?;
        self.machinename.deserialize(src)?;
        if self.machinename.len() > MAX_MACHINE_NAME_LENGTH {
            return Err(invalid_data(format!(
                "machine name of {} octets exceeds {}",
                self.machinename.len(),
                MAX_MACHINE_NAME_LENGTH
            )));
        }
        self.uid.deserialize(src)?;
        self.gid.deserialize(src)?;
        let count = deserialize::<u32>(src)? as usize;
        if count > MAX_GIDS {
            return Err(invalid_data(format!("{count} gids exceed the limit of {MAX_GIDS}")));
        }
        self.gids.clear();
        for _ in 0..count {
            self.gids.push(deserialize::<u32>(src)?);
        }
        Ok(())
    }
}
