//! Portmapper wire structures (RFC 1833, version 2 mapping program).
//!
//! The runtime is a portmap *client*: it registers its own programs with
//! the host's portmapper on startup and withdraws them on shutdown.

#![allow(non_camel_case_types)]

use num_derive::{FromPrimitive, ToPrimitive};

use super::{DeserializeStruct, SerializeStruct};

/// Portmap RPC program number.
pub const PROGRAM: u32 = 100000;
/// Portmap RPC program version.
pub const VERSION: u32 = 2;
/// Well-known portmapper port.
pub const PORT: u16 = 111;

/// Protocol number for TCP.
pub const IPPROTO_TCP: u32 = 6;
/// Protocol number for UDP.
pub const IPPROTO_UDP: u32 = 17;

/// One (program, version, protocol) → port binding.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct mapping {
    pub prog: u32,
    pub vers: u32,
    /// [`IPPROTO_TCP`] or [`IPPROTO_UDP`].
    pub prot: u32,
    pub port: u32,
}
DeserializeStruct!(mapping, prog, vers, prot, port);
SerializeStruct!(mapping, prog, vers, prot, port);

/// Linked list of bindings returned by DUMP.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct pmaplist {
    pub map: mapping,
    pub next: Option<Box<pmaplist>>,
}
DeserializeStruct!(pmaplist, map, next);
SerializeStruct!(pmaplist, map, next);

/// Procedure numbers of the portmap program.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum PortmapProcedure {
    PMAPPROC_NULL = 0,
    PMAPPROC_SET = 1,
    PMAPPROC_UNSET = 2,
    PMAPPROC_GETPORT = 3,
    PMAPPROC_DUMP = 4,
    PMAPPROC_CALLIT = 5,
}
