//! Address allocation over an account network.
//!
//! Pure functions: the caller supplies the CIDR, the set of addresses in
//! use, and optionally the allocation watermark. Nothing here carries state
//! between calls, which keeps the allocator trivially property-testable.

use std::{collections::HashSet, net::Ipv4Addr};

use ipnet::Ipv4Net;

use crate::error::CoreError;

/// First free host address in `net`, scanning ascending.
///
/// The network and broadcast addresses are never handed out, nor is any
/// member of `taken`.
///
/// # Errors
///
/// Returns [`CoreError::Exhausted`] when every host address is taken.
pub fn allocate(net: Ipv4Net, taken: &HashSet<Ipv4Addr>) -> Result<Ipv4Addr, CoreError> {
    allocate_after(net, None, taken)
}

/// First free host address strictly greater than `watermark`.
///
/// This is the allocation the account manager performs: the watermark is
/// the most recently assigned address, so scanning past it guarantees a
/// deleted peer's address is never reissued for the lifetime of the
/// account. With `watermark = None` this is plain ascending allocation.
///
/// # Errors
///
/// Returns [`CoreError::Exhausted`] when no host address past the watermark
/// is free.
pub fn allocate_after(
    net: Ipv4Net,
    watermark: Option<Ipv4Addr>,
    taken: &HashSet<Ipv4Addr>,
) -> Result<Ipv4Addr, CoreError> {
    net.hosts()
        .filter(|addr| watermark.map_or(true, |mark| *addr > mark))
        .find(|addr| !taken.contains(addr))
        .ok_or_else(|| CoreError::Exhausted(format!("no free address in {net}")))
}
