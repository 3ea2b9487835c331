//! Extension-chain helpers.
//!
//! Chains are typed `Vec`s of enum members rather than raw `pNext` pointers,
//! so consuming a member is an explicit extraction that leaves the rest of
//! the chain intact for forwarding.

use tracing::warn;

/// Extracts the first chain member `pick` recognizes, removing every
/// recognized member from the chain. Duplicates are reported and discarded
/// rather than silently kept.
pub fn extract_one<E, T>(
    chain: &mut Vec<E>,
    mut pick: impl FnMut(&E) -> Option<T>,
    what: &str,
) -> Option<T> {
    let mut found = None;
    chain.retain(|member| match pick(member) {
        Some(value) => {
            if found.is_some() {
                warn!(member = what, "duplicate extension chain member, keeping the first");
            } else {
                found = Some(value);
            }
            false
        }
        None => true,
    });
    found
}
