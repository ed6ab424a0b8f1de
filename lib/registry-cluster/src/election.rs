//! Leader election over the known member set

use registry_core::Server;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Stable identity hash of a member URL.
///
/// Every node computes the same value for the same URL, which is what makes
/// the election agree across nodes that observe the same membership.
pub fn identity_hash(url: &str) -> u64 {
    let digest = Sha256::digest(url.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Pick the leader among `members` and set the `leader` flags accordingly.
///
/// - no members: `myself` wins
/// - one member: that member wins
/// - otherwise the reachable member with the smallest [`identity_hash`] wins,
///   the first one seen keeping ties; `myself` counts as reachable whatever
///   its `status` flag says
/// - nobody reachable: `myself` wins
///
/// Every member is cleared first, so afterwards at most one member (exactly
/// one when the winner is in `members`) has `leader == true`. Returns the
/// winner's URL.
pub fn elect(myself: &Server, members: &mut [Server]) -> String {
    debug!("Electing leader from {} members", members.len());

    let winner = match members.len() {
        0 => myself.url.clone(),
        1 => members[0].url.clone(),
        _ => {
            let mut candidate: Option<(&str, u64)> = None;
            for member in members.iter() {
                if !(member.status || member.url == myself.url) {
                    continue;
                }
                let hash = identity_hash(&member.url);
                match candidate {
                    Some((_, best)) if hash >= best => {}
                    _ => candidate = Some((member.url.as_str(), hash)),
                }
            }
            candidate
                .map(|(url, _)| url.to_string())
                .unwrap_or_else(|| myself.url.clone())
        }
    };

    for member in members.iter_mut() {
        member.leader = member.url == winner;
    }

    info!("Elected leader {}", winner);
    winner
}
