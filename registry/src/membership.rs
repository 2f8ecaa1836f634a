use crate::{Don, PeerId};

/// Returns true if `peer` is a member of `don`.
pub fn is_member_of_don(don: &Don, peer: &PeerId) -> bool {
    don.members.iter().any(|member| member == peer)
}

/// Returns true if `peer` is part of the bootstrap subcommittee of some configuration.
pub fn is_member_of_bootstrap_subcommittee(bootstrap: &[PeerId], peer: &PeerId) -> bool {
    bootstrap.iter().any(|member| member == peer)
}
