use crate::{CapabilityId, Don, DonId, Error, Snapshot};
use std::collections::BTreeMap;

/// Changes between the registry state already applied locally and the latest [Snapshot].
///
/// The three maps are disjoint. DONs that appear in none of them are unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diff {
    /// DONs present in the latest snapshot but not yet applied.
    pub added: BTreeMap<DonId, Don>,

    /// DONs applied previously that are absent from the latest snapshot.
    pub removed: BTreeMap<DonId, Don>,

    /// DONs present in both whose `config_count` increased.
    pub updated: BTreeMap<DonId, Don>,
}

impl Diff {
    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    /// Returns the number of DONs that changed.
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.updated.len()
    }
}

/// Select the DONs that carry a configuration for `capability`.
pub fn filter(capability: &CapabilityId, dons: &BTreeMap<DonId, Don>) -> BTreeMap<DonId, Don> {
    dons.iter()
        .filter(|(_, don)| don.serves(capability))
        .map(|(id, don)| (*id, don.clone()))
        .collect()
}

/// Compare the DONs already applied for `capability` against the `latest` [Snapshot].
///
/// Fails if `capability` is not registered in `latest`.
///
/// A DON is only considered updated if its `config_count` strictly increased. A decrease is
/// treated as no change.
pub fn diff(
    capability: &CapabilityId,
    applied: &BTreeMap<DonId, Don>,
    latest: &Snapshot,
) -> Result<Diff, Error> {
    if !latest.capabilities.contains_key(capability) {
        return Err(Error::CapabilityNotFound(capability.clone()));
    }
    let current = filter(capability, &latest.dons);

    let mut result = Diff::default();
    for (id, don) in current.iter() {
        match applied.get(id) {
            None => {
                result.added.insert(*id, don.clone());
            }
            Some(previous) if don.config_count > previous.config_count => {
                result.updated.insert(*id, don.clone());
            }
            Some(_) => {}
        }
    }
    for (id, don) in applied.iter() {
        if !current.contains_key(id) {
            result.removed.insert(*id, don.clone());
        }
    }
    Ok(result)
}
