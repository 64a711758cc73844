//! The seam between the stateless substrate service and the atom lookup
//! cache: a trait so `compute_composition` does not need to name
//! `substrate_atoms::AtomLookup`'s concrete source type.

use substrate_atoms::{AtomLookup, AtomSource};
use substrate_geometry::Vec4;
use substrate_hash::Hash128;

/// Just enough about an atom for composition/relation projection: its
/// identity and its S3 position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtomPoint {
    pub atom_id: Hash128,
    pub position: Vec4,
}

/// An atom resolution plus whether this was the first time the resolver
/// produced it this session (`spec.md` §4.6 `atoms_new`: "new" counts
/// only identities the session cache had never seen).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedAtom {
    pub point: AtomPoint,
    pub is_new: bool,
}

/// Resolves a codepoint to its atom, or `None` if the codepoint has never
/// been seeded into the store (`spec.md` §4.3 failure mode: the caller
/// drops it silently).
pub trait AtomResolver {
    type Error: std::error::Error + Send + Sync + 'static;

    fn resolve(&self, codepoint: u32) -> Result<Option<ResolvedAtom>, Self::Error>;
}

impl<S: AtomSource> AtomResolver for AtomLookup<S> {
    type Error = substrate_atoms::AtomLookupError<S::Error>;

    fn resolve(&self, codepoint: u32) -> Result<Option<ResolvedAtom>, Self::Error> {
        let is_new = !self.contains(codepoint);
        Ok(self.lookup(codepoint)?.map(|info| ResolvedAtom {
            point: AtomPoint {
                atom_id: info.atom_id,
                position: info.position,
            },
            is_new,
        }))
    }
}
