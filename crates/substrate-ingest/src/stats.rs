//! Running counters a caller gets back from an ingestion call
//! (`spec.md` §4.6 "Reporting", §6 `IngestionStats`).

/// "New" counts only identities the session cache had never seen before
/// this call. Re-ingesting an already-seen document yields all zeros
/// here even though the document was fully processed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestionStats {
    pub atoms_new: u64,
    pub compositions_new: u64,
    pub relations_new: u64,
    pub original_bytes: u64,
    pub stored_bytes: u64,
}

impl IngestionStats {
    pub fn merge(&mut self, other: &IngestionStats) {
        self.atoms_new += other.atoms_new;
        self.compositions_new += other.compositions_new;
        self.relations_new += other.relations_new;
        self.original_bytes += other.original_bytes;
        self.stored_bytes += other.stored_bytes;
    }
}
