//! The store interface contract (`spec.md` §6) and a `redb`-backed
//! reference implementation, grounded on the index crate's
//! `RedbBackend` generalized from a single opaque key-value table to the
//! seven typed tables the substrate service produces.

pub mod wire;

use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use substrate_atoms::{AtomInfo, AtomSource};
use substrate_cache::IdentitySource;
use substrate_core::{
    CompositionRecord, CompositionSequenceRecord, PhysicalityRecord, RelationEvidenceRecord,
    RelationRatingRecord, RelationRecord, RelationSequenceRecord, SubstrateBatch,
};
use substrate_geometry::{HilbertIndex, Vec4};
use substrate_hash::Hash128;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// What the flusher and the caches need from a store, independent of
/// backend. A real deployment might implement this over a SQL connection
/// pool instead of `redb`; the bulk-insert methods map to the wire
/// formats in [`wire`] either way.
pub trait SubstrateStore {
    /// Write all seven record streams of one batch in the fixed order
    /// `spec.md` §4.7 mandates, in a single transaction. Primary-key
    /// duplicates are ignored except in the rating table, where rows are
    /// merged under the upsert law (`spec.md` §4.7 step 4).
    fn write_batch(&self, batch: &SubstrateBatch) -> Result<(), StoreError>;
}

const ATOM_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("atoms");
const PHYS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("physicalities");
const COMP_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("compositions");
const COMP_SEQ_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("composition_sequences");
const REL_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("relations");
const REL_SEQ_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("relation_sequences");
const REL_RATING_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("relation_ratings");
const REL_EVIDENCE_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("relation_evidence");

/// Embedded reference store. One `redb` table per entity kind, keyed by
/// that entity's content-addressed id (or, for atoms, the codepoint).
/// Row values reuse the bit-exact wire encodings from [`wire`] so the
/// geometry columns match what a SQL-backed store would persist.
///
/// Cheap to clone: every clone shares the same underlying `Database`
/// handle, so callers that need several owners of one open database
/// (a resolver, a cache, a flusher's worker threads) should open it
/// once and clone it rather than opening the file again.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        let txn = db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            txn.open_table(ATOM_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            txn.open_table(PHYS_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            txn.open_table(COMP_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            txn.open_table(COMP_SEQ_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            txn.open_table(REL_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            txn.open_table(REL_SEQ_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            txn.open_table(REL_RATING_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            txn.open_table(REL_EVIDENCE_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(RedbStore { db: Arc::new(db) })
    }

    /// Seed an atom row directly. Used by store setup/migration tooling,
    /// not by the ingestion pipeline itself (`spec.md` §1: atom seeding is
    /// out of this crate's scope, but a reference store still needs a way
    /// to accept seeded rows).
    pub fn put_atom(&self, info: &AtomInfo) -> Result<(), StoreError> {
        let key = info.codepoint.to_le_bytes();
        let value = encode_atom(info);
        let txn = self.db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let mut table = txn.open_table(ATOM_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            table.insert(key.as_slice(), value.as_slice()).map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

impl SubstrateStore for RedbStore {
    fn write_batch(&self, batch: &SubstrateBatch) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let mut phys = txn.open_table(PHYS_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            for row in &batch.physicalities {
                let key = row.phys_id.as_bytes();
                if phys.get(key).map_err(|e| StoreError::Backend(e.to_string()))?.is_some() {
                    continue;
                }
                phys.insert(key, encode_physicality(row).as_slice())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }

            let mut comp = txn.open_table(COMP_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            for row in &batch.compositions {
                let key = row.comp_id.as_bytes();
                if comp.get(key).map_err(|e| StoreError::Backend(e.to_string()))?.is_some() {
                    continue;
                }
                comp.insert(key, encode_composition(row).as_slice())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }

            let mut comp_seq = txn.open_table(COMP_SEQ_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            for row in &batch.composition_sequences {
                let key = row.seq_id.as_bytes();
                if comp_seq.get(key).map_err(|e| StoreError::Backend(e.to_string()))?.is_some() {
                    continue;
                }
                comp_seq
                    .insert(key, encode_composition_sequence(row).as_slice())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }

            let mut rel = txn.open_table(REL_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            for row in &batch.relations {
                let key = row.rel_id.as_bytes();
                if rel.get(key).map_err(|e| StoreError::Backend(e.to_string()))?.is_some() {
                    continue;
                }
                rel.insert(key, encode_relation(row).as_slice())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }

            let mut rel_seq = txn.open_table(REL_SEQ_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            for row in &batch.relation_sequences {
                let key = row.rseq_id.as_bytes();
                if rel_seq.get(key).map_err(|e| StoreError::Backend(e.to_string()))?.is_some() {
                    continue;
                }
                rel_seq
                    .insert(key, encode_relation_sequence(row).as_slice())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }

            let mut rating = txn.open_table(REL_RATING_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            for row in &batch.relation_ratings {
                let key = row.rel_id.as_bytes();
                let existing = rating
                    .get(key)
                    .map_err(|e| StoreError::Backend(e.to_string()))?
                    .map(|v| decode_rating(v.value()))
                    .transpose()
                    .map_err(StoreError::CorruptRow)?;
                let merged = merge_rating(existing, row);
                rating
                    .insert(key, encode_rating(&merged).as_slice())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }

            let mut evidence = txn.open_table(REL_EVIDENCE_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
            for row in &batch.relation_evidence {
                let key = row.ev_id.as_bytes();
                if evidence.get(key).map_err(|e| StoreError::Backend(e.to_string()))?.is_some() {
                    continue;
                }
                evidence
                    .insert(key, encode_evidence(row).as_slice())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// The rating upsert law (`spec.md` §4.7 step 4, §8 "Rating upsert law"):
/// `observations += incoming.observations`, `rating = (rating ·
/// old_observations + incoming.rating) / (old_observations + 1)`. With
/// unit increments this converges to the arithmetic mean of all observed
/// ratings regardless of merge order.
fn merge_rating(
    existing: Option<RelationRatingRecord>,
    incoming: &RelationRatingRecord,
) -> RelationRatingRecord {
    match existing {
        None => *incoming,
        Some(current) => RelationRatingRecord {
            rel_id: current.rel_id,
            observations: current.observations + incoming.observations,
            rating: (current.rating * current.observations as f64 + incoming.rating)
                / (current.observations + 1) as f64,
            k_factor: incoming.k_factor,
        },
    }
}

impl AtomSource for RedbStore {
    type Error = StoreError;

    fn stream_all(&self, visitor: &mut dyn FnMut(AtomInfo)) -> Result<(), StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = txn.open_table(ATOM_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
        for item in table.iter().map_err(|e| StoreError::Backend(e.to_string()))? {
            let (_, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            visitor(decode_atom(value.value()).map_err(StoreError::CorruptRow)?);
        }
        Ok(())
    }

    fn fetch_batch(&self, codepoints: &[u32]) -> Result<Vec<AtomInfo>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = txn.open_table(ATOM_TABLE).map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut out = Vec::new();
        for &cp in codepoints {
            let key = cp.to_le_bytes();
            if let Some(value) = table.get(key.as_slice()).map_err(|e| StoreError::Backend(e.to_string()))? {
                out.push(decode_atom(value.value()).map_err(StoreError::CorruptRow)?);
            }
        }
        Ok(out)
    }
}

impl IdentitySource for RedbStore {
    type Error = StoreError;

    fn composition_ids(&self, visitor: &mut dyn FnMut(Hash128)) -> Result<(), StoreError> {
        stream_ids(&self.db, COMP_TABLE, visitor)
    }

    fn physicality_ids(&self, visitor: &mut dyn FnMut(Hash128)) -> Result<(), StoreError> {
        stream_ids(&self.db, PHYS_TABLE, visitor)
    }

    fn relation_ids(&self, visitor: &mut dyn FnMut(Hash128)) -> Result<(), StoreError> {
        stream_ids(&self.db, REL_TABLE, visitor)
    }
}

fn stream_ids(
    db: &Database,
    table_def: TableDefinition<&[u8], &[u8]>,
    visitor: &mut dyn FnMut(Hash128),
) -> Result<(), StoreError> {
    let txn = db.begin_read().map_err(|e| StoreError::Backend(e.to_string()))?;
    let table = txn.open_table(table_def).map_err(|e| StoreError::Backend(e.to_string()))?;
    for item in table.iter().map_err(|e| StoreError::Backend(e.to_string()))? {
        let (key, _) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut buf = [0u8; 16];
        buf.copy_from_slice(key.value());
        visitor(Hash128(buf));
    }
    Ok(())
}

fn encode_physicality(row: &PhysicalityRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + 16 + 37 + 9 + row.trajectory.len() * 32);
    out.extend_from_slice(row.phys_id.as_bytes());
    out.extend_from_slice(&wire::hilbert_be_bytes(&row.hilbert));
    out.extend_from_slice(&wire::point_zm_wkb(&row.centroid));
    out.extend_from_slice(&wire::linestring_zm_wkb(&row.trajectory));
    out
}

fn decode_physicality(bytes: &[u8]) -> Result<PhysicalityRecord, String> {
    if bytes.len() < 16 + 16 + 37 {
        return Err(format!("physicality row too short: {} bytes", bytes.len()));
    }
    let phys_id = read_hash(&bytes[0..16]);
    let hilbert = HilbertIndex::from_be_bytes(bytes[16..32].try_into().unwrap());
    let mut point_buf = [0u8; 37];
    point_buf.copy_from_slice(&bytes[32..69]);
    let centroid = wire::point_zm_from_wkb(&point_buf);
    let trajectory = wire::linestring_zm_from_wkb(&bytes[69..])?;
    Ok(PhysicalityRecord {
        phys_id,
        centroid,
        hilbert,
        trajectory,
    })
}

fn encode_composition(row: &CompositionRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(row.comp_id.as_bytes());
    out.extend_from_slice(row.phys_id.as_bytes());
    out
}

fn encode_composition_sequence(row: &CompositionSequenceRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 * 3 + 8);
    out.extend_from_slice(row.seq_id.as_bytes());
    out.extend_from_slice(row.comp_id.as_bytes());
    out.extend_from_slice(row.atom_id.as_bytes());
    out.extend_from_slice(&row.ordinal.to_le_bytes());
    out.extend_from_slice(&row.occurrences.to_le_bytes());
    out
}

fn encode_relation(row: &RelationRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(row.rel_id.as_bytes());
    out.extend_from_slice(row.phys_id.as_bytes());
    out
}

fn encode_relation_sequence(row: &RelationSequenceRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 * 3 + 8);
    out.extend_from_slice(row.rseq_id.as_bytes());
    out.extend_from_slice(row.rel_id.as_bytes());
    out.extend_from_slice(row.comp_id.as_bytes());
    out.extend_from_slice(&row.ordinal.to_le_bytes());
    out.extend_from_slice(&row.occurrences.to_le_bytes());
    out
}

fn encode_rating(row: &RelationRatingRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + 8 + 8 + 8);
    out.extend_from_slice(row.rel_id.as_bytes());
    out.extend_from_slice(&row.observations.to_le_bytes());
    out.extend_from_slice(&row.rating.to_le_bytes());
    out.extend_from_slice(&row.k_factor.to_le_bytes());
    out
}

fn decode_rating(bytes: &[u8]) -> Result<RelationRatingRecord, String> {
    if bytes.len() != 40 {
        return Err(format!("rating row wrong length: {} bytes", bytes.len()));
    }
    Ok(RelationRatingRecord {
        rel_id: read_hash(&bytes[0..16]),
        observations: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
        rating: f64::from_le_bytes(bytes[24..32].try_into().unwrap()),
        k_factor: f64::from_le_bytes(bytes[32..40].try_into().unwrap()),
    })
}

fn encode_evidence(row: &RelationEvidenceRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 * 3 + 1 + 8 + 8);
    out.extend_from_slice(row.ev_id.as_bytes());
    out.extend_from_slice(row.content_id.as_bytes());
    out.extend_from_slice(row.rel_id.as_bytes());
    out.push(if row.is_valid { 1 } else { 0 });
    out.extend_from_slice(&row.source_rating.to_le_bytes());
    out.extend_from_slice(&row.signal_strength.to_le_bytes());
    out
}

fn encode_atom(info: &AtomInfo) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + 4 + 16 + 32 + 16);
    out.extend_from_slice(info.atom_id.as_bytes());
    out.extend_from_slice(&info.codepoint.to_le_bytes());
    out.extend_from_slice(info.phys_id.as_bytes());
    out.extend_from_slice(&info.position.to_le_bytes());
    out.extend_from_slice(&wire::hilbert_be_bytes(&info.hilbert));
    out
}

fn decode_atom(bytes: &[u8]) -> Result<AtomInfo, String> {
    if bytes.len() != 16 + 4 + 16 + 32 + 16 {
        return Err(format!("atom row wrong length: {} bytes", bytes.len()));
    }
    let atom_id = read_hash(&bytes[0..16]);
    let codepoint = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    let phys_id = read_hash(&bytes[20..36]);
    let mut pos_bytes = [0u8; 32];
    pos_bytes.copy_from_slice(&bytes[36..68]);
    let position = Vec4::from_array(le_bytes_to_f64x4(pos_bytes));
    let hilbert = HilbertIndex::from_be_bytes(bytes[68..84].try_into().unwrap());
    Ok(AtomInfo {
        atom_id,
        codepoint,
        phys_id,
        position,
        hilbert,
    })
}

fn le_bytes_to_f64x4(bytes: [u8; 32]) -> [f64; 4] {
    [
        f64::from_le_bytes(bytes[0..8].try_into().unwrap()),
        f64::from_le_bytes(bytes[8..16].try_into().unwrap()),
        f64::from_le_bytes(bytes[16..24].try_into().unwrap()),
        f64::from_le_bytes(bytes[24..32].try_into().unwrap()),
    ]
}

fn read_hash(bytes: &[u8]) -> Hash128 {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(bytes);
    Hash128(buf)
}
