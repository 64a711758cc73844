//! S3 point geometry, Hilbert-4D indexing, and trajectory decimation.
//!
//! This crate is the geometry sub-system of the substrate pipeline: it
//! defines the S3 point type, the centroid/normalize operations used to
//! project compositions and relations onto the sphere, the Hilbert-4D
//! space-filling curve that turns an S3 point into a 128-bit sortable
//! index, and the trajectory cap that keeps stored point sequences
//! bounded. Every function here is pure: no I/O, no shared state, no
//! reliance on wall-clock time.

pub mod hilbert;
pub mod point;
pub mod trajectory;

pub use hilbert::{decode as hilbert_decode, encode as hilbert_encode, EntityType, HilbertIndex};
pub use point::{centroid, normalize, Vec4, BASEPOINT, NORM_EPSILON};
pub use trajectory::{decimate as decimate_trajectory, MAX_TRAJECTORY_POINTS};
