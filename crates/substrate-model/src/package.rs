//! Loads a model package: a newline-delimited vocabulary and a row-major,
//! little-endian `f32` embedding matrix, both plain files under one
//! directory. `spec.md` §4.8 only specifies the shape `(vocab_size, dim)`;
//! the flat-file layout below is this ingester's concrete choice.

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("embeddings.f32 has {bytes} bytes, not divisible into {vocab_size} rows")]
    MatrixSizeMismatch { bytes: usize, vocab_size: usize },
    #[error("vocab.txt contains no tokens")]
    EmptyVocabulary,
}

/// A loaded `(vocabulary, embedding matrix)` pair. `row(i)` returns the
/// embedding for `tokens[i]`.
pub struct ModelPackage {
    pub tokens: Vec<String>,
    pub dim: usize,
    rows: Vec<f32>,
}

impl ModelPackage {
    pub fn load(package_dir: &Path) -> Result<Self, PackageError> {
        let vocab_path = package_dir.join("vocab.txt");
        let vocab_text = fs::read_to_string(&vocab_path).map_err(|source| PackageError::Io {
            path: vocab_path.clone(),
            source,
        })?;
        let tokens: Vec<String> = vocab_text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        if tokens.is_empty() {
            return Err(PackageError::EmptyVocabulary);
        }

        let matrix_path = package_dir.join("embeddings.f32");
        let bytes = fs::read(&matrix_path).map_err(|source| PackageError::Io {
            path: matrix_path.clone(),
            source,
        })?;
        if bytes.len() % 4 != 0 || (bytes.len() / 4) % tokens.len() != 0 {
            return Err(PackageError::MatrixSizeMismatch {
                bytes: bytes.len(),
                vocab_size: tokens.len(),
            });
        }
        let dim = bytes.len() / 4 / tokens.len();
        let rows: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
            .collect();

        Ok(ModelPackage { tokens, dim, rows })
    }

    pub fn vocab_size(&self) -> usize {
        self.tokens.len()
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.rows[index * self.dim..(index + 1) * self.dim]
    }
}
