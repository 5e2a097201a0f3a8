//! Flat vector backend.
//!
//! Vectors live in one contiguous buffer, scanned exhaustively on search.
//! O(n) per query, fine for the index sizes this service targets.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use super::vectors::cosine_similarity;
use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"EMBV";
const FORMAT_VERSION: u32 = 1;
const ARTIFACT: &str = "embeddings";
/// Magic, version, dimensions (u32) and count (u64)
const HEADER_LEN: u64 = 20;

pub struct FlatIndex {
    dimensions: usize,
    ids: Vec<String>,
    data: Vec<f32>,
    positions: HashMap<String, usize>,
}

impl FlatIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            ids: Vec::new(),
            data: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.data.clear();
        self.positions.clear();
    }

    /// Insert or replace the vector stored under `id`
    pub fn upsert(&mut self, id: &str, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::Config(format!(
                "vector for `{}` has {} dimensions, index expects {}",
                id,
                vector.len(),
                self.dimensions
            )));
        }

        match self.positions.get(id) {
            Some(&pos) => {
                let start = pos * self.dimensions;
                self.data[start..start + self.dimensions].copy_from_slice(vector);
            }
            None => {
                self.positions.insert(id.to_string(), self.ids.len());
                self.ids.push(id.to_string());
                self.data.extend_from_slice(vector);
            }
        }
        Ok(())
    }

    /// Remove `id`; returns whether it was present
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(pos) = self.positions.remove(id) else {
            return false;
        };

        let last = self.ids.len() - 1;
        if pos != last {
            let (head, tail) = self.data.split_at_mut(last * self.dimensions);
            head[pos * self.dimensions..(pos + 1) * self.dimensions]
                .copy_from_slice(&tail[..self.dimensions]);
            self.ids.swap(pos, last);
            self.positions.insert(self.ids[pos].clone(), pos);
        }
        self.ids.pop();
        self.data.truncate(last * self.dimensions);
        true
    }

    pub fn get(&self, id: &str) -> Option<&[f32]> {
        self.positions
            .get(id)
            .map(|&pos| &self.data[pos * self.dimensions..(pos + 1) * self.dimensions])
    }

    /// Similarity of `query` against every stored vector, unsorted
    pub fn scores(&self, query: &[f32]) -> Vec<(String, f32)> {
        self.ids
            .iter()
            .zip(self.data.chunks_exact(self.dimensions.max(1)))
            .map(|(id, vector)| (id.clone(), cosine_similarity(query, vector)))
            .collect()
    }

    /// Top `limit` matches by descending similarity, ties by id
    pub fn search(&self, query: &[f32], limit: usize) -> Vec<(String, f32)> {
        let mut results = self.scores(query);
        rank(&mut results);
        results.truncate(limit);
        results
    }

    /// Write the `embeddings` artifact
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        file.write_all(MAGIC)?;
        file.write_all(&FORMAT_VERSION.to_le_bytes())?;
        file.write_all(&(self.dimensions as u32).to_le_bytes())?;
        file.write_all(&(self.ids.len() as u64).to_le_bytes())?;

        for (id, vector) in self.ids.iter().zip(self.data.chunks_exact(self.dimensions.max(1))) {
            file.write_all(&(id.len() as u32).to_le_bytes())?;
            file.write_all(id.as_bytes())?;
            file.write_all(&vector_to_bytes(vector))?;
        }
        file.flush()?;
        Ok(())
    }

    /// Read an `embeddings` artifact written by [`FlatIndex::save`]
    ///
    /// Header counts are checked against the file length before anything is
    /// allocated from them.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut remaining = file.metadata()?.len();
        let mut file = std::io::BufReader::new(file);

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(corrupt("bad magic header"));
        }
        let version = read_u32(&mut file)?;
        if version != FORMAT_VERSION {
            return Err(corrupt(&format!("unsupported format version {}", version)));
        }
        let dimensions = read_u32(&mut file)? as usize;
        let mut count_bytes = [0u8; 8];
        file.read_exact(&mut count_bytes)?;
        let count = u64::from_le_bytes(count_bytes);
        remaining = remaining.saturating_sub(HEADER_LEN);

        let vector_len = (dimensions as u64) * 4;
        let min_record = 4 + vector_len;
        if count
            .checked_mul(min_record)
            .map_or(true, |needed| needed > remaining)
        {
            return Err(corrupt(&format!(
                "header claims {} vectors of {} dimensions but only {} bytes follow",
                count, dimensions, remaining
            )));
        }

        let mut index = Self::new(dimensions);
        let mut vector_bytes = vec![0u8; vector_len as usize];
        for _ in 0..count {
            let id_len = read_u32(&mut file)? as u64;
            remaining -= 4;
            if id_len + vector_len > remaining {
                return Err(corrupt("record runs past the end of the file"));
            }
            remaining -= id_len + vector_len;
            let mut id_bytes = vec![0u8; id_len as usize];
            file.read_exact(&mut id_bytes)?;
            let id = String::from_utf8(id_bytes).map_err(|_| corrupt("id is not valid UTF-8"))?;
            file.read_exact(&mut vector_bytes)?;
            index.upsert(&id, &bytes_to_vector(&vector_bytes))?;
        }

        Ok(index)
    }
}

/// Descending score, ascending id on ties
pub fn rank(results: &mut [(String, f32)]) {
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

fn corrupt(reason: &str) -> Error {
    Error::Corrupt {
        artifact: ARTIFACT.to_string(),
        reason: reason.to_string(),
    }
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
