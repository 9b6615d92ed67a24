use rayon::prelude::*;

use crate::{
    error::{Error, Result},
    splitter::Chunk,
};

/// A chunk returned by [`VectorStore::similarity_search`] together with
/// its squared L2 distance to the query. Lower is closer.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

/// Exact in-memory nearest-neighbour index over squared Euclidean
/// distance. Every search scans every stored vector.
#[derive(Debug)]
pub struct VectorStore {
    dimension: usize,
    chunks: Vec<Chunk>,
    /// Row-major, `chunks.len() * dimension` values.
    vectors: Vec<f32>,
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl VectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            chunks: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn add(&mut self, chunk: Chunk, vector: &[f32]) -> Result<()> {
        if vector.is_empty() || vector.len() != self.dimension {
            return Err(Error::Config(format!(
                "vector has dimension {}, index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        self.chunks.push(chunk);
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    /// Return the `k` chunks closest to `query`, nearest first.
    ///
    /// Equal distances keep insertion order.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::PathBuf;
    ///
    /// use docqa::{splitter::Chunk, vector_store::VectorStore};
    ///
    /// let chunk = |text: &str| Chunk {
    ///     text: text.to_string(),
    ///     source: PathBuf::from("notes.txt"),
    ///     page: None,
    ///     index: 0,
    /// };
    ///
    /// let mut store = VectorStore::new(2);
    /// store.add(chunk("far"), &[10.0, 10.0]).unwrap();
    /// store.add(chunk("near"), &[1.0, 0.0]).unwrap();
    ///
    /// let hits = store.similarity_search(&[0.0, 0.0], 1).unwrap();
    /// assert_eq!(hits[0].chunk.text, "near");
    /// assert_eq!(hits[0].distance, 1.0);
    /// ```
    pub fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(Error::Config(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dimension
            )));
        }

        let mut distances: Vec<(usize, f32)> = self
            .vectors
            .par_chunks_exact(self.dimension)
            .map(|row| squared_l2(row, query))
            .enumerate()
            .collect();

        // Stable sort keeps insertion order among equal distances.
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));
        distances.truncate(k);

        Ok(distances
            .into_iter()
            .map(|(i, distance)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                distance,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn chunk(text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            source: PathBuf::from("doc.txt"),
            page: None,
            index: 0,
        }
    }

    fn store_with(points: &[(&str, [f32; 2])]) -> VectorStore {
        let mut store = VectorStore::new(2);
        for (text, v) in points {
            store.add(chunk(text), v).unwrap();
        }
        store
    }

    fn texts(hits: &[ScoredChunk]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk.text.as_str()).collect()
    }

    #[test]
    fn nearest_first() {
        let store = store_with(&[
            ("c", [3.0, 0.0]),
            ("a", [1.0, 0.0]),
            ("b", [2.0, 0.0]),
        ]);
        let hits = store.similarity_search(&[0.0, 0.0], 3).unwrap();
        assert_eq!(texts(&hits), vec!["a", "b", "c"]);
        assert_eq!(hits[2].distance, 9.0);
    }

    #[test]
    fn k_limits_results() {
        let store = store_with(&[("a", [1.0, 0.0]), ("b", [2.0, 0.0])]);
        assert_eq!(store.similarity_search(&[0.0, 0.0], 1).unwrap().len(), 1);
        assert_eq!(store.similarity_search(&[0.0, 0.0], 25).unwrap().len(), 2);
        assert!(store.similarity_search(&[0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn ties_keep_insertion_order() {
        let store = store_with(&[
            ("first", [1.0, 0.0]),
            ("second", [0.0, 1.0]),
            ("third", [-1.0, 0.0]),
        ]);
        let hits = store.similarity_search(&[0.0, 0.0], 3).unwrap();
        assert_eq!(texts(&hits), vec!["first", "second", "third"]);
    }

    #[test]
    fn empty_store_returns_nothing() {
        let store = VectorStore::new(4);
        assert!(store.is_empty());
        assert!(store.similarity_search(&[0.0; 4], 5).unwrap().is_empty());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut store = VectorStore::new(3);
        assert!(matches!(
            store.add(chunk("x"), &[1.0, 2.0]),
            Err(Error::Config(_))
        ));
        store.add(chunk("x"), &[1.0, 2.0, 3.0]).unwrap();
        assert!(matches!(
            store.similarity_search(&[1.0], 1),
            Err(Error::Config(_))
        ));
    }
}
