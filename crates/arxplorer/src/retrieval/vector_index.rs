//! Embedded chunk index with optional dimensionality reduction

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::providers::EmbeddingProvider;

/// Chunk embeddings plus the chunks themselves, searchable by similarity.
///
/// Invariants: the vector matrix has exactly one row per chunk, and when a
/// projection transform is present its target dimension never exceeds
/// `min(N, D_orig)`.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    chunks: Vec<String>,
    /// `N x D` chunk vectors
    vectors: Array2<f32>,
    /// `D_orig x D` projection applied to future queries
    transform: Option<Array2<f32>>,
}

impl VectorIndex {
    /// Embed a chunk batch through the provider and build the index.
    ///
    /// The provider is called once for the whole batch. Response items carry
    /// their own input index and are re-sorted before alignment, since the
    /// provider does not guarantee request order.
    pub async fn embed(
        provider: &dyn EmbeddingProvider,
        chunks: Vec<String>,
        compress_dim: Option<usize>,
    ) -> Result<Self> {
        let mut items = provider.embed_batch(&chunks).await?;
        if items.len() != chunks.len() {
            return Err(Error::provider(format!(
                "embedding count mismatch: {} inputs, {} outputs",
                chunks.len(),
                items.len()
            )));
        }
        items.sort_by_key(|item| item.index);

        let dims = items.first().map(|i| i.embedding.len()).unwrap_or(0);
        let mut vectors = Array2::zeros((items.len(), dims));
        for (row, item) in items.iter().enumerate() {
            if item.embedding.len() != dims {
                return Err(Error::provider("inconsistent embedding dimensions"));
            }
            for (col, value) in item.embedding.iter().enumerate() {
                vectors[[row, col]] = *value;
            }
        }

        let mut transform = None;
        if let Some(dim) = compress_dim {
            let target = dim.min(vectors.nrows()).min(dims);
            if target > 0 && target < dims {
                let (compressed, projection) = compress(&vectors, target);
                vectors = compressed;
                transform = Some(projection);
            }
        }

        Self::from_parts(chunks, vectors, transform)
    }

    /// Assemble an index from already-materialized parts, checking invariants
    pub fn from_parts(
        chunks: Vec<String>,
        vectors: Array2<f32>,
        transform: Option<Array2<f32>>,
    ) -> Result<Self> {
        if vectors.nrows() != chunks.len() {
            return Err(Error::internal(format!(
                "vector index invariant violated: {} chunks, {} vector rows",
                chunks.len(),
                vectors.nrows()
            )));
        }
        if let Some(t) = &transform {
            if t.ncols() != vectors.ncols() {
                return Err(Error::internal(
                    "transform output dimension does not match stored vectors",
                ));
            }
        }
        Ok(Self {
            chunks,
            vectors,
            transform,
        })
    }

    /// Embed the query, score every stored vector by dot product, and return
    /// the top `count` chunks in descending score order.
    ///
    /// Selection uses a partition plus a sort of only the selected slice,
    /// so the cost stays linear in the index size on average.
    pub async fn search(
        &self,
        provider: &dyn EmbeddingProvider,
        query: &str,
        count: usize,
    ) -> Result<Vec<String>> {
        if self.chunks.is_empty() {
            return Err(Error::CapabilityUnavailable(
                "search called before any embedding".to_string(),
            ));
        }

        let items = provider.embed_batch(&[query.to_string()]).await?;
        let embedding = items
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider("empty embedding response for query"))?
            .embedding;
        let mut query_vec = Array1::from_vec(embedding);
        if let Some(t) = &self.transform {
            query_vec = query_vec.dot(t);
        }
        if query_vec.len() != self.vectors.ncols() {
            return Err(Error::provider(format!(
                "query dimension {} does not match index dimension {}",
                query_vec.len(),
                self.vectors.ncols()
            )));
        }

        let scores = self.vectors.dot(&query_vec);
        let count = count.min(self.chunks.len());
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut indices: Vec<usize> = (0..self.chunks.len()).collect();
        if count < indices.len() {
            indices.select_nth_unstable_by(count - 1, |&a, &b| {
                scores[b].partial_cmp(&scores[a]).unwrap_or(std::cmp::Ordering::Equal)
            });
            indices.truncate(count);
        }
        indices.sort_by(|&a, &b| {
            scores[b].partial_cmp(&scores[a]).unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(indices
            .into_iter()
            .map(|i| self.chunks[i].clone())
            .collect())
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn vectors(&self) -> &Array2<f32> {
        &self.vectors
    }

    pub fn transform(&self) -> Option<&Array2<f32>> {
        self.transform.as_ref()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Truncated SVD via subspace iteration on the Gram matrix.
///
/// Returns the projected data `U·Σ` (`N x k`) and the truncated
/// right-singular-vector matrix (`D x k`) used to project future queries.
fn compress(data: &Array2<f32>, k: usize) -> (Array2<f32>, Array2<f32>) {
    let (n, d) = data.dim();
    let k = k.min(n).min(d);

    let mut rng = StdRng::seed_from_u64(17);
    let mut basis = Array2::from_shape_fn((d, k), |_| rng.gen::<f32>() - 0.5);
    orthonormalize_columns(&mut basis);

    let gram = data.t().dot(data);
    for _ in 0..30 {
        basis = gram.dot(&basis);
        orthonormalize_columns(&mut basis);
    }

    let projected = data.dot(&basis);
    (projected, basis)
}

/// Modified Gram-Schmidt over matrix columns
fn orthonormalize_columns(m: &mut Array2<f32>) {
    let cols = m.ncols();
    for j in 0..cols {
        for i in 0..j {
            let proj = m.column(i).dot(&m.column(j));
            let prior = m.column(i).to_owned();
            m.column_mut(j).zip_mut_with(&prior, |a, &b| *a -= proj * b);
        }
        let norm = m.column(j).dot(&m.column(j)).sqrt();
        if norm > 1e-12 {
            m.column_mut(j).mapv_inplace(|x| x / norm);
        }
    }
}
