/// Dense embedding matrix with cosine similarity scoring
use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Added to cosine denominators so all-zero rows and queries score 0 instead of NaN
pub const COSINE_EPSILON: f32 = 1e-8;

/// Why a stored embedding was replaced by a zero vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowDefect {
    Missing,
    WrongDimension { actual: usize },
    NonFinite,
}

/// Count of coerced rows, reported after a build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoercionStats {
    pub missing: usize,
    pub wrong_dimension: usize,
    pub non_finite: usize,
}

impl CoercionStats {
    pub fn total(&self) -> usize {
        self.missing + self.wrong_dimension + self.non_finite
    }

    fn record(&mut self, defect: RowDefect) {
        match defect {
            RowDefect::Missing => self.missing += 1,
            RowDefect::WrongDimension { .. } => self.wrong_dimension += 1,
            RowDefect::NonFinite => self.non_finite += 1,
        }
    }
}

/// Inspect a stored embedding against the deployment dimension
pub fn check_row(row: Option<&[f32]>, dimension: usize) -> Option<RowDefect> {
    match row {
        None => Some(RowDefect::Missing),
        Some(v) if v.len() != dimension => Some(RowDefect::WrongDimension { actual: v.len() }),
        Some(v) if v.iter().any(|x| !x.is_finite()) => Some(RowDefect::NonFinite),
        Some(_) => None,
    }
}

/// (N x D) embedding matrix aligned with a chunk list
///
/// Missing or malformed rows are coerced to zero vectors of the right dimension
/// instead of being dropped, so row `i` always belongs to chunk `i`.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    matrix: Array2<f32>,
    norms: Array1<f32>,
    coercions: CoercionStats,
}

impl VectorIndex {
    /// Build from per-chunk embeddings. `None` for an empty corpus or zero dimension.
    pub fn build<'a, I>(rows: I, dimension: usize) -> Option<Self>
    where
        I: IntoIterator<Item = Option<&'a [f32]>>,
    {
        if dimension == 0 {
            return None;
        }

        let mut flat = Vec::new();
        let mut count = 0usize;
        let mut coercions = CoercionStats::default();

        for row in rows {
            match check_row(row, dimension) {
                None => flat.extend_from_slice(row.unwrap_or_default()),
                Some(defect) => {
                    tracing::debug!(row = count, ?defect, "Coercing stored embedding to zero vector");
                    coercions.record(defect);
                    flat.extend(std::iter::repeat(0.0).take(dimension));
                }
            }
            count += 1;
        }

        if count == 0 {
            return None;
        }

        let matrix = Array2::from_shape_vec((count, dimension), flat).ok()?;
        let norms = matrix.map_axis(Axis(1), |row| row.dot(&row).sqrt());

        Some(Self {
            matrix,
            norms,
            coercions,
        })
    }

    /// Cosine similarity of every row against `query`, index-aligned.
    ///
    /// A query of the wrong dimension is treated as a zero vector.
    pub fn cosine_scores(&self, query: &[f32]) -> Vec<f32> {
        if query.len() != self.dimension() {
            tracing::warn!(
                expected = self.dimension(),
                actual = query.len(),
                "Query embedding has wrong dimension; scoring as zero vector"
            );
            return vec![0.0; self.len()];
        }

        let q = ArrayView1::from(query);
        let q_norm = q.dot(&q).sqrt();
        let dots = self.matrix.dot(&q);

        dots.iter()
            .zip(self.norms.iter())
            .map(|(dot, norm)| dot / (norm * (q_norm + COSINE_EPSILON) + COSINE_EPSILON))
            .collect()
    }

    pub fn coercions(&self) -> CoercionStats {
        self.coercions
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.matrix.ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_empty_corpus_is_unavailable() {
        let rows: Vec<Option<&[f32]>> = Vec::new();
        assert!(VectorIndex::build(rows, 4).is_none());
    }

    #[test]
    fn test_cosine_scores() {
        let a = unit(4, 0);
        let b = unit(4, 1);
        let c = vec![0.9, 0.1, 0.0, 0.0];
        let index =
            VectorIndex::build(vec![Some(a.as_slice()), Some(b.as_slice()), Some(c.as_slice())], 4)
                .unwrap();

        let scores = index.cosine_scores(&a);
        assert_eq!(scores.len(), 3);
        assert!((scores[0] - 1.0).abs() < 1e-5);
        assert!(scores[1].abs() < 1e-6);
        assert!(scores[2] > 0.9 && scores[2] < 1.0);
    }

    #[test]
    fn test_malformed_rows_preserve_alignment() {
        let good = unit(3, 2);
        let short = vec![1.0, 2.0];
        let nan = vec![f32::NAN, 0.0, 1.0];
        let rows = vec![
            None,
            Some(short.as_slice()),
            Some(good.as_slice()),
            Some(nan.as_slice()),
        ];

        let index = VectorIndex::build(rows, 3).unwrap();
        assert_eq!(index.len(), 4);
        assert_eq!(index.dimension(), 3);

        let stats = index.coercions();
        assert_eq!(stats.missing, 1);
        assert_eq!(stats.wrong_dimension, 1);
        assert_eq!(stats.non_finite, 1);
        assert_eq!(stats.total(), 3);

        let scores = index.cosine_scores(&good);
        assert_eq!(scores[0], 0.0);
        assert_eq!(scores[1], 0.0);
        assert!((scores[2] - 1.0).abs() < 1e-5);
        assert_eq!(scores[3], 0.0);
    }

    #[test]
    fn test_zero_query_scores_zero() {
        let a = unit(3, 0);
        let index = VectorIndex::build(vec![Some(a.as_slice())], 3).unwrap();
        let scores = index.cosine_scores(&[0.0, 0.0, 0.0]);
        assert_eq!(scores, vec![0.0]);
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_wrong_query_dimension() {
        let a = unit(3, 0);
        let index = VectorIndex::build(vec![Some(a.as_slice())], 3).unwrap();
        assert_eq!(index.cosine_scores(&[1.0, 0.0]), vec![0.0]);
    }

    #[test]
    fn test_check_row() {
        assert_eq!(check_row(None, 2), Some(RowDefect::Missing));
        assert_eq!(
            check_row(Some(&[1.0][..]), 2),
            Some(RowDefect::WrongDimension { actual: 1 })
        );
        assert_eq!(check_row(Some(&[1.0, 2.0][..]), 2), None);
    }
}
