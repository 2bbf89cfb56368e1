//! RecoLayer — collaborative-filtering similarity and recommendation
//! on top of the matrix engine.
//!
//! This module is purely a client of [`Engine`]: it only ever calls
//! `incr` and `get_row`. Column `0` of a row is used as that row's own
//! self-count ("cardinality" below) — every observation bumps both a
//! row's self-count and its co-occurrence counts with the rest of the
//! observed set.

use crate::engine::Engine;
use crate::error::{EngineError, Result};

/// Similarity and ranking over the ids that an [`Engine`] has observed
/// co-occurring.
pub struct RecoLayer<'e> {
    engine: &'e Engine,
}

impl<'e> RecoLayer<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Self { engine }
    }

    /// Record one co-occurrence event: every id's self-count is bumped,
    /// and every ordered pair within `ids` is bumped.
    pub fn observe_pset(&self, ids: &[u32]) -> Result<()> {
        for &n in ids {
            self.engine.incr(n, 0, 1)?;
            for &i in ids {
                if i != n {
                    self.engine.incr(n, i, 1)?;
                }
            }
        }
        Ok(())
    }

    /// Row `x`'s self-count, or `0` if `x` has never been observed.
    fn cardinality(&self, x: u32) -> Result<u64> {
        match self.engine.get_row(x) {
            Ok(row) => Ok(row.value_of(0).unwrap_or(0)),
            Err(EngineError::NotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// `jaccard(A,B) = A[y].value / (A.cardinality + B.cardinality - A[y].value)`,
    /// `0` when either side is absent or the denominator is `0`.
    pub fn jaccard(&self, x: u32, y: u32) -> Result<f64> {
        let a_row = match self.engine.get_row(x) {
            Ok(row) => row,
            Err(EngineError::NotFound(_)) => return Ok(0.0),
            Err(e) => return Err(e),
        };
        let cc = a_row.value_of(y).unwrap_or(0);
        if cc == 0 {
            return Ok(0.0);
        }
        let b_cardinality = self.cardinality(y)?;
        if b_cardinality == 0 {
            return Ok(0.0);
        }
        let a_cardinality = a_row.value_of(0).unwrap_or(0);
        let denominator = (a_cardinality + b_cardinality).saturating_sub(cc);
        if denominator == 0 {
            return Ok(0.0);
        }
        Ok(cc as f64 / denominator as f64)
    }

    /// `cosine(A,B) = A[y].value / sqrt(A.cardinality * B.cardinality)`,
    /// gated by `min = ceil(log_6(A.cardinality))` when `A.cardinality >
    /// 10`, else `min = 2`; candidates with `B.cardinality < min` score
    /// `0`.
    pub fn cosine(&self, x: u32, y: u32) -> Result<f64> {
        let a_row = match self.engine.get_row(x) {
            Ok(row) => row,
            Err(EngineError::NotFound(_)) => return Ok(0.0),
            Err(e) => return Err(e),
        };
        let cc = a_row.value_of(y).unwrap_or(0);
        if cc == 0 {
            return Ok(0.0);
        }
        let a_cardinality = a_row.value_of(0).unwrap_or(0);
        if a_cardinality == 0 {
            return Ok(0.0);
        }
        let min_b = if a_cardinality > 10 {
            ((a_cardinality as f64).ln() / 6f64.ln()).ceil() as u64
        } else {
            2
        };
        let b_cardinality = self.cardinality(y)?;
        if b_cardinality < min_b {
            return Ok(0.0);
        }
        Ok(cc as f64 / ((a_cardinality as f64).sqrt() * (b_cardinality as f64).sqrt()))
    }

    /// Top-`top_k` candidates for row `x`, scored by `cosine` and sorted
    /// descending. Column `0` (the self-count) is never a candidate.
    /// Empty if `x` has never been observed.
    pub fn recommend(&self, x: u32, top_k: usize) -> Result<Vec<(u32, f64)>> {
        let row = match self.engine.get_row(x) {
            Ok(row) => row,
            Err(EngineError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut scored = Vec::new();
        for (y, _) in row.iter() {
            if y == 0 {
                continue;
            }
            let score = self.cosine(x, y)?;
            if score > 0.0 {
                scored.push((y, score));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pset_observation_and_jaccard() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path().join("cf.db")).unwrap();
        let reco = RecoLayer::new(&engine);

        reco.observe_pset(&[1, 2, 3]).unwrap();
        reco.observe_pset(&[1, 2]).unwrap();

        // row 1: col0=2 (seen twice), col2=2 (co-occurred with 2 twice), col3=1
        let row1 = engine.get_row(1).unwrap();
        assert_eq!(row1.value_of(0), Some(2));
        assert_eq!(row1.value_of(2), Some(2));
        assert_eq!(row1.value_of(3), Some(1));

        let j = reco.jaccard(1, 2).unwrap();
        // num=2, den = A.card(2) + B.card(2) - 2 = 2 + 2 - 2 = 2 => 1.0
        assert!((j - 1.0).abs() < 1e-9, "jaccard(1,2)={j}");

        let j_absent = reco.jaccard(1, 999).unwrap();
        assert_eq!(j_absent, 0.0);
    }

    #[test]
    fn cosine_gates_low_cardinality_candidates() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path().join("cf.db")).unwrap();
        let reco = RecoLayer::new(&engine);

        // Build up row 1's self-count past 10 so the log-based gate kicks in.
        for _ in 0..12 {
            reco.observe_pset(&[1, 2]).unwrap();
        }
        // id 3 co-occurs with 1 exactly once and is otherwise unseen
        // (cardinality 1) — below min = ceil(log_6(12)) = 2, so it must
        // score 0 even though it has a nonzero cell.
        engine.incr(1, 3, 1).unwrap();
        engine.incr(3, 0, 1).unwrap();

        let score_2 = reco.cosine(1, 2).unwrap();
        assert!(score_2 > 0.0);
        let score_3 = reco.cosine(1, 3).unwrap();
        assert_eq!(score_3, 0.0);
    }

    #[test]
    fn recommend_sorts_and_truncates() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path().join("cf.db")).unwrap();
        let reco = RecoLayer::new(&engine);

        reco.observe_pset(&[1, 2, 3, 4]).unwrap();
        reco.observe_pset(&[1, 2]).unwrap();
        reco.observe_pset(&[1, 2]).unwrap();

        let recs = reco.recommend(1, 2).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].0, 2, "row 2 co-occurs with 1 most often");
        assert!(recs[0].1 >= recs[1].1);
    }

    #[test]
    fn recommend_on_unknown_row_is_empty() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path().join("cf.db")).unwrap();
        let reco = RecoLayer::new(&engine);
        assert_eq!(reco.recommend(42, 10).unwrap(), Vec::new());
    }
}
