use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Snapshot of the rows still needing a decision, walked by a forward-only
/// cursor. Built once per session; it never re-reads the store.
#[derive(Debug, Default, Clone)]
pub struct WorkQueue {
    indices: Vec<usize>,
    cursor: usize,
}

impl WorkQueue {
    /// Copies `incomplete`, optionally applying a uniform shuffle. A seed
    /// makes the order reproducible.
    pub fn build(incomplete: &[usize], shuffle: bool, seed: Option<u64>) -> Self {
        let mut indices = incomplete.to_vec();
        if shuffle {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            indices.shuffle(&mut rng);
        }
        Self { indices, cursor: 0 }
    }

    /// Row index under the cursor, or `None` once exhausted.
    pub fn current(&self) -> Option<usize> {
        self.indices.get(self.cursor).copied()
    }

    /// Moves past the current item. Idempotent once exhausted.
    pub fn advance(&mut self) {
        if self.cursor < self.indices.len() {
            self.cursor += 1;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.indices.len()
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.indices.len() - self.cursor
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}
