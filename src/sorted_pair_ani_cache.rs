use std;

/// Like a BTreeMap except the keys are sorted before insertion / get etc.
/// Maps an unordered pair of genome indices to an ANI-like similarity.
#[derive(Debug, Clone, Default)]
pub struct SortedPairAniCache {
    internal: std::collections::BTreeMap<(usize, usize), f64>,
}

impl SortedPairAniCache {
    pub fn new() -> SortedPairAniCache {
        SortedPairAniCache {
            internal: std::collections::BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, genome_ids: (usize, usize), ani: f64) {
        if genome_ids.0 < genome_ids.1 {
            self.internal.insert((genome_ids.0, genome_ids.1), ani);
        } else {
            self.internal.insert((genome_ids.1, genome_ids.0), ani);
        }
    }

    pub fn get(&self, genome_ids: &(usize, usize)) -> Option<&f64> {
        if genome_ids.0 < genome_ids.1 {
            self.internal.get(&(genome_ids.0, genome_ids.1))
        } else {
            self.internal.get(&(genome_ids.1, genome_ids.0))
        }
    }

    pub fn contains_key(&self, genome_ids: &(usize, usize)) -> bool {
        if genome_ids.0 < genome_ids.1 {
            self.internal.contains_key(&(genome_ids.0, genome_ids.1))
        } else {
            self.internal.contains_key(&(genome_ids.1, genome_ids.0))
        }
    }

    /// Iterate pairs in BTreeMap order i.e. sorted by (min, max) index.
    pub fn iter(&self) -> impl Iterator<Item = (&(usize, usize), &f64)> {
        self.internal.iter()
    }

    pub fn len(&self) -> usize {
        self.internal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.internal.is_empty()
    }
}
