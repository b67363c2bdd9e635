//! LEO access environment tests
//!
//! - **scenario_tests**: worked slot examples (no contention, RB shortage,
//!   preamble collision, admission timeout)
//! - **env_tests**: episode lifecycle, invariants and the vectorised env


use crate::simulator::SlotRandomness;

/// Admits the lowest UE indices first and hands out scripted preambles.
pub(crate) struct ScriptedRandomness {
    pub preambles: Vec<usize>,
    next: usize,
}

impl ScriptedRandomness {
    pub fn new(preambles: Vec<usize>) -> Self {
        Self { preambles, next: 0 }
    }
}

impl SlotRandomness for ScriptedRandomness {
    fn admit(&mut self, requesters: &[usize], capacity: usize) -> Vec<usize> {
        requesters.iter().copied().take(capacity).collect()
    }

    fn preamble(&mut self, _ue: usize, n_preambles: usize) -> usize {
        let p = self.preambles[self.next % self.preambles.len()];
        self.next += 1;
        p % n_preambles
    }
}
