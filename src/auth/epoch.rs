//! Generation tagging for session transitions.
//!
//! Every async result that wants to write session state carries the generation it
//! started under. A result is committed only if that generation is still current.

/// Monotonic session epoch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionEpoch {
    generation: u64,
    /// Uid the current generation is reconciling, `None` for "signed out"
    target: Option<String>,
    /// Lowest generation an explicit operation may still claim from
    floor: u64,
}

impl SessionEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Observer transition to `uid`. Bumps only when the target changes.
    pub fn advance(&mut self, uid: Option<&str>) -> u64 {
        if self.target.as_deref() != uid {
            self.generation += 1;
            self.target = uid.map(str::to_string);
        }
        self.generation
    }

    /// Explicit sign-out: always bumps and fences off every earlier start point
    pub fn invalidate(&mut self) -> u64 {
        self.generation += 1;
        self.target = None;
        self.floor = self.generation;
        self.generation
    }

    /// Claim the epoch for an explicit operation that started at `started`.
    ///
    /// Fails when a sign-out happened after `started`. Observer transitions in
    /// between do not block the claim.
    pub fn claim(&mut self, started: u64, uid: &str) -> Option<u64> {
        if started < self.floor {
            return None;
        }
        Some(self.advance(Some(uid)))
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}
