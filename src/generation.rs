/// A monotonically increasing generation counter.
///
/// Identifies a single run of a collector: every time a collector is
/// spawned the context's generation is bumped, so a lease handed out for
/// one run can never act upon a later one.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Debug)]
pub struct Generation(pub(crate) usize);

impl Generation {
    /// Returns the smallest possible generation.
    pub const MIN: Self = Self(usize::MIN);

    /// Returns the raw internal generational counter value.
    pub fn as_raw(&self) -> usize {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}
