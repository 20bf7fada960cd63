/// Half-open id window `[low, high)` a chunked check is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkWindow {
    pub low: i64,
    pub high: i64,
}

impl ChunkWindow {
    pub fn contains(&self, id: i64) -> bool {
        id >= self.low && id < self.high
    }
}

impl std::fmt::Display for ChunkWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.low, self.high)
    }
}

/// Partition of `[1, max_id]` into windows of `step` ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub max_id: i64,
    pub step: i64,
}

impl ChunkPlan {
    /// Returns `None` for an empty id-space
    pub fn new(max_id: i64, step: i64) -> Option<Self> {
        if max_id <= 0 {
            return None;
        }
        Some(Self {
            max_id,
            step: step.max(1),
        })
    }

    /// Low bound to resume from; a zero cursor starts at id 1
    pub fn first_low(&self, cursor: i64) -> i64 {
        cursor.max(1)
    }

    pub fn window_at(&self, low: i64) -> Option<ChunkWindow> {
        if low > self.max_id {
            return None;
        }
        let end = self.max_id.saturating_add(1);
        let high = low.saturating_add(self.step).min(end);
        (high > low).then_some(ChunkWindow { low, high })
    }

    /// Windows remaining after `cursor`, in ascending id order
    pub fn windows_from(&self, cursor: i64) -> impl Iterator<Item = ChunkWindow> + '_ {
        std::iter::successors(self.window_at(self.first_low(cursor)), move |prev| {
            self.window_at(prev.high)
        })
    }

    pub fn has_remaining(&self, cursor: i64) -> bool {
        self.window_at(self.first_low(cursor)).is_some()
    }

    pub fn total_windows(&self) -> u64 {
        (self.max_id / self.step + i64::from(self.max_id % self.step != 0)) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_space_short_circuits() {
        assert!(ChunkPlan::new(0, 100).is_none());
        assert!(ChunkPlan::new(-3, 100).is_none());
    }

    #[test]
    fn test_windows_partition_id_space() {
        for max_id in 1..=60i64 {
            for step in 1..=13i64 {
                let plan = ChunkPlan::new(max_id, step).unwrap();
                let windows: Vec<_> = plan.windows_from(0).collect();

                assert_eq!(windows.first().unwrap().low, 1);
                assert_eq!(windows.last().unwrap().high, max_id + 1);
                for pair in windows.windows(2) {
                    assert_eq!(pair[0].high, pair[1].low, "gap or overlap at {:?}", pair);
                }
                for id in 1..=max_id {
                    let covering = windows.iter().filter(|w| w.contains(id)).count();
                    assert_eq!(covering, 1, "id {id} covered {covering} times");
                }
                assert_eq!(windows.len() as u64, plan.total_windows());
            }
        }
    }

    #[test]
    fn test_resume_from_cursor() {
        let plan = ChunkPlan::new(25, 10).unwrap();
        let windows: Vec<_> = plan.windows_from(11).collect();
        assert_eq!(
            windows,
            vec![
                ChunkWindow { low: 11, high: 21 },
                ChunkWindow { low: 21, high: 26 },
            ]
        );
        assert!(!plan.has_remaining(26));
        assert_eq!(plan.windows_from(26).count(), 0);
    }

    #[test]
    fn test_zero_step_is_clamped() {
        let plan = ChunkPlan::new(3, 0).unwrap();
        assert_eq!(plan.windows_from(0).count(), 3);
    }

    #[test]
    fn test_huge_ids_do_not_overflow() {
        let plan = ChunkPlan::new(i64::MAX, i64::MAX / 2).unwrap();
        let last = plan.windows_from(0).last().unwrap();
        assert_eq!(last.high, i64::MAX);
    }
}
