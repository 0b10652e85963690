use std::collections::VecDeque;

use crate::driver::ReadCallback;
use crate::prelude::*;

/// In-order checker of DUT results. Clones share the same state.
#[derive(Clone, Debug)]
pub struct Scoreboard(TbObj<ScoreboardInner>);

#[derive(Debug, Default)]
struct ScoreboardInner {
    expected: VecDeque<u32>,
    failures: u32,
    checked: u32,
    unexpected: u32,
}

impl Default for Scoreboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Scoreboard {
    pub fn new() -> Self {
        Self(TbObj::new(ScoreboardInner::default()))
    }

    pub fn add_expected(&self, value: u32) {
        self.0.with_mut(|s| s.expected.push_back(value));
    }

    /// Compare `actual` with the oldest expected value. Without a pending expectation the
    /// value is only reported.
    pub fn check(&self, actual: u32) {
        let expected = self.0.with_mut(|s| {
            let expected = s.expected.pop_front();
            match expected {
                Some(e) => {
                    s.checked += 1;
                    if e != actual {
                        s.failures += 1;
                    }
                }
                None => s.unexpected += 1,
            }
            expected
        });
        match expected {
            None => SIM_IF.warn("Unexpected output received"),
            Some(e) if e == actual => {
                SIM_IF.log(&format!("Expected: {}, Actual: {} -> OK", e, actual))
            }
            Some(e) => SIM_IF.warn(&format!(
                "Expected: {}, Actual: {} -> Err -- Mismatch!",
                e, actual
            )),
        }
    }

    /// Callback for [`OutputDriver`](crate::driver::OutputDriver) feeding this scoreboard.
    pub fn checker(&self) -> ReadCallback {
        let sb = self.clone();
        Box::new(move |actual| sb.check(actual))
    }

    pub fn pending(&self) -> usize {
        self.0.with(|s| s.expected.len())
    }

    pub fn failures(&self) -> u32 {
        self.0.with(|s| s.failures)
    }

    pub fn checked(&self) -> u32 {
        self.0.with(|s| s.checked)
    }

    pub fn unexpected(&self) -> u32 {
        self.0.with(|s| s.unexpected)
    }

    /// Final result: mismatches first, then expectations that were never checked.
    pub fn verdict(&self) -> TbResult {
        let (failures, pending) = self.0.with(|s| (s.failures, s.expected.len()));
        if failures > 0 {
            Err(TbError::Mismatch(failures))
        } else if pending > 0 {
            Err(TbError::Unchecked(pending))
        } else {
            Ok(Val::String(
                "All test vectors passed successfully!".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_values_pass() {
        let sb = Scoreboard::new();
        for v in [1, 0, 1] {
            sb.add_expected(v);
        }
        let mut check = sb.checker();
        for v in [1, 0, 1] {
            check(v);
        }
        assert_eq!(sb.checked(), 3);
        assert_eq!(sb.pending(), 0);
        assert_eq!(
            sb.verdict().unwrap(),
            Val::String("All test vectors passed successfully!".to_string())
        );
    }

    #[test]
    fn mismatch_is_counted_not_raised() {
        let sb = Scoreboard::new();
        sb.add_expected(1);
        sb.add_expected(1);
        sb.check(0);
        sb.check(1);
        assert_eq!(sb.failures(), 1);
        let err = sb.verdict().unwrap_err();
        assert!(matches!(err, TbError::Mismatch(1)));
        assert_eq!(err.to_string(), "Tests failed: 1");
    }

    #[test]
    fn check_on_empty_queue_only_warns() {
        let sb = Scoreboard::new();
        sb.check(0);
        assert_eq!(sb.unexpected(), 1);
        assert_eq!(sb.failures(), 0);
        assert!(sb.verdict().is_ok());
    }

    #[test]
    fn leftover_expectations_fail() {
        let sb = Scoreboard::new();
        sb.add_expected(1);
        sb.add_expected(0);
        sb.check(1);
        let err = sb.verdict().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Test completed but 1 expected values weren't checked"
        );
    }

    #[test]
    fn mismatch_wins_over_leftovers() {
        let sb = Scoreboard::new();
        sb.add_expected(1);
        sb.add_expected(1);
        sb.check(0);
        assert!(matches!(sb.verdict(), Err(TbError::Mismatch(1))));
    }
}
