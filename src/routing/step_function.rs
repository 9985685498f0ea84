//! Integer step functions written as `[x,y],[x,y],...`.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// A malformed step function definition.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid step function {input:?}: {reason}")]
pub struct StepFunctionError {
    pub input: String,
    pub reason: &'static str,
}

/// Piecewise-constant function of a non-negative integer.
///
/// The value at `n` is the `y` of the point with the largest `x <= n`, or
/// zero below the first point.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct StepFunction {
    points: Vec<(u64, u64)>,
}

impl StepFunction {
    /// Builds a function from points in any order.
    ///
    /// # Errors
    ///
    /// Returns [`StepFunctionError`] if two points share an `x`.
    pub fn from_points(mut points: Vec<(u64, u64)>) -> Result<Self, StepFunctionError> {
        points.sort_unstable_by_key(|(x, _)| *x);
        if points.windows(2).any(|pair| pair[0].0 == pair[1].0) {
            return Err(StepFunctionError {
                input: format_points(&points),
                reason: "duplicate x value",
            });
        }
        Ok(Self { points })
    }

    /// A function that is zero everywhere.
    #[must_use]
    pub fn zero() -> Self {
        Self { points: Vec::new() }
    }

    #[must_use]
    pub fn value(&self, n: u64) -> u64 {
        self.points
            .iter()
            .take_while(|(x, _)| *x <= n)
            .last()
            .map_or(0, |(_, y)| *y)
    }

    /// [`value`](Self::value) for a count, saturating into `usize`.
    #[must_use]
    pub fn value_for_count(&self, count: usize) -> usize {
        let n = u64::try_from(count).unwrap_or(u64::MAX);
        usize::try_from(self.value(n)).unwrap_or(usize::MAX)
    }
}

impl FromStr for StepFunction {
    type Err = StepFunctionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let error = |reason| StepFunctionError {
            input: input.to_string(),
            reason,
        };
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::zero());
        }

        let mut points = Vec::new();
        let mut rest = trimmed;
        loop {
            rest = rest.trim_start();
            let body = rest.strip_prefix('[').ok_or_else(|| error("expected '['"))?;
            let (pair, after) = body.split_once(']').ok_or_else(|| error("missing ']'"))?;
            let (x, y) = pair.split_once(',').ok_or_else(|| error("expected [x,y]"))?;
            let x = x.trim().parse().map_err(|_| error("x is not a non-negative integer"))?;
            let y = y.trim().parse().map_err(|_| error("y is not a non-negative integer"))?;
            points.push((x, y));

            rest = after.trim_start();
            if rest.is_empty() {
                break;
            }
            rest = rest.strip_prefix(',').ok_or_else(|| error("expected ',' between points"))?;
        }
        Self::from_points(points).map_err(|e| error(e.reason))
    }
}

impl TryFrom<String> for StepFunction {
    type Error = StepFunctionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for StepFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_points(&self.points))
    }
}

fn format_points(points: &[(u64, u64)]) -> String {
    points
        .iter()
        .map(|(x, y)| format!("[{x},{y}]"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_values_between_points() {
        let f: StepFunction = "[1,0],[2,1],[5,2],[10,3],[50,10],[200,20]".parse().unwrap();
        let expected = [(0, 0), (1, 0), (2, 1), (4, 1), (5, 2), (9, 2), (10, 3), (49, 3), (50, 10), (1000, 20)];
        for (n, want) in expected {
            assert_eq!(f.value(n), want, "f({n})");
        }
    }

    #[test]
    fn test_parse_tolerates_whitespace_and_order() {
        let f: StepFunction = " [10, 5] , [1,1] ".parse().unwrap();
        assert_eq!(f.to_string(), "[1,1],[10,5]");
        assert_eq!(f.value(3), 1);
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["[1,2", "1,2", "[a,1]", "[1,1][2,2]", "[1,1],[1,2]", "[1]"] {
            assert!(bad.parse::<StepFunction>().is_err(), "{bad}");
        }
    }

    #[test]
    fn test_empty_is_zero() {
        let f: StepFunction = "".parse().unwrap();
        assert_eq!(f.value(100), 0);
    }
}
