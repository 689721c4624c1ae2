//! Transition evaluation: operator comparison and branch selection.
//!
//! Branches are evaluated in list order; the first whose operator accepts
//! the handler's eval string wins. `default` branches are skipped in the
//! first pass and only considered after every other branch has failed to
//! match.

use crate::chain::definition::{TransitionBranch, TransitionOperator};
use crate::error::EngineError;
use crate::parse::parse_float_relaxed;

/// Picks the first matching branch, honouring default-last semantics.
///
/// No match and no default branch is an error: the chain fails rather than
/// guessing a next task.
pub fn select_branch<'a>(
    branches: &'a [TransitionBranch],
    eval: &str,
) -> Result<&'a TransitionBranch, EngineError> {
    for branch in branches {
        if branch.operator == TransitionOperator::Default {
            continue;
        }
        if compare(branch.operator, eval, &branch.when)? {
            return Ok(branch);
        }
    }
    branches
        .iter()
        .find(|b| b.operator == TransitionOperator::Default)
        .ok_or_else(|| {
            EngineError::Execution(format!(
                "no transition branch matched eval {eval:?} and no default branch is present"
            ))
        })
}

/// Applies one operator to `(eval, when)`.
///
/// String operators are case-sensitive tests against the raw eval string.
/// Numeric operators parse both operands with the relaxed rules (quotes and
/// surrounding prose tolerated). `between` expects `when` as `"min-max"`,
/// inclusive on both ends.
pub fn compare(
    operator: TransitionOperator,
    eval: &str,
    when: &str,
) -> Result<bool, EngineError> {
    Ok(match operator {
        TransitionOperator::Equals => eval == when,
        TransitionOperator::NotEquals => eval != when,
        TransitionOperator::Contains => eval.contains(when),
        TransitionOperator::NotContains => !eval.contains(when),
        TransitionOperator::StartsWith => eval.starts_with(when),
        TransitionOperator::EndsWith => eval.ends_with(when),
        TransitionOperator::GreaterThan => {
            parse_float_relaxed(eval)? > parse_float_relaxed(when)?
        }
        TransitionOperator::LessThan => parse_float_relaxed(eval)? < parse_float_relaxed(when)?,
        TransitionOperator::Between => {
            let (min, max) = parse_range(when)?;
            let x = parse_float_relaxed(eval)?;
            min <= x && x <= max
        }
        TransitionOperator::Default => true,
    })
}

/// Parses a `"min-max"` range, allowing negative bounds.
fn parse_range(when: &str) -> Result<(f64, f64), EngineError> {
    let t = when.trim();
    // The separator is a '-' that is not a leading sign: try each candidate
    // split point until both halves parse.
    for (idx, _) in t.match_indices('-').filter(|(i, _)| *i > 0) {
        let (left, right) = (&t[..idx], &t[idx + 1..]);
        if let (Ok(min), Ok(max)) = (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
            if min > max {
                return Err(EngineError::Execution(format!(
                    "range {when:?} has min > max"
                )));
            }
            return Ok((min, max));
        }
    }
    Err(EngineError::Execution(format!(
        "range operand {when:?} is not of the form \"min-max\""
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::definition::TransitionOperator as Op;

    fn branch(operator: Op, when: &str, goto: &str) -> TransitionBranch {
        TransitionBranch {
            operator,
            when: when.into(),
            goto: goto.into(),
            compose: None,
        }
    }

    /// **Scenario**: String operators are case-sensitive exact/substring/prefix/suffix.
    #[test]
    fn string_operators() {
        assert!(compare(Op::Equals, "valid", "valid").unwrap());
        assert!(!compare(Op::Equals, "Valid", "valid").unwrap());
        assert!(compare(Op::NotEquals, "a", "b").unwrap());
        assert!(compare(Op::Contains, "api_failure", "fail").unwrap());
        assert!(compare(Op::NotContains, "ok", "fail").unwrap());
        assert!(compare(Op::StartsWith, "tool-call", "tool").unwrap());
        assert!(compare(Op::EndsWith, "tool-call", "call").unwrap());
    }

    /// **Scenario**: Numeric operators tolerate prose and quotes on either side.
    #[test]
    fn numeric_operators_relaxed() {
        assert!(compare(Op::GreaterThan, "score: 7", "5").unwrap());
        assert!(compare(Op::LessThan, "\"3\"", " 4 ").unwrap());
        assert!(!compare(Op::GreaterThan, "2", "2").unwrap());
        assert!(compare(Op::GreaterThan, "no number", "1").is_err());
    }

    /// **Scenario**: range "a-b" is inclusive on both ends.
    #[test]
    fn range_inclusive_both_ends() {
        assert!(compare(Op::Between, "1", "1-5").unwrap());
        assert!(compare(Op::Between, "5", "1-5").unwrap());
        assert!(compare(Op::Between, "3.5", "1-5").unwrap());
        assert!(!compare(Op::Between, "5.01", "1-5").unwrap());
        assert!(!compare(Op::Between, "0.99", "1-5").unwrap());
    }

    /// **Scenario**: Ranges accept negative bounds; min > max is an error.
    #[test]
    fn range_negative_bounds() {
        assert!(compare(Op::Between, "-3", "-5-0").unwrap());
        assert!(compare(Op::Between, "-1", "-2--1").unwrap());
        assert!(compare(Op::Between, "1", "5-1").is_err());
        assert!(compare(Op::Between, "1", "oops").is_err());
    }

    /// **Scenario**: The first branch in list order whose operator accepts wins.
    #[test]
    fn first_match_wins() {
        let branches = vec![
            branch(Op::Contains, "a", "first"),
            branch(Op::Contains, "ab", "second"),
        ];
        let chosen = select_branch(&branches, "abc").unwrap();
        assert_eq!(chosen.goto, "first");
    }

    /// **Scenario**: A default branch is only chosen after all others fail, even
    /// when listed first.
    #[test]
    fn default_considered_last() {
        let branches = vec![
            branch(Op::Default, "", "fallback"),
            branch(Op::Equals, "42", "exact"),
        ];
        assert_eq!(select_branch(&branches, "42").unwrap().goto, "exact");
        assert_eq!(select_branch(&branches, "7").unwrap().goto, "fallback");
    }

    /// **Scenario**: No match and no default is an error naming the eval.
    #[test]
    fn no_match_without_default_errors() {
        let branches = vec![branch(Op::Equals, "yes", "y")];
        let err = select_branch(&branches, "no").unwrap_err();
        assert!(err.to_string().contains("no"), "{err}");
    }
}
