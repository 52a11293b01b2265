//! Bounded iteration
//!
//! One loop shape for everything that repeats with a hard ceiling: agent
//! retries, direct dialogues and review rounds. The loop runs at most
//! `max_rounds` steps and stops as soon as the predicate accepts a step's
//! output.

use std::future::Future;
use std::time::Duration;

/// Delay between rounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// Doubles after every round, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay after 1-based round `round`
    pub fn delay(&self, round: usize) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed(d) => *d,
            Self::Exponential { initial, max } => {
                let shift = round.saturating_sub(1).min(16) as u32;
                initial.saturating_mul(1u32 << shift).min(*max)
            }
        }
    }
}

/// Outcome of a bounded loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bounded<T> {
    /// Output of the final round run
    pub last: Option<T>,
    /// Rounds actually run
    pub rounds: usize,
    /// The predicate accepted `last`
    pub satisfied: bool,
}

impl<T> Bounded<T> {
    /// Ran every allowed round without the predicate accepting any of them
    pub fn exhausted(&self) -> bool {
        !self.satisfied
    }
}

/// Run `step` for rounds `1..=max_rounds` until `done` accepts an output
///
/// The backoff sleep happens only when another round follows.
pub async fn bounded_iterate<T, S, Fut, D>(
    max_rounds: usize,
    backoff: &Backoff,
    mut step: S,
    mut done: D,
) -> Bounded<T>
where
    S: FnMut(usize) -> Fut,
    Fut: Future<Output = T>,
    D: FnMut(&T) -> bool,
{
    let mut last = None;

    for round in 1..=max_rounds {
        let output = step(round).await;
        if done(&output) {
            return Bounded {
                last: Some(output),
                rounds: round,
                satisfied: true,
            };
        }
        last = Some(output);

        if round < max_rounds {
            let delay = backoff.delay(round);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    Bounded {
        last,
        rounds: max_rounds,
        satisfied: false,
    }
}
