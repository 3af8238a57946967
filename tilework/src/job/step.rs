//! Resumable computations driven one step at a time.

use super::job::Job;
use std::fmt;

/// Outcome of advancing a computation by one step.
pub enum Step {
    /// More work remains; resume on the next tick.
    Continue,
    /// Drive this sub-unit to completion before resuming the caller.
    Await(Box<dyn Resumable>),
    /// Resume only after this job has sent its completion notification.
    ///
    /// A job that has not been started yet is started by the awaiting job.
    AwaitJob(Job),
    /// The computation is finished.
    Done,
}

impl Step {
    /// Awaits a sub-computation built from `unit`.
    pub fn awaiting<R: Resumable + 'static>(unit: R) -> Self {
        Self::Await(Box::new(unit))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "Continue"),
            Self::Await(_) => write!(f, "Await(..)"),
            Self::AwaitJob(job) => write!(f, "AwaitJob({})", job.id()),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// A steppable unit of work.
///
/// Each call to [`resume`](Self::resume) performs one step, including the
/// call that returns [`Step::Done`].
pub trait Resumable: Send {
    /// Advances the computation by one step.
    fn resume(&mut self) -> Step;
}

impl<F> Resumable for F
where
    F: FnMut() -> Step + Send,
{
    fn resume(&mut self) -> Step {
        self()
    }
}

/// Adapts an iterator: each item is one step, exhaustion is `Done`.
pub struct IterSteps<I> {
    iter: I,
}

impl<I> Resumable for IterSteps<I>
where
    I: Iterator<Item = Step> + Send,
{
    fn resume(&mut self) -> Step {
        self.iter.next().unwrap_or(Step::Done)
    }
}

/// Wraps an iterator of steps as a [`Resumable`].
pub fn from_iter<I>(steps: I) -> IterSteps<I::IntoIter>
where
    I: IntoIterator<Item = Step>,
    I::IntoIter: Send,
{
    IterSteps {
        iter: steps.into_iter(),
    }
}

/// A computation that takes exactly `n` steps, the last one returning `Done`.
///
/// `n == 0` behaves like `n == 1`: the first call returns `Done`.
pub fn counted(n: u64) -> impl Resumable {
    let mut taken = 0u64;
    move || {
        taken += 1;
        if taken >= n {
            Step::Done
        } else {
            Step::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(mut unit: impl Resumable) -> u64 {
        let mut calls = 0;
        loop {
            calls += 1;
            if let Step::Done = unit.resume() {
                return calls;
            }
        }
    }

    #[test]
    fn test_counted_takes_n_calls() {
        assert_eq!(drive(counted(1)), 1);
        assert_eq!(drive(counted(5)), 5);
    }

    #[test]
    fn test_counted_zero_is_single_step() {
        assert_eq!(drive(counted(0)), 1);
    }

    #[test]
    fn test_from_iter_exhaustion_is_done() {
        let unit = from_iter(vec![Step::Continue, Step::Continue]);
        assert_eq!(drive(unit), 3);
    }

    #[test]
    fn test_closure_is_resumable() {
        let mut left = 2;
        let unit = move || {
            left -= 1;
            if left == 0 {
                Step::Done
            } else {
                Step::Continue
            }
        };
        assert_eq!(drive(unit), 2);
    }

    #[test]
    fn test_step_debug() {
        assert_eq!(format!("{:?}", Step::Continue), "Continue");
        assert_eq!(format!("{:?}", Step::awaiting(counted(1))), "Await(..)");
    }
}
