use crate::api::{PriorityElectionOptions, RaftOptionsValidated};
use rand::Rng;
use std::cmp;
use tokio::time::Duration;

/// Decides how long a follower waits for a leader, and whether it campaigns once that time is up.
///
/// Randomized: every timeout starts an election.
///
/// Priority: every timeout compares the node's priority with a target priority. The target starts
/// at the maximum and decays by one per timeout, so high priority nodes campaign first while low
/// priority nodes still campaign eventually.
pub(crate) struct ElectionTimer {
    min_timeout: Duration,
    max_timeout: Duration,
    priority: Option<PriorityElectionOptions>,
    target_priority: u32,
}

impl ElectionTimer {
    pub(crate) fn new(options: &RaftOptionsValidated) -> Self {
        ElectionTimer {
            min_timeout: options.election_timeout_min,
            max_timeout: options.election_timeout_max,
            priority: options.priority_election,
            target_priority: options.priority_election.map(|p| p.max_priority).unwrap_or(1),
        }
    }

    /// Called when a follower role is entered.
    pub(crate) fn reset(&mut self) {
        if let Some(priority) = self.priority {
            self.target_priority = priority.max_priority;
        }
    }

    pub(crate) fn next_timeout<R: Rng>(&self, rng: &mut R) -> Duration {
        rng.gen_range(self.min_timeout..=self.max_timeout)
    }

    /// Returns true if the timeout should start an election.
    pub(crate) fn on_timeout(&mut self) -> bool {
        match self.priority {
            None => true,
            Some(priority) => {
                if priority.node_priority >= self.target_priority {
                    true
                } else {
                    self.target_priority = cmp::max(1, self.target_priority - 1);
                    false
                }
            }
        }
    }

    pub(crate) fn target_priority(&self) -> u32 {
        self.target_priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn options(priority: Option<PriorityElectionOptions>) -> RaftOptionsValidated {
        RaftOptionsValidated {
            priority_election: priority,
            ..Default::default()
        }
    }

    #[test]
    fn randomized_timeout_within_bounds() {
        let options = options(None);
        let mut timer = ElectionTimer::new(&options);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..100 {
            let timeout = timer.next_timeout(&mut rng);
            assert!(timeout >= options.election_timeout_min);
            assert!(timeout <= options.election_timeout_max);
            assert!(timer.on_timeout());
        }
    }

    #[test]
    fn priority_target_decays_until_node_qualifies() {
        let mut timer = ElectionTimer::new(&options(Some(PriorityElectionOptions {
            node_priority: 1,
            max_priority: 3,
        })));

        assert!(!timer.on_timeout());
        assert_eq!(timer.target_priority(), 2);
        assert!(!timer.on_timeout());
        assert_eq!(timer.target_priority(), 1);
        assert!(timer.on_timeout());
        // Never decays below 1.
        assert!(timer.on_timeout());
        assert_eq!(timer.target_priority(), 1);

        timer.reset();
        assert_eq!(timer.target_priority(), 3);
    }

    #[test]
    fn highest_priority_campaigns_immediately() {
        let mut timer = ElectionTimer::new(&options(Some(PriorityElectionOptions {
            node_priority: 5,
            max_priority: 5,
        })));

        assert!(timer.on_timeout());
        assert_eq!(timer.target_priority(), 5);
    }
}
