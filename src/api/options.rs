use std::convert::TryFrom;
use tokio::time::Duration;

/// Knobs for a raft node. Anything left as `None` gets a default.
#[derive(Clone, Debug, Default)]
pub struct RaftOptions {
    pub heartbeat_interval: Option<Duration>,
    pub election_timeout_min: Option<Duration>,
    pub election_timeout_max: Option<Duration>,
    // Leader's deadline for each request to a peer.
    pub peer_request_timeout: Option<Duration>,
    // How far behind (in entries) a member may fall before the leader sends it a snapshot instead.
    pub prefer_snapshot_replication_threshold: Option<u64>,
    pub max_append_batch_size: Option<usize>,
    pub min_step_down_failure_count: Option<u32>,
    pub max_quorum_response_timeout: Option<Duration>,
    pub leader_lease_duration: Option<Duration>,
    pub priority_election: Option<PriorityElectionOptions>,
}

/// Nodes with a higher priority start elections sooner. Everyone may still win.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PriorityElectionOptions {
    pub node_priority: u32,
    pub max_priority: u32,
}

#[derive(Clone, Debug)]
pub struct RaftOptionsValidated {
    pub heartbeat_interval: Duration,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub peer_request_timeout: Duration,
    pub prefer_snapshot_replication_threshold: u64,
    pub max_append_batch_size: usize,
    pub min_step_down_failure_count: u32,
    pub max_quorum_response_timeout: Duration,
    pub leader_lease_duration: Duration,
    pub priority_election: Option<PriorityElectionOptions>,
}

impl RaftOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err("Election minimum timeout must be greater than leader's heartbeat");
        }
        if self.election_timeout_min >= self.election_timeout_max {
            return Err("Election minimum timeout must be less than maximum timeout");
        }
        if self.peer_request_timeout >= self.election_timeout_min {
            return Err("Leader's peer request timeout must be less than the election timeout");
        }
        if self.leader_lease_duration >= self.election_timeout_min {
            return Err("Leader lease must be shorter than the election timeout");
        }
        if self.max_append_batch_size == 0 {
            return Err("Append batch size must be at least 1");
        }
        if self.min_step_down_failure_count == 0 {
            return Err("Step down failure count must be at least 1");
        }
        if let Some(priority) = self.priority_election {
            if priority.node_priority == 0 || priority.node_priority > priority.max_priority {
                return Err("Node priority must be between 1 and max priority");
            }
        }

        Ok(())
    }
}

impl TryFrom<RaftOptions> for RaftOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let election_timeout_max = options.election_timeout_max.unwrap_or(Duration::from_millis(1500));
        let values = RaftOptionsValidated {
            heartbeat_interval: options.heartbeat_interval.unwrap_or(Duration::from_millis(100)),
            election_timeout_min: options.election_timeout_min.unwrap_or(Duration::from_millis(500)),
            election_timeout_max,
            peer_request_timeout: options.peer_request_timeout.unwrap_or(Duration::from_millis(300)),
            prefer_snapshot_replication_threshold: options.prefer_snapshot_replication_threshold.unwrap_or(100),
            max_append_batch_size: options.max_append_batch_size.unwrap_or(64),
            min_step_down_failure_count: options.min_step_down_failure_count.unwrap_or(3),
            max_quorum_response_timeout: options
                .max_quorum_response_timeout
                .unwrap_or(election_timeout_max * 2),
            leader_lease_duration: options.leader_lease_duration.unwrap_or(Duration::from_millis(400)),
            priority_election: options.priority_election,
        };

        values.validate()?;
        Ok(values)
    }
}

impl Default for RaftOptionsValidated {
    fn default() -> Self {
        RaftOptionsValidated {
            heartbeat_interval: Duration::from_millis(100),
            election_timeout_min: Duration::from_millis(500),
            election_timeout_max: Duration::from_millis(1500),
            peer_request_timeout: Duration::from_millis(300),
            prefer_snapshot_replication_threshold: 100,
            max_append_batch_size: 64,
            min_step_down_failure_count: 3,
            max_quorum_response_timeout: Duration::from_millis(3000),
            leader_lease_duration: Duration::from_millis(400),
            priority_election: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let validated = RaftOptionsValidated::try_from(RaftOptions::default()).unwrap();
        let default = RaftOptionsValidated::default();

        assert_eq!(validated.heartbeat_interval, default.heartbeat_interval);
        assert_eq!(validated.election_timeout_max, default.election_timeout_max);
        assert_eq!(validated.max_quorum_response_timeout, default.max_quorum_response_timeout);
        assert!(default.validate().is_ok());
    }

    #[test]
    fn cross_field_validation() {
        let heartbeat_too_slow = RaftOptions {
            heartbeat_interval: Some(Duration::from_millis(600)),
            ..Default::default()
        };
        assert!(RaftOptionsValidated::try_from(heartbeat_too_slow).is_err());

        let inverted_timeouts = RaftOptions {
            election_timeout_min: Some(Duration::from_millis(800)),
            election_timeout_max: Some(Duration::from_millis(700)),
            ..Default::default()
        };
        assert!(RaftOptionsValidated::try_from(inverted_timeouts).is_err());

        let lease_too_long = RaftOptions {
            leader_lease_duration: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        assert!(RaftOptionsValidated::try_from(lease_too_long).is_err());

        let empty_batches = RaftOptions {
            max_append_batch_size: Some(0),
            ..Default::default()
        };
        assert!(RaftOptionsValidated::try_from(empty_batches).is_err());

        let bad_priority = RaftOptions {
            priority_election: Some(PriorityElectionOptions {
                node_priority: 4,
                max_priority: 3,
            }),
            ..Default::default()
        };
        assert!(RaftOptionsValidated::try_from(bad_priority).is_err());
    }

    #[test]
    fn quorum_response_timeout_follows_election_timeout() {
        let options = RaftOptions {
            election_timeout_max: Some(Duration::from_millis(2000)),
            ..Default::default()
        };
        let validated = RaftOptionsValidated::try_from(options).unwrap();
        assert_eq!(validated.max_quorum_response_timeout, Duration::from_millis(4000));
    }
}
