use bytes::Bytes;
use chrono::Utc;
use raft_consensus::{
    AppendError, AppendInput, ApplicationEntry, ConfigureRequest, ErrorKind, ForceConfigureRequest, Index,
    JoinRequest, LeaveRequest, MemberId, MemberType, PriorityElectionOptions, RaftMember, RaftOptions, RaftRequest,
    RaftResponse, ReadConsistency, ReadError, Role, SimulatedCluster, SimulatedReplica, SimulationOptions,
    SnapshotReplicationListener, SnapshotStore, Term, TransferRequest, VoteRequest, VoteResponse,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::Duration;

// Default options: elections time out within [500ms, 1500ms].
const ELECTION_WINDOW: Duration = Duration::from_secs(10);
const SETTLE: Duration = Duration::from_secs(10);

fn logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

fn cluster(members: &[&str]) -> SimulatedCluster {
    cluster_with(SimulationOptions::default(), members)
}

fn cluster_with(options: SimulationOptions, members: &[&str]) -> SimulatedCluster {
    SimulatedCluster::new(logger(), options, members).expect("Failed to start cluster")
}

fn entry(position: u64) -> AppendInput {
    AppendInput::Application(ApplicationEntry {
        lowest_position: position,
        highest_position: position,
        data: Bytes::from(format!("entry-{}", position)),
    })
}

/// Leader with its first entry of the term committed, so it accepts configuration changes.
fn stable_leader(cluster: &mut SimulatedCluster) -> String {
    let leader = cluster.await_leader(ELECTION_WINDOW).expect("No leader elected");
    cluster.run_for(Duration::from_millis(500));
    assert_eq!(cluster.leader(), Some(leader.clone()), "Leader changed while settling");
    leader.into_inner()
}

fn followers(cluster: &SimulatedCluster, leader: &str) -> Vec<String> {
    cluster
        .members()
        .into_iter()
        .map(MemberId::into_inner)
        .filter(|id| id != leader)
        .collect()
}

fn replica<'a>(cluster: &'a SimulatedCluster, id: &str) -> &'a SimulatedReplica {
    cluster.replica(id).unwrap_or_else(|| panic!("{} is not running", id))
}

fn all(cluster: &SimulatedCluster, ids: &[&str], condition: impl Fn(&SimulatedReplica) -> bool) -> bool {
    ids.iter()
        .all(|id| cluster.replica(id).map(|r| condition(r)).unwrap_or(false))
}

fn await_response<T>(cluster: &mut SimulatedCluster, mut receiver: oneshot::Receiver<T>, max: Duration) -> T {
    let mut received = None;
    cluster.run_until(max, |_| {
        if received.is_none() {
            if let Ok(value) = receiver.try_recv() {
                received = Some(value);
            }
        }
        received.is_some()
    });
    received.expect("No response in time")
}

fn assert_safe(cluster: &SimulatedCluster) {
    assert!(
        cluster.safety_violations().is_empty(),
        "Safety violations: {:?}",
        cluster.safety_violations()
    );
    cluster.check_log_matching().expect("Logs diverge");
}

fn leave(cluster: &mut SimulatedCluster, leader: &str, member: &str) -> RaftResponse {
    let receiver = cluster.request(
        leader,
        RaftRequest::Leave(LeaveRequest {
            member: MemberId::new(member),
        }),
    );
    await_response(cluster, receiver, SETTLE)
}

#[test]
fn single_append_reaches_every_member() {
    let members = ["a", "b", "c"];
    let mut cluster = cluster(&members);
    let leader = cluster.await_leader(ELECTION_WINDOW).expect("No leader elected");

    let tracker = cluster.append(leader.as_str(), entry(1));
    assert_eq!(tracker.written(), Some(Index::new(2)));

    let settled = cluster.run_until(SETTLE, |c| all(c, &members, |r| r.commit_index() == Index::new(2)));
    assert!(settled, "Entry never committed everywhere");
    assert_eq!(tracker.committed(), Some(Index::new(2)));
    for id in members.iter() {
        assert_eq!(replica(&cluster, id).last_log_index(), Index::new(2));
        assert_eq!(cluster.committed_indexes(id), vec![Index::new(1), Index::new(2)]);
    }
    assert_safe(&cluster);
}

#[test]
fn snapshot_and_compaction_on_every_member() {
    let members = ["a", "b", "c"];
    let mut cluster = cluster(&members);
    let leader = stable_leader(&mut cluster);

    for position in 1..=128 {
        cluster.append(&leader, entry(position));
    }
    let last = replica(&cluster, &leader).last_log_index();
    assert!(cluster.run_until(SETTLE, |c| all(c, &members, |r| r.commit_index() == last)));

    let snapshot_index = Index::new(100);
    for id in members.iter() {
        cluster
            .take_snapshot(id, snapshot_index, Bytes::from_static(b"state-at-100"))
            .expect("Snapshot failed");
        assert_eq!(cluster.compact(id, snapshot_index).expect("Compaction failed"), snapshot_index);
    }

    for position in 129..=148 {
        cluster.append(&leader, entry(position));
    }
    let last = replica(&cluster, &leader).last_log_index();
    assert!(cluster.run_until(SETTLE, |c| all(c, &members, |r| r.commit_index() == last)));

    for id in members.iter() {
        let r = replica(&cluster, id);
        assert_eq!(r.first_log_index(), Index::new(101), "{} first index", id);
        assert_eq!(r.snapshot_index(), snapshot_index, "{} snapshot index", id);
        assert_eq!(r.last_log_index(), last);
    }
    assert_safe(&cluster);
}

#[test]
fn partitioned_follower_catches_up_through_entries() {
    let members = ["a", "b", "c"];
    let mut cluster = cluster(&members);
    let leader = stable_leader(&mut cluster);
    let lagging = followers(&cluster, &leader).remove(0);

    cluster.isolate(&lagging);
    for position in 1..=20 {
        cluster.append(&leader, entry(position));
    }
    let last = replica(&cluster, &leader).last_log_index();
    assert!(cluster.run_until(SETTLE, |c| c.replica(&leader).unwrap().commit_index() == last));
    cluster
        .take_snapshot(&leader, Index::new(15), Bytes::from_static(b"state-at-15"))
        .expect("Snapshot failed");

    cluster.heal();
    let caught_up = cluster.run_until(SETTLE, |c| match c.leader() {
        Some(current) => {
            let current = c.replica(current.as_str()).unwrap();
            let follower = c.replica(&lagging).unwrap();
            follower.last_log_index() == current.last_log_index() && follower.commit_index() == current.commit_index()
        }
        None => false,
    });
    assert!(caught_up, "{} never caught up", lagging);

    let follower = replica(&cluster, &lagging);
    assert_eq!(follower.snapshot_index(), Index::ZERO);
    assert!(cluster.snapshot_store(&lagging).unwrap().current_snapshot().is_none());
    assert_safe(&cluster);
}

#[test]
fn survivors_elect_new_leader_after_leader_crash() {
    let members = ["a", "b", "c"];
    let mut cluster = cluster(&members);
    let old_leader = stable_leader(&mut cluster);
    let survivors = followers(&cluster, &old_leader);
    let old_term = replica(&cluster, &old_leader).current_term();

    cluster.crash(&old_leader);
    let new_leader = cluster
        .await_leader(Duration::from_secs(5))
        .expect("Survivors didn't elect a leader");
    assert_ne!(new_leader.as_str(), old_leader);
    assert!(replica(&cluster, new_leader.as_str()).current_term() > old_term);

    let tracker = cluster.append(new_leader.as_str(), entry(1));
    let index = tracker.written().expect("Append rejected");
    let survivors: Vec<&str> = survivors.iter().map(String::as_str).collect();
    assert!(cluster.run_until(SETTLE, |c| all(c, &survivors, |r| r.commit_index() >= index)));
    assert_eq!(tracker.committed(), Some(index));
    assert_safe(&cluster);
}

#[test]
fn two_of_five_leave_then_two_of_three_keep_committing() {
    let mut cluster = cluster(&["a", "b", "c", "d", "e"]);
    let leader = stable_leader(&mut cluster);
    let mut others = followers(&cluster, &leader);
    let leaving: Vec<String> = others.drain(..2).collect();

    for member in leaving.iter() {
        let response = leave(&mut cluster, &leader, member);
        assert!(response.status().is_ok(), "Leave of {} failed: {:?}", member, response);
    }
    let configuration = replica(&cluster, &leader).committed_configuration().unwrap().clone();
    assert_eq!(configuration.num_voters(), 3);
    assert!(leaving.iter().all(|m| !configuration.contains(&MemberId::new(m.as_str()))));

    let removed_stop = cluster.run_until(SETTLE, |c| {
        leaving
            .iter()
            .all(|m| c.replica(m).map(|r| r.role() == Role::Inactive).unwrap_or(false))
    });
    assert!(removed_stop, "Removed members are still serving");

    cluster.crash(&leader);
    let new_leader = cluster
        .await_leader(ELECTION_WINDOW)
        .expect("Remaining two didn't elect a leader");
    assert!(others.contains(&new_leader.clone().into_inner()));

    let tracker = cluster.append(new_leader.as_str(), entry(1));
    let index = tracker.written().expect("Append rejected");
    let remaining: Vec<&str> = others.iter().map(String::as_str).collect();
    assert!(cluster.run_until(SETTLE, |c| all(c, &remaining, |r| r.commit_index() >= index)));
    assert_safe(&cluster);
}

#[test]
fn leave_is_idempotent() {
    let mut cluster = cluster(&["a", "b", "c"]);
    let leader = stable_leader(&mut cluster);
    let member = followers(&cluster, &leader).remove(0);

    let first = leave(&mut cluster, &leader, &member);
    let second = leave(&mut cluster, &leader, &member);

    assert!(first.status().is_ok());
    assert!(second.status().is_ok());
    let first = first.configuration().unwrap();
    let second = second.configuration().unwrap();
    assert_eq!(first.index, second.index);
    assert_eq!(first.members, second.members);
}

#[test]
fn leave_is_refused_when_it_would_lose_quorum() {
    let mut cluster = cluster(&["a", "b", "c"]);
    let leader = stable_leader(&mut cluster);
    let others = followers(&cluster, &leader);

    cluster.crash(&others[0]);
    cluster.run_for(Duration::from_secs(1));
    let response = leave(&mut cluster, &leader, &others[1]);

    assert_eq!(response.status().error_kind(), Some(ErrorKind::QuorumUnsafe));
    assert_eq!(
        replica(&cluster, &leader).configuration().unwrap().num_voters(),
        3
    );
}

#[test]
fn new_member_joins_and_receives_the_log() {
    let mut cluster = cluster(&["a", "b", "c"]);
    let leader = stable_leader(&mut cluster);
    for position in 1..=10 {
        cluster.append(&leader, entry(position));
    }
    cluster.add_node("d").expect("Failed to start d");
    assert_eq!(replica(&cluster, "d").role(), Role::Passive);

    let receiver = cluster.request(
        &leader,
        RaftRequest::Join(JoinRequest {
            member: RaftMember::active("d"),
        }),
    );
    let response = await_response(&mut cluster, receiver, SETTLE);
    assert!(response.status().is_ok(), "Join failed: {:?}", response);
    assert_eq!(response.configuration().unwrap().members.len(), 4);

    let caught_up = cluster.run_until(SETTLE, |c| {
        let leader = c.replica(&leader).unwrap();
        let joined = c.replica("d").unwrap();
        joined.role() == Role::Follower && joined.commit_index() == leader.commit_index()
    });
    assert!(caught_up, "d never caught up");
    assert_eq!(replica(&cluster, "d").configuration().unwrap().num_voters(), 4);
    assert_safe(&cluster);
}

#[test]
fn passive_member_follows_commits_without_voting() {
    let members = vec![
        RaftMember::active("a"),
        RaftMember::active("b"),
        RaftMember::active("c"),
        RaftMember::new(MemberId::new("p"), MemberType::Passive),
    ];
    let mut cluster =
        SimulatedCluster::with_members(logger(), SimulationOptions::default(), members).expect("Failed to start");
    let leader = stable_leader(&mut cluster);
    assert_ne!(leader, "p");

    let tracker = cluster.append(&leader, entry(1));
    let index = tracker.written().unwrap();
    assert!(cluster.run_until(SETTLE, |c| c.replica("p").unwrap().commit_index() >= index));

    let passive = replica(&cluster, "p");
    assert_eq!(passive.role(), Role::Passive);
    assert!(passive.last_log_index() <= replica(&cluster, &leader).commit_index());
}

#[test]
fn join_of_a_known_member_changes_nothing() {
    let members = vec![
        RaftMember::active("a"),
        RaftMember::active("b"),
        RaftMember::active("c"),
        RaftMember::new(MemberId::new("p"), MemberType::Passive),
    ];
    let mut cluster =
        SimulatedCluster::with_members(logger(), SimulationOptions::default(), members).expect("Failed to start");
    let leader = stable_leader(&mut cluster);
    let before = replica(&cluster, &leader).configuration().cloned().unwrap();

    // Asking for a different type doesn't promote it either.
    let receiver = cluster.request(
        &leader,
        RaftRequest::Join(JoinRequest {
            member: RaftMember::active("p"),
        }),
    );
    let response = await_response(&mut cluster, receiver, SETTLE);
    assert!(response.status().is_ok(), "Join failed: {:?}", response);
    let configuration = response.configuration().unwrap();
    assert_eq!(configuration.index, before.index);
    assert_eq!(configuration.members, before.members);

    cluster.run_for(Duration::from_secs(1));
    let passive = replica(&cluster, "p");
    assert_eq!(passive.role(), Role::Passive);
    assert_eq!(
        passive.configuration().and_then(|c| c.member_type(&MemberId::new("p"))),
        Some(MemberType::Passive)
    );
    assert_safe(&cluster);
}

#[derive(Clone, Default)]
struct InstallCounter(Arc<Mutex<(u32, u32)>>);

impl InstallCounter {
    fn started(&self) -> u32 {
        self.0.lock().unwrap().0
    }
}

impl SnapshotReplicationListener for InstallCounter {
    fn on_snapshot_replication_started(&mut self) {
        self.0.lock().unwrap().0 += 1;
    }

    fn on_snapshot_replication_completed(&mut self, _term: Term) {
        self.0.lock().unwrap().1 += 1;
    }
}

/// Leader and healthy follower snapshot and compact everything while `lagging` is down.
fn compact_while_down(cluster: &mut SimulatedCluster, leader: &str, lagging: &str, data: &Bytes) -> Index {
    let healthy: Vec<String> = cluster
        .members()
        .into_iter()
        .map(MemberId::into_inner)
        .filter(|id| id != lagging)
        .collect();
    let healthy: Vec<&str> = healthy.iter().map(String::as_str).collect();

    cluster.crash(lagging);
    for position in 1..=40 {
        cluster.append(leader, entry(position));
    }
    let last = replica(cluster, leader).last_log_index();
    assert!(cluster.run_until(SETTLE, |c| all(c, &healthy, |r| r.commit_index() == last)));
    for id in healthy.iter() {
        cluster.take_snapshot(id, last, data.clone()).expect("Snapshot failed");
        cluster.compact(id, last).expect("Compaction failed");
    }

    last
}

fn snapshot_options() -> SimulationOptions {
    SimulationOptions {
        raft_options: RaftOptions {
            prefer_snapshot_replication_threshold: Some(10),
            ..RaftOptions::default()
        },
        snapshot_chunk_size: 8,
        ..SimulationOptions::default()
    }
}

#[test]
fn lagging_follower_catches_up_through_snapshot() {
    let mut cluster = cluster_with(snapshot_options(), &["a", "b", "c"]);
    let leader = stable_leader(&mut cluster);
    let lagging = followers(&cluster, &leader).remove(0);
    let data = Bytes::from(vec![7u8; 100]);

    let snapshot_index = compact_while_down(&mut cluster, &leader, &lagging, &data);
    cluster.restart(&lagging).expect("Restart failed");
    let installs = InstallCounter::default();
    cluster
        .replica_mut(&lagging)
        .unwrap()
        .add_snapshot_replication_listener(Box::new(installs.clone()));

    let caught_up = cluster.run_until(SETTLE, |c| {
        let follower = c.replica(&lagging).unwrap();
        follower.snapshot_index() == snapshot_index && follower.commit_index() >= snapshot_index
    });
    assert!(caught_up, "{} never installed the snapshot", lagging);
    assert_eq!(cluster.snapshot_store(&lagging).unwrap().current_snapshot_data(), Some(data));
    assert!(installs.started() >= 1);

    let tracker = cluster.append(&leader, entry(41));
    let index = tracker.written().unwrap();
    assert!(cluster.run_until(SETTLE, |c| c.replica(&lagging).unwrap().commit_index() >= index));
    assert_safe(&cluster);
}

#[test]
fn interrupted_install_starts_over() {
    let options = SimulationOptions {
        snapshot_chunk_size: 1,
        ..snapshot_options()
    };
    let mut cluster = cluster_with(options, &["a", "b", "c"]);
    let leader = stable_leader(&mut cluster);
    let lagging = followers(&cluster, &leader).remove(0);
    let data: Bytes = (0..200u8).collect::<Vec<u8>>().into();

    let snapshot_index = compact_while_down(&mut cluster, &leader, &lagging, &data);
    cluster.restart(&lagging).expect("Restart failed");
    let installs = InstallCounter::default();
    cluster
        .replica_mut(&lagging)
        .unwrap()
        .add_snapshot_replication_listener(Box::new(installs.clone()));

    assert!(cluster.run_until(SETTLE, |_| installs.started() >= 1));
    cluster.run_for(Duration::from_millis(50));
    assert_eq!(replica(&cluster, &lagging).snapshot_index(), Index::ZERO, "Install finished too fast");

    cluster.crash(&lagging);
    cluster.run_for(Duration::from_secs(1));
    cluster.restart(&lagging).expect("Restart failed");

    let caught_up = cluster.run_until(Duration::from_secs(30), |c| {
        c.replica(&lagging).unwrap().snapshot_index() == snapshot_index
    });
    assert!(caught_up, "{} never installed the snapshot", lagging);
    assert_eq!(cluster.snapshot_store(&lagging).unwrap().current_snapshot_data(), Some(data));
    assert_safe(&cluster);
}

#[test]
fn leadership_transfer() {
    let mut cluster = cluster(&["a", "b", "c"]);
    let leader = stable_leader(&mut cluster);
    let target = followers(&cluster, &leader).remove(0);

    let receiver = cluster.request(
        &leader,
        RaftRequest::Transfer(TransferRequest {
            member: MemberId::new(target.as_str()),
        }),
    );
    let response = await_response(&mut cluster, receiver, SETTLE);
    assert!(response.status().is_ok(), "Transfer failed: {:?}", response);

    let transferred = cluster.run_until(ELECTION_WINDOW, |c| c.leader() == Some(MemberId::new(target.as_str())));
    assert!(transferred, "{} never took over", target);
    assert_safe(&cluster);
}

#[test]
fn followers_refuse_appends() {
    let mut cluster = cluster(&["a", "b", "c"]);
    let leader = stable_leader(&mut cluster);
    let follower = followers(&cluster, &leader).remove(0);

    let rejected = cluster.append(&follower, entry(1));
    assert!(matches!(
        rejected.events().write_error,
        Some(AppendError::NotLeader(ref l)) if l.as_str() == leader
    ));
    assert_eq!(rejected.written(), None);
}

/// Vote answered on the spot, without running the clock.
fn vote(cluster: &mut SimulatedCluster, to: &str, candidate: &str, term: u64, last_log: (u64, Index)) -> VoteResponse {
    let mut receiver = cluster.request(
        to,
        RaftRequest::Vote(VoteRequest {
            term: Term::new(term),
            candidate: MemberId::new(candidate),
            last_log_index: last_log.1,
            last_log_term: Term::new(last_log.0),
        }),
    );
    match receiver.try_recv() {
        Ok(RaftResponse::Vote(response)) => response,
        other => panic!("Expected a vote response, got {:?}", other),
    }
}

#[test]
fn one_vote_per_term() {
    let mut cluster = cluster(&["a", "b", "c"]);
    let empty = (0, Index::ZERO);

    assert!(vote(&mut cluster, "a", "b", 1, empty).voted);
    assert!(!vote(&mut cluster, "a", "c", 1, empty).voted);
    // Same candidate asking again, e.g. after a lost reply.
    assert!(vote(&mut cluster, "a", "b", 1, empty).voted);

    assert!(vote(&mut cluster, "a", "c", 2, empty).voted);
    assert_eq!(replica(&cluster, "a").current_term(), Term::new(2));

    let stale = vote(&mut cluster, "a", "b", 1, empty);
    assert!(stale.status.is_ok());
    assert!(!stale.voted);
    assert_eq!(stale.term, Term::new(2));
}

#[test]
fn candidate_with_older_log_is_denied() {
    let members = ["a", "b", "c"];
    let mut cluster = cluster(&members);
    let leader = stable_leader(&mut cluster);
    assert!(cluster.run_until(SETTLE, |c| all(c, &members, |r| r.last_log_index() >= Index::new(1))));

    let others = followers(&cluster, &leader);
    let (voter, candidate) = (others[0].as_str(), others[1].as_str());
    let term = replica(&cluster, voter).current_term().as_u64();
    let last_index = replica(&cluster, voter).last_log_index();

    let denied = vote(&mut cluster, voter, candidate, term + 1, (0, Index::ZERO));
    assert!(!denied.voted);
    // The term still moves forward.
    assert_eq!(denied.term, Term::new(term + 1));

    let behind = vote(&mut cluster, voter, candidate, term + 1, (term - 1, last_index));
    assert!(!behind.voted);

    let granted = vote(&mut cluster, voter, candidate, term + 1, (term, last_index));
    assert!(granted.voted);
}

#[test]
fn non_voters_neither_vote_nor_get_votes() {
    let members = vec![
        RaftMember::active("a"),
        RaftMember::active("b"),
        RaftMember::active("c"),
        RaftMember::new(MemberId::new("p"), MemberType::Passive),
    ];
    let mut cluster =
        SimulatedCluster::with_members(logger(), SimulationOptions::default(), members).expect("Failed to start");
    let empty = (0, Index::ZERO);

    // Neither a passive member nor a stranger can bump a voter's term.
    for candidate in ["p", "stranger"].iter() {
        let response = vote(&mut cluster, "a", candidate, 5, empty);
        assert!(!response.voted);
        assert_eq!(response.term, Term::ZERO);
    }
    assert_eq!(replica(&cluster, "a").current_term(), Term::ZERO);

    let response = vote(&mut cluster, "p", "b", 1, empty);
    assert!(!response.voted);
    assert_eq!(response.status.error_kind(), Some(ErrorKind::IllegalMemberState));
    assert_eq!(response.term, Term::ZERO);
}

#[test]
fn configure_from_an_old_term_is_refused_with_the_current_term() {
    let mut cluster = cluster(&["a", "b", "c"]);
    assert!(vote(&mut cluster, "a", "b", 2, (0, Index::ZERO)).voted);

    let mut receiver = cluster.request(
        "a",
        RaftRequest::Configure(ConfigureRequest {
            term: Term::new(1),
            leader: MemberId::new("c"),
            index: Index::new(1),
            configuration_term: Term::new(1),
            timestamp: Utc::now(),
            members: vec![RaftMember::active("a"), RaftMember::active("c")],
        }),
    );
    let response = match receiver.try_recv() {
        Ok(RaftResponse::Configure(response)) => response,
        other => panic!("Expected a configure response, got {:?}", other),
    };

    assert_eq!(response.status.error_kind(), Some(ErrorKind::IllegalMemberState));
    assert_eq!(response.term, Term::new(2));
    let a = replica(&cluster, "a");
    assert_eq!(a.configuration().map(|c| c.index), Some(Index::ZERO));
    assert_eq!(a.leader(), None);
}

#[test]
fn uncommitted_append_fails_when_leader_is_cut_off() {
    let mut cluster = cluster(&["a", "b", "c"]);
    let leader = stable_leader(&mut cluster);

    cluster.isolate(&leader);
    let tracker = cluster.append(&leader, entry(1));
    assert!(tracker.written().is_some());

    let failed = cluster.run_until(SETTLE, |_| tracker.events().commit_error.is_some());
    assert!(failed, "Append was never failed");
    assert!(matches!(tracker.events().commit_error, Some(AppendError::LeadershipLost)));
    assert_eq!(tracker.committed(), None);
    assert_ne!(replica(&cluster, &leader).role(), Role::Leader);
    assert_safe(&cluster);
}

#[test]
fn force_configure_recovers_a_lone_survivor() {
    let mut cluster = cluster(&["a", "b", "c"]);
    let leader = stable_leader(&mut cluster);
    let survivor = followers(&cluster, &leader).remove(0);
    for id in cluster.members() {
        if id.as_str() != survivor {
            cluster.crash(id.as_str());
        }
    }
    cluster.run_for(Duration::from_secs(2));
    assert_eq!(cluster.leader(), None);

    let (term, index) = {
        let r = replica(&cluster, &survivor);
        (r.current_term(), r.configuration().unwrap().index)
    };
    let receiver = cluster.request(
        &survivor,
        RaftRequest::ForceConfigure(ForceConfigureRequest {
            term,
            index,
            timestamp: Utc::now(),
            members: vec![RaftMember::active(survivor.as_str())],
        }),
    );
    let response = await_response(&mut cluster, receiver, SETTLE);
    assert!(response.status().is_ok(), "ForceConfigure failed: {:?}", response);

    let elected = cluster.run_until(ELECTION_WINDOW, |c| c.leader() == Some(MemberId::new(survivor.as_str())));
    assert!(elected, "Survivor never became leader");

    let tracker = cluster.append(&survivor, entry(1));
    let index = tracker.written().unwrap();
    assert!(cluster.run_until(SETTLE, |_| tracker.committed() == Some(index)));
    assert_eq!(replica(&cluster, &survivor).committed_configuration().unwrap().num_voters(), 1);
}

#[test]
fn read_consistency_levels() {
    let mut cluster = cluster(&["a", "b", "c"]);
    let leader = stable_leader(&mut cluster);
    let follower = followers(&cluster, &leader).remove(0);
    let tracker = cluster.append(&leader, entry(1));
    let index = tracker.written().unwrap();
    assert!(cluster.run_until(SETTLE, |c| c.replica(&follower).unwrap().last_applied() >= index));

    let sequential = cluster.read(&follower, ReadConsistency::Sequential);
    let applied = replica(&cluster, &follower).last_applied();
    assert_eq!(await_response(&mut cluster, sequential, SETTLE), Ok(applied));

    let redirected = cluster.read(&follower, ReadConsistency::Linearizable);
    assert_eq!(
        await_response(&mut cluster, redirected, SETTLE),
        Err(ReadError::NotLeader(MemberId::new(leader.as_str())))
    );

    let mut lease = cluster.read(&leader, ReadConsistency::LinearizableLease);
    assert_eq!(lease.try_recv().ok(), Some(Ok(index)), "Lease read should answer right away");

    let linearizable = cluster.read(&leader, ReadConsistency::Linearizable);
    assert_eq!(await_response(&mut cluster, linearizable, SETTLE), Ok(index));

    cluster.isolate(&leader);
    let cut_off = cluster.read(&leader, ReadConsistency::Linearizable);
    let result = await_response(&mut cluster, cut_off, SETTLE);
    assert!(
        matches!(result, Err(ReadError::QuorumUnreachable) | Err(ReadError::LeadershipLost)),
        "Unexpected read result {:?}",
        result
    );
}

#[test]
fn highest_priority_member_is_elected_first() {
    let priority = |node_priority| RaftOptions {
        priority_election: Some(PriorityElectionOptions {
            node_priority,
            max_priority: 3,
        }),
        ..RaftOptions::default()
    };
    let mut member_options = HashMap::new();
    member_options.insert(MemberId::new("a"), priority(1));
    member_options.insert(MemberId::new("b"), priority(3));
    member_options.insert(MemberId::new("c"), priority(1));

    for seed in 0..5 {
        let options = SimulationOptions {
            seed,
            member_options: member_options.clone(),
            ..SimulationOptions::default()
        };
        let mut cluster = cluster_with(options, &["a", "b", "c"]);
        let leader = cluster.await_leader(ELECTION_WINDOW).expect("No leader elected");
        assert_eq!(leader.as_str(), "b", "seed {}", seed);
    }
}

#[test]
fn restarted_member_keeps_its_log_and_term() {
    let members = ["a", "b", "c"];
    let mut cluster = cluster(&members);
    let leader = stable_leader(&mut cluster);
    let follower = followers(&cluster, &leader).remove(0);
    for position in 1..=5 {
        cluster.append(&leader, entry(position));
    }
    let last = replica(&cluster, &leader).last_log_index();
    assert!(cluster.run_until(SETTLE, |c| all(c, &members, |r| r.commit_index() == last)));
    let term = replica(&cluster, &follower).current_term();

    cluster.crash(&follower);
    cluster.restart(&follower).expect("Restart failed");
    let restarted = replica(&cluster, &follower);
    assert_eq!(restarted.last_log_index(), last);
    assert_eq!(restarted.current_term(), term);
    assert_eq!(restarted.commit_index(), Index::ZERO);

    assert!(cluster.run_until(SETTLE, |c| c.replica(&follower).unwrap().commit_index() == last));
    let replayed = cluster.committed_indexes(&follower);
    assert_eq!(replayed.len() as u64, last.as_u64());
    assert_safe(&cluster);
}
