use bytes::Bytes;
use raft_consensus::{
    create_local_raft_node, AppendInput, ApplicationEntry, CommitStream, InMemoryLog, LocalNetwork, MemberId,
    RaftMember, RaftNode, RaftNodeConfig, VolatileLocalState,
};
use slog::Drain;
use std::error::Error;
use tokio::time::Duration;

const MEMBERS: [&str; 3] = ["node-1", "node-2", "node-3"];
const NUM_ENTRIES: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger_for_stdout();
    let network = LocalNetwork::new();
    let members: Vec<RaftMember> = MEMBERS.iter().map(|id| RaftMember::active(*id)).collect();

    let mut nodes = Vec::with_capacity(MEMBERS.len());
    for member in members.iter() {
        let config = RaftNodeConfig::local(logger.clone(), member.id.clone(), members.clone(), &network);
        let (node, commit_stream) =
            create_local_raft_node(config, InMemoryLog::new(), VolatileLocalState::new(member.id.clone()), &network)
                .await?;
        nodes.push((node, commit_stream));
    }

    let leader_id = wait_for_leader(&nodes[0].0).await.ok_or("No leader elected")?;
    slog::info!(logger, "{} is leader", leader_id);

    let (leader, leader_commits) = nodes
        .iter_mut()
        .find(|(node, _)| node.my_member_id() == &leader_id)
        .ok_or("Leader is not one of ours")?;

    for position in 1..=NUM_ENTRIES {
        let handle = leader
            .append(AppendInput::Application(ApplicationEntry {
                lowest_position: position,
                highest_position: position,
                data: Bytes::from(format!("entry {}", position)),
            }))
            .await?;
        let committed = handle.committed().await?;
        slog::info!(logger, "Committed entry {} at {}", position, committed);
    }

    print_application_commits(leader_commits).await;

    for (node, _) in nodes {
        node.shutdown().await;
    }
    Ok(())
}

async fn wait_for_leader(node: &RaftNode) -> Option<MemberId> {
    let mut role_changes = node.role_changes();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(leader) = role_changes.current().leader {
            return Some(leader);
        }
        match tokio::time::timeout_at(deadline, role_changes.next()).await {
            Ok(Some(_)) => {}
            _ => return None,
        }
    }
}

async fn print_application_commits(commits: &mut CommitStream) {
    let mut seen = 0;
    while seen < NUM_ENTRIES {
        let committed = match commits.next().await {
            Some(committed) => committed,
            None => return,
        };
        if let Some(application) = committed.entry.as_ref().and_then(|e| e.application()) {
            println!(
                "{}: {}",
                committed.index,
                String::from_utf8_lossy(&application.data)
            );
            seen += 1;
        }
    }
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
