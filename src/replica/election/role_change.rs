use crate::replica::election::Role;
use crate::replica::local_state::Term;
use crate::replica::peers::MemberId;
use tokio::sync::watch;

/// A replica's view of the cluster. Published on every role, term or leader change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleChange {
    pub role: Role,
    pub term: Term,
    pub leader: Option<MemberId>,
}

pub(crate) fn channel(initial_state: RoleChange) -> (RoleChangeNotifier, RoleChangeListener) {
    let (snd, rcv) = watch::channel(initial_state);

    (RoleChangeNotifier { snd }, RoleChangeListener { rcv })
}

pub(crate) struct RoleChangeNotifier {
    snd: watch::Sender<RoleChange>,
}

impl RoleChangeNotifier {
    pub(crate) fn notify_new_state(&self, new_state: RoleChange) {
        // Keeps the latest value even when nobody is listening.
        self.snd.send_if_modified(|current| {
            if *current == new_state {
                false
            } else {
                *current = new_state;
                true
            }
        });
    }
}

#[derive(Clone)]
pub struct RoleChangeListener {
    rcv: watch::Receiver<RoleChange>,
}

impl RoleChangeListener {
    /// Waits for the next change. `None` once the replica is gone.
    pub async fn next(&mut self) -> Option<RoleChange> {
        match self.rcv.changed().await {
            Ok(_) => Some(self.rcv.borrow().clone()),
            Err(_) => None,
        }
    }

    pub fn current(&self) -> RoleChange {
        self.rcv.borrow().clone()
    }
}
