use crate::commitlog::Log;
use crate::replica::errors::{AppendError, FatalError};
use crate::replica::listeners::AppendListener;
use crate::replica::local_state::PersistentLocalState;
use crate::replica::replica::Replica;
use crate::replica::write_ahead_log::{AdministrativeEntry, ApplicationEntry, EntryPayload, RaftLogEntry};
use crate::replica::election::Role;
use std::io;

/// What a client can put in the log.
#[derive(Clone, Debug, PartialEq)]
pub enum AppendInput {
    Application(ApplicationEntry),
    Administrative(AdministrativeEntry),
}

impl<L, S> Replica<L, S>
where
    L: Log<RaftLogEntry>,
    S: PersistentLocalState,
{
    /// Appends to the replicated log. Only the leader accepts appends. The outcome is reported
    /// through `listener` only.
    pub fn append(&mut self, input: AppendInput, listener: Box<dyn AppendListener>) {
        let result = self.append_entry(input, listener);
        self.fail_on_error(result);
    }

    fn append_entry(&mut self, input: AppendInput, mut listener: Box<dyn AppendListener>) -> Result<(), FatalError> {
        if self.role.role() == Role::Inactive {
            listener.on_write_error(AppendError::Inactive);
            return Ok(());
        }

        let term = self.local_state.current_term();
        let leader_state = match self.role.leader_state_mut() {
            Some(leader_state) => leader_state,
            None => {
                let error = match &self.leader {
                    Some(leader) => AppendError::NotLeader(leader.clone()),
                    None => AppendError::NoLeader,
                };
                listener.on_write_error(error);
                return Ok(());
            }
        };

        if leader_state.transfer.is_some() {
            listener.on_write_error(AppendError::TransferInProgress);
            return Ok(());
        }

        if let AppendInput::Application(entry) = &input {
            if let Err(reason) = self
                .entry_validator
                .validate(leader_state.last_application_entry.as_ref(), entry)
            {
                slog::debug!(self.logger, "Validator rejected entry: {}", reason);
                listener.on_write_error(AppendError::ValidationRejected(reason));
                return Ok(());
            }
        }

        let payload = match input {
            AppendInput::Application(entry) => EntryPayload::Application(entry),
            AppendInput::Administrative(entry) => EntryPayload::Administrative(entry),
        };
        let application = match &payload {
            EntryPayload::Application(entry) => Some(entry.clone()),
            _ => None,
        };

        let index = match self.log.append(RaftLogEntry::new(term, payload)) {
            Ok(index) => index,
            Err(e) => {
                // The listener gets a copy, the original goes to the failure listeners.
                listener.on_write_error(AppendError::LocalIo(io::Error::new(e.kind(), e.to_string())));
                return Err(FatalError::LogIo(e));
            }
        };

        listener.on_write(index);
        if let Some(leader_state) = self.role.leader_state_mut() {
            leader_state.pending_appends.insert(index, listener);
            if application.is_some() {
                leader_state.last_application_entry = application;
            }
        }

        self.replicate_to_all()?;
        self.try_commit()
    }
}
