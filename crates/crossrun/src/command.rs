//! # Command Channel
//!
//! Out-of-band control requests: listing a process's components, and telling a process that a
//! call it is running has been cancelled or has timed out on the caller's side.
//!
//! `cancel` and `timeout` are fire-and-forget. Delivery is all they guarantee; whether the
//! destination actually stopped anything is unknown to the sender.

use std::sync::Arc;

use crossrpc::Command;
use crossrpc::Request;
use tracing::debug;
use tracing::warn;

use crate::call_id::CallIdGenerator;
use crate::caller;
use crate::caller::Caller;
use crate::endpoint::ProcessId;

#[derive(Clone)]
pub struct CommandChannel {
    caller: Caller,
    ids: Arc<CallIdGenerator>,
}

impl CommandChannel {
    pub fn new(caller: Caller, ids: Arc<CallIdGenerator>) -> Self {
        Self { caller, ids }
    }

    pub async fn cancel(&self, dest: &ProcessId, call_id: &str) -> caller::Result<()> {
        self.signal(dest, Command::Cancel, call_id).await
    }

    pub async fn timeout(&self, dest: &ProcessId, call_id: &str) -> caller::Result<()> {
        self.signal(dest, Command::Timeout, call_id).await
    }

    /// Asks `dest` for the component names it hosts, in the order it reports them.
    pub async fn list_components(&self, dest: &ProcessId) -> caller::Result<Vec<String>> {
        let request = Request::command(Command::ListComponents, self.ids.next_id());
        let reply = self.caller.send(dest, &request).await?;
        reply.component_list.ok_or_else(|| {
            warn!(process = %dest, "list-components reply carried no component list");
            caller::Error::EmptyReply(dest.clone())
        })
    }

    async fn signal(&self, dest: &ProcessId, command: Command, call_id: &str) -> caller::Result<()> {
        let request = Request::command(command, call_id);
        self.caller.send(dest, &request).await?;
        debug!(process = %dest, %command, %call_id, "command delivered");
        Ok(())
    }
}
