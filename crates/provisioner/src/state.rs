use log::info;

use crate::error::{ProvisionError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    NotProvisioned,
    Provisioning,
    AwaitingReady,
    Installing,
    Joining,
    Ready,
    /// Instance created, joins the cluster on its own through user-data.
    Launched,
    Destroying,
    Destroyed,
    Failed(String),
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Ready | NodeState::Launched | NodeState::Destroyed | NodeState::Failed(_)
        )
    }

    pub fn can_transition_to(&self, next: &NodeState) -> bool {
        use NodeState::*;
        if matches!(next, Failed(_)) {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (NotProvisioned, Provisioning)
                | (NotProvisioned, Destroying)
                | (Provisioning, AwaitingReady)
                | (Provisioning, Launched)
                | (AwaitingReady, Installing)
                | (AwaitingReady, Joining)
                | (Installing, Ready)
                | (Joining, Ready)
                | (Ready, Destroying)
                | (Destroying, Destroyed)
        )
    }
}

/// Tracks one node through a single job and logs every step.
#[derive(Debug)]
pub struct NodeLifecycle {
    node_id: String,
    state: NodeState,
    history: Vec<NodeState>,
}

impl NodeLifecycle {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            state: NodeState::NotProvisioned,
            history: vec![NodeState::NotProvisioned],
        }
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn history(&self) -> &[NodeState] {
        &self.history
    }

    pub fn advance(&mut self, next: NodeState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(ProvisionError::InvalidTransition {
                from: self.state.clone(),
                to: next,
            });
        }
        info!("Node {}: {:?} -> {:?}", self.node_id, self.state, next);
        self.history.push(next.clone());
        self.state = next;
        Ok(())
    }

    /// Marks the node failed unless it already reached a terminal state.
    pub fn fail(&mut self, err: &ProvisionError) {
        let failed = NodeState::Failed(err.to_string());
        if self.state.can_transition_to(&failed) {
            info!("Node {}: {:?} -> Failed", self.node_id, self.state);
            self.history.push(failed.clone());
            self.state = failed;
        }
    }
}
