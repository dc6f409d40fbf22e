use std::collections::HashSet;

/// Answer to a sampling approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    AllowOnce,
    /// Approve this and every later request from the same server this run.
    AllowSession,
    Deny,
}

/// Servers approved for sampling for the rest of the run.
#[derive(Debug, Default)]
pub struct SamplingApprovals {
    approved: HashSet<String>,
}

impl SamplingApprovals {
    pub fn record(&mut self, server_id: &str, decision: ApprovalDecision) {
        if matches!(decision, ApprovalDecision::AllowSession) {
            self.approved.insert(server_id.to_string());
        }
    }

    pub fn is_approved(&self, server_id: &str) -> bool {
        self.approved.contains(server_id)
    }

    pub fn clear_server(&mut self, server_id: &str) {
        self.approved.remove(server_id);
    }
}
