//! Per-instance rollout stages and the end-of-run report.

use std::fmt;

use rollfleet_core::Instance;

/// Where one instance is in the rollout.
///
/// Instances move `Pending → Draining → Mutating → Restoring → Done`.
/// `Failed` marks the instance a fatal error occurred on; `Aborted`
/// marks the instances behind it that were never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Draining,
    Mutating,
    Restoring,
    Done,
    Failed,
    Aborted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Pending => "pending",
            Stage::Draining => "draining",
            Stage::Mutating => "mutating",
            Stage::Restoring => "restoring",
            Stage::Done => "done",
            Stage::Failed => "failed",
            Stage::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Final stage of one instance after the rollout ends.
#[derive(Debug, Clone)]
pub struct InstanceOutcome {
    pub instance_id: String,
    pub address: String,
    pub stage: Stage,
}

impl InstanceOutcome {
    pub(crate) fn pending(instance: &Instance) -> Self {
        Self {
            instance_id: instance.id.clone(),
            address: instance.private_ip.clone(),
            stage: Stage::Pending,
        }
    }
}

/// What happened to each instance, in rollout order.
#[derive(Debug, Clone)]
pub struct RolloutReport {
    pub app: String,
    pub environment: String,
    pub outcomes: Vec<InstanceOutcome>,
}

impl RolloutReport {
    /// True when every instance finished the full cycle.
    pub fn succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.stage == Stage::Done)
    }
}

impl fmt::Display for RolloutReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}/{}:", self.app, self.environment)?;
        for outcome in &self.outcomes {
            writeln!(
                f,
                "  {} ({}): {}",
                outcome.instance_id, outcome.address, outcome.stage
            )?;
        }
        Ok(())
    }
}
