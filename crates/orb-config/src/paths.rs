// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

const STATE_DIR_ENV: &str = "ORB_STATE_DIR";
const WORKSPACE_ENV: &str = "ORB_WORKSPACE";

fn base_state_dir() -> PathBuf {
    std::env::var(STATE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".OpenRoboBrain")
        })
}

fn base_workspace_dir() -> PathBuf {
    std::env::var(WORKSPACE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("OpenRoboBrain")
        })
}

/// Per-agent state directory: session transcripts, memory snapshots.
/// Rooted at `$ORB_STATE_DIR` (default `~/.OpenRoboBrain`).
pub fn state_dir_for(agent_id: &str) -> PathBuf {
    base_state_dir().join(agent_id)
}

/// Per-agent workspace directory: bootstrap files, scratch space.
/// Rooted at `$ORB_WORKSPACE` (default `~/OpenRoboBrain`).
pub fn workspace_dir_for(agent_id: &str) -> PathBuf {
    base_workspace_dir().join(agent_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_dir_nests_under_env_override() {
        std::env::set_var(STATE_DIR_ENV, "/tmp/orb-test-state");
        assert_eq!(
            state_dir_for("bob"),
            PathBuf::from("/tmp/orb-test-state/bob")
        );
        std::env::remove_var(STATE_DIR_ENV);
    }

    #[test]
    fn workspace_dir_nests_under_env_override() {
        std::env::set_var(WORKSPACE_ENV, "/tmp/orb-test-workspace");
        assert_eq!(
            workspace_dir_for("bob"),
            PathBuf::from("/tmp/orb-test-workspace/bob")
        );
        std::env::remove_var(WORKSPACE_ENV);
    }
}
