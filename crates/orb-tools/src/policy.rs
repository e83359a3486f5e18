// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Allow/deny pattern list for one scope (global, or one agent's override).
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl PatternSet {
    fn decide(&self, tool_name: &str) -> Option<Decision> {
        if self.deny.iter().any(|p| glob_matches(p, tool_name)) {
            return Some(Decision::Deny);
        }
        if self.allow.iter().any(|p| glob_matches(p, tool_name)) {
            return Some(Decision::Allow);
        }
        None
    }
}

/// `{allow, deny, per_agent, profile}` as described for the tool executor:
/// a `per_agent` entry, when present, fully overrides the global pattern set
/// for that agent; a `deny` match always beats an `allow` match; `allow:
/// ["*"]` matches everything.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    pub global: PatternSet,
    pub per_agent: HashMap<String, PatternSet>,
    pub profile: Option<String>,
}

impl ToolPolicy {
    pub fn new(allow: Vec<String>, deny: Vec<String>, profile: Option<String>) -> Self {
        Self { global: PatternSet { allow, deny }, per_agent: HashMap::new(), profile }
    }

    pub fn with_per_agent(mut self, agent_id: impl Into<String>, set: PatternSet) -> Self {
        self.per_agent.insert(agent_id.into(), set);
        self
    }

    /// Decide whether `tool_name` may run for `agent_id`. With no agent id,
    /// or no per-agent override for it, falls back to the global pattern set.
    /// Default when nothing matches is [`Decision::Allow`] — an empty policy
    /// is permissive, matching a tool registry with no configured policy.
    pub fn check(&self, tool_name: &str, agent_id: Option<&str>) -> Decision {
        if let Some(id) = agent_id {
            if let Some(set) = self.per_agent.get(id) {
                return set.decide(tool_name).unwrap_or(Decision::Allow);
            }
        }
        self.global.decide(tool_name).unwrap_or(Decision::Allow)
    }
}

/// Convert a simple shell glob pattern (`*` = any run of characters, `?` =
/// exactly one) to an anchored regex match against `name`.
fn glob_matches(pattern: &str, name: &str) -> bool {
    compile_glob(pattern).map(|re| re.is_match(name)).unwrap_or(false)
}

fn compile_glob(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_beats_allow_for_same_pattern() {
        let p = ToolPolicy::new(vec!["shell".into()], vec!["shell".into()], None);
        assert_eq!(p.check("shell", None), Decision::Deny);
    }

    #[test]
    fn allow_wildcard_matches_everything() {
        let p = ToolPolicy::new(vec!["*".into()], vec![], None);
        assert_eq!(p.check("memory_write", None), Decision::Allow);
    }

    #[test]
    fn deny_specific_with_allow_wildcard() {
        let p = ToolPolicy::new(vec!["*".into()], vec!["shell".into()], None);
        assert_eq!(p.check("shell", None), Decision::Deny);
        assert_eq!(p.check("memory_write", None), Decision::Allow);
    }

    #[test]
    fn empty_policy_allows_everything() {
        let p = ToolPolicy::default();
        assert_eq!(p.check("anything", None), Decision::Allow);
    }

    #[test]
    fn per_agent_override_fully_replaces_global() {
        let p = ToolPolicy::new(vec!["*".into()], vec![], None)
            .with_per_agent("restricted-agent", PatternSet { allow: vec![], deny: vec!["*".into()] });
        assert_eq!(p.check("shell", Some("restricted-agent")), Decision::Deny);
        assert_eq!(p.check("shell", Some("other-agent")), Decision::Allow);
        assert_eq!(p.check("shell", None), Decision::Allow);
    }

    #[test]
    fn glob_question_mark_matches_exactly_one_char() {
        // Deny single-char suffix tools, but nothing else — lets us observe
        // whether "?" matched one character or was ignored.
        let p = ToolPolicy::new(vec![], vec!["read_?".into()], None);
        assert_eq!(p.check("read_1", None), Decision::Deny);
        assert_eq!(p.check("read_12", None), Decision::Allow);
    }
}
