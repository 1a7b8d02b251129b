//! Executor routing from task titles.
//!
//! A task is routed by the tag its title starts with. Rules are checked in
//! table order and the first match wins. Leading whitespace is ignored and
//! matching is ASCII case-insensitive. Titles without a recognized tag go to
//! a human.

use crate::domain::ExecutorType;
use crate::domain::ExecutorType::{CodeAgent, Human, ReasoningAgent, RemoteAgent};

/// A title-prefix rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingRule {
    pub tag: &'static str,
    pub executor: ExecutorType,
}

const fn rule(tag: &'static str, executor: ExecutorType) -> RoutingRule {
    RoutingRule { tag, executor }
}

/// Routing table, in precedence order.
pub const RULES: &[RoutingRule] = &[
    // explicit executor names
    rule("[code-agent]", CodeAgent),
    rule("[reasoning-agent]", ReasoningAgent),
    rule("[remote-agent]", RemoteAgent),
    // shorthand
    rule("[CC]", CodeAgent),
    rule("[AI]", ReasoningAgent),
    rule("[DE]", RemoteAgent),
    rule("[HUMAN]", Human),
    rule("[BLOCKED]", Human),
    // verbs
    rule("[implement]", CodeAgent),
    rule("[fix]", CodeAgent),
    rule("[test]", CodeAgent),
    rule("[debug]", CodeAgent),
    rule("[refactor]", CodeAgent),
    rule("[deploy]", CodeAgent),
    rule("[code]", CodeAgent),
    rule("[research]", ReasoningAgent),
    rule("[design]", ReasoningAgent),
    rule("[document]", ReasoningAgent),
    rule("[analyze]", ReasoningAgent),
    rule("[plan]", ReasoningAgent),
    rule("[write]", ReasoningAgent),
    rule("[review]", Human),
    rule("[approve]", Human),
    rule("[decide]", Human),
    rule("[call]", Human),
    rule("[meeting]", Human),
];

pub const DEFAULT_EXECUTOR: ExecutorType = ExecutorType::Human;

fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
    haystack
        .as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}

/// Executor type and the tag that selected it (`None` for the default).
pub fn classify(title: &str) -> (ExecutorType, Option<&'static str>) {
    let title = title.trim_start();
    RULES
        .iter()
        .find(|r| starts_with_ignore_case(title, r.tag))
        .map(|r| (r.executor, Some(r.tag)))
        .unwrap_or((DEFAULT_EXECUTOR, None))
}

pub fn route(title: &str) -> ExecutorType {
    classify(title).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("[CC] Fix login bug", CodeAgent)]
    #[case("[cc] lower-case shorthand", CodeAgent)]
    #[case("  [fix] leading whitespace", CodeAgent)]
    #[case("[Implement] oauth flow", CodeAgent)]
    #[case("[code-agent] explicit", CodeAgent)]
    #[case("[AI] summarize notes", ReasoningAgent)]
    #[case("[research] vector databases", ReasoningAgent)]
    #[case("[write] blog post", ReasoningAgent)]
    #[case("[DE] run nightly export", RemoteAgent)]
    #[case("[remote-agent] sync mirrors", RemoteAgent)]
    #[case("[review] pull request 42", Human)]
    #[case("[BLOCKED] waiting on vendor", Human)]
    #[case("Buy groceries", Human)]
    #[case("", Human)]
    #[case("fix [CC] tag not at start", Human)]
    #[case("[testing] is not [test]", Human)]
    fn routes_by_title_prefix(#[case] title: &str, #[case] expected: ExecutorType) {
        assert_eq!(route(title), expected);
    }

    #[test]
    fn classify_reports_matching_tag() {
        assert_eq!(classify("[cc] x"), (CodeAgent, Some("[CC]")));
        assert_eq!(classify("plain"), (Human, None));
    }

    #[test]
    fn multibyte_titles_do_not_panic() {
        assert_eq!(route("é"), Human);
        assert_eq!(route("日本語のタスク"), Human);
    }

    #[test]
    fn every_tag_is_bracketed() {
        for r in RULES {
            assert!(r.tag.starts_with('[') && r.tag.ends_with(']'), "{}", r.tag);
        }
    }
}
