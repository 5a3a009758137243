//! The competitor intelligence crew: four roles, four tasks.

use std::collections::HashMap;

use crewscout_core::crew::{RoleSpec, TaskGraph, TaskSpec};
use crewscout_core::error::Result;
use crewscout_tools::builtin::google_search::TOOL_NAME as SEARCH_TOOL;

/// Placeholder filled with the user's startup idea.
pub const STARTUP_IDEA: &str = "startup_idea";

pub const MARKET_RESEARCHER: &str = "Market Researcher";
pub const FEATURE_ANALYST: &str = "Feature Analyst";
pub const DIFFERENTIATION_STRATEGIST: &str = "Differentiation Strategist";
pub const GTM_COACH: &str = "Go-To-Market Coach";

fn roles() -> Vec<RoleSpec> {
    vec![
        RoleSpec::new(
            MARKET_RESEARCHER,
            "Find competitors and analyze their positioning",
            "Expert in scraping data and identifying market trends",
        )
        .with_tools(vec![SEARCH_TOOL.to_string()]),
        RoleSpec::new(
            FEATURE_ANALYST,
            "Compare features and identify gaps",
            "Product manager with 10+ years in competitive analysis",
        ),
        RoleSpec::new(
            DIFFERENTIATION_STRATEGIST,
            "Suggest unique positioning and differentiation strategies",
            "Marketing expert specializing in competitive differentiation",
        ),
        RoleSpec::new(
            GTM_COACH,
            "Analyze competitors' GTM strategies and suggest improvements",
            "Growth hacker with experience in launching 50+ startups",
        ),
    ]
}

fn tasks() -> Vec<TaskSpec> {
    let deps = |ids: &[&str]| ids.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    vec![
        TaskSpec::new(
            "research",
            MARKET_RESEARCHER,
            "Find 5 competitors for {startup_idea}",
            "List of competitors with names and URLs",
        ),
        TaskSpec::new(
            "comparison",
            FEATURE_ANALYST,
            "Analyze features of found competitors",
            "Feature comparison table with gaps identified",
        )
        .with_dependencies(deps(&["research"])),
        TaskSpec::new(
            "differentiation",
            DIFFERENTIATION_STRATEGIST,
            "Suggest how to differentiate {startup_idea} from competitors found in previous tasks",
            "3-5 unique positioning strategies with rationale",
        )
        .with_dependencies(deps(&["research", "comparison"])),
        TaskSpec::new(
            "gtm",
            GTM_COACH,
            "Propose a go-to-market strategy based on competitor weaknesses",
            "1. Competitor GTM analysis 2. 3 actionable launch tactics",
        )
        .with_dependencies(deps(&["research", "comparison"])),
    ]
}

/// Build the fixed competitor analysis graph.
pub fn competitor_crew() -> Result<TaskGraph> {
    TaskGraph::new(roles(), tasks())
}

/// Run inputs for one idea.
pub fn idea_inputs(idea: &str) -> HashMap<String, String> {
    HashMap::from([(STARTUP_IDEA.to_string(), idea.to_string())])
}
