//! Declarative crew definitions: roles, tasks, and the dependency graph
//! between tasks.
//!
//! A task's description and expected output may contain `{name}` placeholders.
//! They are filled from the run inputs before any task executes.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CrewError, Result};

/// A persona bound to one or more tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleSpec {
    pub name: String,
    pub goal: String,
    pub backstory: String,
    /// Names of the tools this role may call.
    #[serde(default)]
    pub tools: Vec<String>,
}

impl RoleSpec {
    pub fn new(
        name: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            tools: vec![],
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }
}

/// A unit of delegated work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    pub id: String,
    pub description: String,
    pub expected_output: String,
    /// Name of the assigned role.
    pub role: String,
    /// Ids of the tasks whose output this task receives as context.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl TaskSpec {
    pub fn new(
        id: impl Into<String>,
        role: impl Into<String>,
        description: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            expected_output: expected_output.into(),
            role: role.into(),
            depends_on: vec![],
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Fill placeholders in the description and expected output.
    pub fn render(&self, inputs: &HashMap<String, String>) -> Result<RenderedTask> {
        let fill = |template: &str| {
            render_template(template, inputs).map_err(|name| CrewError::MissingInput {
                task: self.id.clone(),
                name,
            })
        };
        Ok(RenderedTask {
            id: self.id.clone(),
            description: fill(&self.description)?,
            expected_output: fill(&self.expected_output)?,
        })
    }
}

/// A task with its placeholders substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTask {
    pub id: String,
    pub description: String,
    pub expected_output: String,
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
    })
}

/// Replace every `{name}` in `template` with `inputs[name]`.
///
/// Returns the name of the first placeholder that has no input.
pub fn render_template(
    template: &str,
    inputs: &HashMap<String, String>,
) -> std::result::Result<String, String> {
    let re = placeholder_regex();
    if let Some(missing) = re
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .find(|name| !inputs.contains_key(name))
    {
        return Err(missing);
    }

    Ok(re
        .replace_all(template, |caps: &regex::Captures<'_>| inputs[&caps[1]].clone())
        .into_owned())
}

/// A validated, acyclic graph of tasks and the roles that perform them.
///
/// Only [`TaskGraph::new`] builds one, so every instance has unique ids,
/// resolvable references, and a topological order.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    roles: Vec<RoleSpec>,
    tasks: Vec<TaskSpec>,
    order: Vec<usize>,
}

impl TaskGraph {
    pub fn new(roles: Vec<RoleSpec>, tasks: Vec<TaskSpec>) -> Result<Self> {
        let mut role_names = HashSet::new();
        for role in &roles {
            if !role_names.insert(role.name.as_str()) {
                return Err(CrewError::InvalidGraph(format!(
                    "duplicate role '{}'",
                    role.name
                )));
            }
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.id.as_str(), i).is_some() {
                return Err(CrewError::InvalidGraph(format!(
                    "duplicate task '{}'",
                    task.id
                )));
            }
        }

        for task in &tasks {
            if !role_names.contains(task.role.as_str()) {
                return Err(CrewError::InvalidGraph(format!(
                    "task '{}' references unknown role '{}'",
                    task.id, task.role
                )));
            }
            for dep in &task.depends_on {
                if !index.contains_key(dep.as_str()) {
                    return Err(CrewError::InvalidGraph(format!(
                        "task '{}' depends on unknown task '{}'",
                        task.id, dep
                    )));
                }
            }
        }

        let order = topological_order(&tasks, &index)?;
        Ok(Self { roles, tasks, order })
    }

    pub fn roles(&self) -> &[RoleSpec] {
        &self.roles
    }

    /// Tasks in declaration order.
    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn role(&self, name: &str) -> Option<&RoleSpec> {
        self.roles.iter().find(|r| r.name == name)
    }

    /// The role assigned to `task`. Always present for tasks of this graph.
    pub fn role_for(&self, task: &TaskSpec) -> Option<&RoleSpec> {
        self.role(&task.role)
    }

    /// Direct dependencies of `task`, in the order the task lists them.
    pub fn dependencies(&self, task: &TaskSpec) -> Vec<&TaskSpec> {
        task.depends_on
            .iter()
            .filter_map(|id| self.task(id))
            .collect()
    }

    /// Tasks in a topological order; ties go to declaration order.
    pub fn execution_order(&self) -> impl Iterator<Item = &TaskSpec> {
        self.order.iter().map(move |&i| &self.tasks[i])
    }

    /// Every placeholder name referenced by any task.
    pub fn placeholders(&self) -> BTreeSet<String> {
        let re = placeholder_regex();
        self.tasks
            .iter()
            .flat_map(|t| [t.description.as_str(), t.expected_output.as_str()])
            .flat_map(|text| re.captures_iter(text).map(|c| c[1].to_string()))
            .collect()
    }
}

/// Kahn's algorithm, always picking the earliest-declared ready task.
fn topological_order(tasks: &[TaskSpec], index: &HashMap<&str, usize>) -> Result<Vec<usize>> {
    let mut done = vec![false; tasks.len()];
    let mut order = Vec::with_capacity(tasks.len());

    while order.len() < tasks.len() {
        let next = (0..tasks.len()).find(|&i| {
            !done[i]
                && tasks[i]
                    .depends_on
                    .iter()
                    .all(|dep| index.get(dep.as_str()).is_some_and(|&d| done[d]))
        });

        match next {
            Some(i) => {
                done[i] = true;
                order.push(i);
            }
            None => {
                let stuck: Vec<&str> = tasks
                    .iter()
                    .zip(&done)
                    .filter(|(_, finished)| !**finished)
                    .map(|(t, _)| t.id.as_str())
                    .collect();
                return Err(CrewError::InvalidGraph(format!(
                    "dependency cycle among tasks: {}",
                    stuck.join(", ")
                )));
            }
        }
    }

    Ok(order)
}
