//! Plan validation: duplicate ids, unknown dependencies, cycle detection.

use std::collections::{HashMap, HashSet};

use super::types::{DagValidationError, TaskPlan};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

pub fn validate(plan: &TaskPlan) -> Result<(), Vec<DagValidationError>> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for task in &plan.tasks {
        if !seen.insert(task.id.clone()) {
            duplicates.push(task.id.clone());
        }
    }
    if !duplicates.is_empty() {
        errors.push(DagValidationError::DuplicateIds(duplicates));
    }

    let ids: HashSet<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();
    for task in &plan.tasks {
        for dep in &task.dependencies {
            if !ids.contains(dep.as_str()) {
                errors.push(DagValidationError::UnknownDependency { task: task.id.clone(), dependency: dep.clone() });
            }
        }
    }

    if errors.is_empty() {
        if let Some(cycle) = find_cycle(plan) {
            errors.push(DagValidationError::Cycle(cycle));
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn find_cycle(plan: &TaskPlan) -> Option<Vec<String>> {
    let adj: HashMap<&str, &[String]> = plan.tasks.iter().map(|t| (t.id.as_str(), t.dependencies.as_slice())).collect();
    let mut color: HashMap<&str, Color> = plan.tasks.iter().map(|t| (t.id.as_str(), Color::White)).collect();
    let mut stack = Vec::new();

    fn visit<'a>(
        node: &'a str,
        adj: &HashMap<&'a str, &'a [String]>,
        color: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        color.insert(node, Color::Gray);
        stack.push(node.to_string());
        if let Some(deps) = adj.get(node) {
            for dep in deps.iter() {
                match color.get(dep.as_str()).copied().unwrap_or(Color::White) {
                    Color::Gray => {
                        let start = stack.iter().position(|n| n == dep).unwrap_or(0);
                        return Some(stack[start..].to_vec());
                    }
                    Color::White => {
                        if let Some(cycle) = visit(dep, adj, color, stack) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }
        }
        stack.pop();
        color.insert(node, Color::Black);
        None
    }

    for task in &plan.tasks {
        if color.get(task.id.as_str()).copied() == Some(Color::White) {
            if let Some(cycle) = visit(&task.id, &adj, &mut color, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::types::TaskSpec;
    use crate::domain::Priority;

    fn spec(id: &str, deps: &[&str]) -> TaskSpec {
        TaskSpec {
            id: id.into(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            priority: Priority::Normal,
            estimated_duration_ms: 1_000,
            provider: "anthropic".into(),
            model: "claude".into(),
            tenant_key: "t".into(),
        }
    }

    #[test]
    fn accepts_a_simple_dag() {
        let plan = TaskPlan { id: "p".into(), tasks: vec![spec("a", &[]), spec("b", &["a"])] };
        assert!(validate(&plan).is_ok());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let plan = TaskPlan { id: "p".into(), tasks: vec![spec("a", &[]), spec("a", &[])] };
        let errs = validate(&plan).unwrap_err();
        assert!(matches!(errs[0], DagValidationError::DuplicateIds(_)));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let plan = TaskPlan { id: "p".into(), tasks: vec![spec("a", &["ghost"])] };
        let errs = validate(&plan).unwrap_err();
        assert!(matches!(errs[0], DagValidationError::UnknownDependency { .. }));
    }

    #[test]
    fn rejects_a_cycle() {
        let plan = TaskPlan { id: "p".into(), tasks: vec![spec("a", &["b"]), spec("b", &["a"])] };
        let errs = validate(&plan).unwrap_err();
        assert!(matches!(errs[0], DagValidationError::Cycle(_)));
    }
}
