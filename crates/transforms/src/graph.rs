//! Dependency-graph helpers shared by the analysis and planning transforms.

use std::collections::{HashMap, HashSet, VecDeque};

use pipeline_core::{PipelineError, Task};

/// Levels of a task dependency graph: each level is a group of task ids whose
/// dependencies are all satisfied by earlier levels, so every task within a
/// level can run in parallel. Within a level, ids are sorted by ascending
/// `priority`, then by their original position in `tasks` (stable).
pub struct Levels {
    pub ordered: Vec<String>,
    pub groups: Vec<Vec<String>>,
}

/// Validates ids are unique and every dependency references a known id,
/// then computes dependency levels via Kahn's algorithm. A cycle or a
/// dangling dependency is a fatal, non-retryable error.
pub fn topological_levels(tasks: &[Task]) -> Result<Levels, PipelineError> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    for (i, t) in tasks.iter().enumerate() {
        if position.insert(t.id.as_str(), i).is_some() {
            return Err(PipelineError::Permanent(format!(
                "duplicate task id '{}'",
                t.id
            )));
        }
    }

    let mut in_degree: HashMap<&str, usize> = tasks.iter().map(|t| (t.id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> =
        tasks.iter().map(|t| (t.id.as_str(), Vec::new())).collect();

    for t in tasks {
        for dep in &t.dependencies {
            if !position.contains_key(dep.as_str()) {
                return Err(PipelineError::Permanent(format!(
                    "task '{}' depends on unknown task '{}'",
                    t.id, dep
                )));
            }
            dependents.get_mut(dep.as_str()).unwrap().push(t.id.as_str());
            *in_degree.get_mut(t.id.as_str()).unwrap() += 1;
        }
    }

    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut ready: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    sort_level(&mut ready, &position, &by_id);

    let mut ordered = Vec::with_capacity(tasks.len());
    let mut groups = Vec::new();
    let mut remaining = in_degree.clone();

    while !ready.is_empty() {
        let level: Vec<&str> = ready.drain(..).collect();
        let mut next_ready: HashSet<&str> = HashSet::new();

        for &id in &level {
            ordered.push(id.to_string());
            for &dep in &dependents[id] {
                let deg = remaining.get_mut(dep).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    next_ready.insert(dep);
                }
            }
        }

        groups.push(level.iter().map(|s| s.to_string()).collect());
        let mut next: VecDeque<&str> = next_ready.into_iter().collect();
        sort_level(&mut next, &position, &by_id);
        ready = next;
    }

    if ordered.len() != tasks.len() {
        return Err(PipelineError::Permanent(
            "cycle detected in task dependencies".into(),
        ));
    }

    Ok(Levels { ordered, groups })
}

fn sort_level<'a>(
    level: &mut VecDeque<&'a str>,
    position: &HashMap<&str, usize>,
    by_id: &HashMap<&str, &Task>,
) {
    let mut v: Vec<&str> = level.drain(..).collect();
    v.sort_by_key(|id| (by_id[id].priority, position[id]));
    level.extend(v);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::TaskStatus;

    fn task(id: &str, deps: &[&str], priority: i32) -> Task {
        Task {
            id: id.to_string(),
            title: id.to_string(),
            description: id.to_string(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            priority,
            status: TaskStatus::Pending,
        }
    }

    #[test]
    fn independent_tasks_form_a_single_group() {
        let tasks = vec![task("a", &[], 3), task("b", &[], 3)];
        let levels = topological_levels(&tasks).unwrap();
        assert_eq!(levels.groups.len(), 1);
        assert_eq!(levels.groups[0].len(), 2);
    }

    #[test]
    fn chained_dependencies_yield_one_per_level() {
        let tasks = vec![task("a", &[], 3), task("b", &["a"], 3), task("c", &["b"], 3)];
        let levels = topological_levels(&tasks).unwrap();
        assert_eq!(levels.ordered, vec!["a", "b", "c"]);
        assert_eq!(levels.groups.len(), 3);
    }

    #[test]
    fn ties_broken_by_priority_then_insertion_order() {
        let tasks = vec![task("a", &[], 5), task("b", &[], 1), task("c", &[], 1)];
        let levels = topological_levels(&tasks).unwrap();
        assert_eq!(levels.ordered, vec!["b", "c", "a"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let tasks = vec![task("a", &["b"], 3), task("b", &["a"], 3)];
        assert!(topological_levels(&tasks).is_err());
    }

    #[test]
    fn dangling_dependency_is_rejected() {
        let tasks = vec![task("a", &["ghost"], 3)];
        assert!(topological_levels(&tasks).is_err());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let tasks = vec![task("a", &[], 3), task("a", &[], 3)];
        assert!(topological_levels(&tasks).is_err());
    }
}
