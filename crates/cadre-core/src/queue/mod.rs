//! Task Queue: an in-memory DAG scheduler over a plan's tasks.
//!
//! Validates the dependency graph is acyclic at construction time (Kahn's
//! algorithm), then tracks completion state and yields batches of tasks
//! that are both ready (all dependencies completed) and safe to run in
//! parallel (no overlapping file sets), per §4.4.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::model::{Task, TaskId};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task graph has a cycle involving: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("duplicate task id: {0}")]
    DuplicateTaskId(TaskId),

    #[error("task queue must contain at least one task")]
    Empty,
}

/// DAG-backed scheduler over a fixed set of tasks.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
    completed: BTreeSet<TaskId>,
    failed: BTreeSet<TaskId>,
    blocked: BTreeSet<TaskId>,
    in_flight: BTreeSet<TaskId>,
}

impl TaskQueue {
    /// Build a queue from a task list, validating references and acyclicity.
    pub fn new(tasks: Vec<Task>) -> Result<Self, QueueError> {
        if tasks.is_empty() {
            return Err(QueueError::Empty);
        }

        let mut map = HashMap::new();
        let mut insertion_order = Vec::with_capacity(tasks.len());
        for task in tasks {
            if map.contains_key(&task.id) {
                return Err(QueueError::DuplicateTaskId(task.id));
            }
            insertion_order.push(task.id.clone());
            map.insert(task.id.clone(), task);
        }

        for task in map.values() {
            for dep in &task.dependencies {
                if !map.contains_key(dep) {
                    return Err(QueueError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let order = topological_sort(&map, &insertion_order)?;

        Ok(Self {
            tasks: map,
            order,
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            blocked: BTreeSet::new(),
            in_flight: BTreeSet::new(),
        })
    }

    /// Rebuild tracking state from a resumed checkpoint, without re-running
    /// the cycle check (the plan itself did not change).
    pub fn restore_state(
        &mut self,
        completed: BTreeSet<TaskId>,
        failed: BTreeSet<TaskId>,
        blocked: BTreeSet<TaskId>,
    ) {
        self.completed = completed;
        self.failed = failed;
        self.blocked = blocked;
        self.in_flight.clear();
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Every task in the queue, in topological order.
    pub fn tasks(&self) -> Vec<&Task> {
        self.order.iter().map(|id| &self.tasks[id]).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.order
            .iter()
            .all(|id| self.completed.contains(id) || self.blocked.contains(id))
    }

    pub fn has_unrecoverable_failure(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Tasks that are pending, have every dependency completed, and are not
    /// already in flight, failed, or blocked.
    fn ready_candidates(&self) -> Vec<&Task> {
        self.order
            .iter()
            .filter(|id| {
                !self.completed.contains(*id)
                    && !self.failed.contains(*id)
                    && !self.blocked.contains(*id)
                    && !self.in_flight.contains(*id)
            })
            .map(|id| &self.tasks[id])
            .filter(|task| {
                task.dependencies
                    .iter()
                    .all(|dep| self.completed.contains(dep))
            })
            .collect()
    }

    /// Select the next batch of ready tasks that can run in parallel: greedy
    /// selection in plan order, skipping any candidate whose file set
    /// overlaps a file already claimed by this batch.
    pub fn next_batch(&self, max_size: usize) -> Vec<TaskId> {
        let mut batch = Vec::new();
        let mut claimed: HashSet<&std::path::Path> = HashSet::new();

        for task in self.ready_candidates() {
            if batch.len() >= max_size {
                break;
            }
            let files: Vec<&std::path::Path> = task.files.iter().map(|p| p.as_path()).collect();
            if files.iter().any(|f| claimed.contains(f)) {
                continue;
            }
            claimed.extend(files);
            batch.push(task.id.clone());
        }

        batch
    }

    pub fn mark_in_flight(&mut self, id: &str) {
        self.in_flight.insert(id.to_string());
    }

    pub fn mark_completed(&mut self, id: &str) {
        self.in_flight.remove(id);
        self.completed.insert(id.to_string());
    }

    pub fn mark_failed(&mut self, id: &str) {
        self.in_flight.remove(id);
        self.failed.insert(id.to_string());
        self.block_downstream(id);
    }

    /// Mark every task transitively depending on `id` as blocked, since it
    /// can no longer become ready.
    fn block_downstream(&mut self, id: &str) {
        let mut frontier: VecDeque<String> = VecDeque::from([id.to_string()]);
        let mut newly_blocked = Vec::new();

        while let Some(current) = frontier.pop_front() {
            for task in self.tasks.values() {
                if task.dependencies.contains(&current)
                    && !self.blocked.contains(&task.id)
                    && !self.completed.contains(&task.id)
                {
                    newly_blocked.push(task.id.clone());
                    frontier.push_back(task.id.clone());
                }
            }
        }

        for id in newly_blocked {
            self.blocked.insert(id);
        }
    }

    pub fn completed(&self) -> &BTreeSet<TaskId> {
        &self.completed
    }

    pub fn failed(&self) -> &BTreeSet<TaskId> {
        &self.failed
    }

    pub fn blocked(&self) -> &BTreeSet<TaskId> {
        &self.blocked
    }
}

/// Topologically sort the task ids via Kahn's algorithm, per §4.4
/// ("on construction, topologically sort; reject cycles by throwing").
/// The ready frontier is always drained in task-id order so that the
/// resulting order -- and therefore batch selection, which iterates it
/// directly -- is deterministic regardless of input order.
fn topological_sort(
    tasks: &HashMap<TaskId, Task>,
    insertion_order: &[TaskId],
) -> Result<Vec<TaskId>, QueueError> {
    let mut in_degree: HashMap<&str, usize> =
        insertion_order.iter().map(|id| (id.as_str(), 0usize)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> =
        insertion_order.iter().map(|id| (id.as_str(), Vec::new())).collect();

    for id in insertion_order {
        for dep in &tasks[id].dependencies {
            *in_degree.get_mut(id.as_str()).unwrap() += 1;
            dependents.get_mut(dep.as_str()).unwrap().push(id.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut sorted = Vec::with_capacity(insertion_order.len());
    while let Some(&next) = ready.iter().next() {
        ready.remove(next);
        sorted.push(next.to_string());
        for &dependent in &dependents[next] {
            let deg = in_degree.get_mut(dependent).unwrap();
            *deg -= 1;
            if *deg == 0 {
                ready.insert(dependent);
            }
        }
    }

    if sorted.len() != insertion_order.len() {
        let remaining: BTreeSet<String> = in_degree
            .iter()
            .filter(|(_, deg)| **deg > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(QueueError::Cycle(remaining.into_iter().collect()));
    }

    Ok(sorted)
}
