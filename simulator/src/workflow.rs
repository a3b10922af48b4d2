use rand::Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::sim_config::PriorityMethod;

pub type TaskId = usize;
pub type WorkflowId = usize;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    #[default]
    Compute,
    /// Data dependency surrogate between two compute tasks. Transfers are
    /// never dispatched on their own; they complete as soon as their
    /// producer does.
    Transfer,
}

/// Task lifecycle. States only ever increase, and are driven by the
/// execution engine (`VmCluster`), not by the scheduler.
#[derive(Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum TaskState {
    NotScheduled,
    Schedulable,
    Scheduled,
    Running,
    Done,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TaskDefinition {
    pub name: String,
    #[serde(default)]
    pub kind: TaskKind,
    /// Execution cost in flops. Ignored for transfers.
    #[serde(default)]
    pub flops: f64,
    #[serde(default)]
    pub children: Vec<String>,
}

/// On-disk workflow description. The first task is the root and the last
/// one is the terminal "end" task, as in the DAX files this format stands
/// in for.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WorkflowDefinition {
    pub name: String,
    pub tasks: Vec<TaskDefinition>,
}

impl WorkflowDefinition {
    pub fn from_file(file_name: &str) -> Self {
        serde_yaml::from_str(
            &std::fs::read_to_string(file_name)
                .unwrap_or_else(|e| panic!("Can't read file {}: {}", file_name, e)),
        )
        .unwrap_or_else(|e| panic!("Can't parse YAML from file {}: {}", file_name, e))
    }
}

pub struct TaskNode {
    pub name: String,
    pub kind: TaskKind,
    pub flops: f64,
    pub state: TaskState,
    /// Back-reference to the owning workflow. `None` marks synthetic tasks
    /// (VM boot) that exist outside any workflow.
    pub workflow: Option<WorkflowId>,
    /// Copied from the owning workflow when priorities are assigned and
    /// immutable afterwards. Lower value = more important workflow.
    pub dax_priority: usize,
    preds: Vec<TaskId>,
    succs: Vec<TaskId>,
}

pub struct Workflow {
    pub name: String,
    pub priority: usize,
    /// Simulated time at which the terminal task completed.
    pub completed_at: Option<f64>,
    tasks: Vec<TaskId>,
    root: TaskId,
    end: TaskId,
}

impl Workflow {
    pub fn root(&self) -> TaskId {
        self.root
    }

    pub fn end(&self) -> TaskId {
        self.end
    }

    /// Total task count, transfers included.
    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    pub fn tasks(&self) -> &[TaskId] {
        &self.tasks
    }
}

/// The full set of workflows submitted for joint scheduling, with all
/// tasks held in one arena so that dependency edges (including the
/// sequencing edges injected by the resource order enforcer) are plain
/// indices.
#[derive(Default)]
pub struct Ensemble {
    workflows: Vec<Workflow>,
    tasks: Vec<TaskNode>,
}

impl Ensemble {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_workflow(&mut self, def: &WorkflowDefinition) -> WorkflowId {
        assert!(
            !def.tasks.is_empty(),
            "workflow {} has no tasks",
            def.name
        );
        let workflow_id = self.workflows.len();
        let base = self.tasks.len();

        let mut by_name = FxHashMap::default();
        for (i, task) in def.tasks.iter().enumerate() {
            by_name.insert(task.name.as_str(), base + i);
            self.tasks.push(TaskNode {
                name: task.name.clone(),
                kind: task.kind,
                flops: task.flops,
                state: TaskState::NotScheduled,
                workflow: Some(workflow_id),
                dax_priority: 0,
                preds: Vec::new(),
                succs: Vec::new(),
            });
        }
        for (i, task) in def.tasks.iter().enumerate() {
            for child in &task.children {
                let child_id = *by_name.get(child.as_str()).unwrap_or_else(|| {
                    panic!("workflow {}: unknown child task {}", def.name, child)
                });
                self.add_dependency(base + i, child_id);
            }
        }

        self.workflows.push(Workflow {
            name: def.name.clone(),
            priority: 0,
            completed_at: None,
            tasks: (base..base + def.tasks.len()).collect(),
            root: base,
            end: base + def.tasks.len() - 1,
        });
        workflow_id
    }

    /// Create a synthetic task outside any workflow (VM boot).
    pub fn add_synthetic_task(&mut self, name: String, flops: f64) -> TaskId {
        let id = self.tasks.len();
        self.tasks.push(TaskNode {
            name,
            kind: TaskKind::Compute,
            flops,
            state: TaskState::NotScheduled,
            workflow: None,
            dax_priority: 0,
            preds: Vec::new(),
            succs: Vec::new(),
        });
        id
    }

    pub fn task(&self, id: TaskId) -> &TaskNode {
        &self.tasks[id]
    }

    pub fn set_state(&mut self, id: TaskId, state: TaskState) {
        debug_assert!(self.tasks[id].state <= state);
        self.tasks[id].state = state;
    }

    pub fn preds(&self, id: TaskId) -> &[TaskId] {
        &self.tasks[id].preds
    }

    pub fn succs(&self, id: TaskId) -> &[TaskId] {
        &self.tasks[id].succs
    }

    pub fn workflow(&self, id: WorkflowId) -> &Workflow {
        &self.workflows[id]
    }

    pub fn workflows(&self) -> &[Workflow] {
        &self.workflows
    }

    pub fn mark_workflow_complete(&mut self, id: WorkflowId, time: f64) {
        self.workflows[id].completed_at = Some(time);
    }

    pub fn completed_workflows(&self) -> usize {
        self.workflows
            .iter()
            .filter(|w| w.completed_at.is_some())
            .count()
    }

    pub fn dependency_exists(&self, from: TaskId, to: TaskId) -> bool {
        self.tasks[from].succs.contains(&to)
    }

    pub fn add_dependency(&mut self, from: TaskId, to: TaskId) {
        self.tasks[from].succs.push(to);
        self.tasks[to].preds.push(from);
    }

    /// A task is ready when every compute predecessor, following transfer
    /// edges through to their producer, has at least been scheduled.
    pub fn is_ready(&self, id: TaskId) -> bool {
        for &pred in &self.tasks[id].preds {
            match self.tasks[pred].kind {
                TaskKind::Transfer => {
                    for &producer in &self.tasks[pred].preds {
                        if self.tasks[producer].state < TaskState::Scheduled {
                            return false;
                        }
                    }
                }
                TaskKind::Compute => {
                    if self.tasks[pred].state < TaskState::Scheduled {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Compute successors of `id` (following transfer edges one hop) that
    /// are ready and not yet scheduled. As two compute tasks may be linked
    /// by more than one transfer, the result is kept duplicate-free.
    pub fn ready_children(&self, id: TaskId) -> Vec<TaskId> {
        let mut children = Vec::new();
        for &succ in &self.tasks[id].succs {
            match self.tasks[succ].kind {
                TaskKind::Transfer => {
                    for &grand_child in &self.tasks[succ].succs {
                        self.collect_ready_child(grand_child, &mut children);
                    }
                }
                TaskKind::Compute => self.collect_ready_child(succ, &mut children),
            }
        }
        children
    }

    fn collect_ready_child(&self, id: TaskId, children: &mut Vec<TaskId>) {
        if children.contains(&id) {
            return;
        }
        let task = &self.tasks[id];
        if task.kind == TaskKind::Compute
            && task.state <= TaskState::Schedulable
            && self.is_ready(id)
        {
            children.push(id);
        }
    }

    /// Assign unique priorities in `[0, N)` to the workflows of the
    /// ensemble and copy them into every task as `dax_priority`.
    pub fn assign_priorities<R: Rng>(&mut self, method: PriorityMethod, rng: &mut R) {
        let n = self.workflows.len();
        let mut ranks: Vec<usize> = (0..n).collect();

        match method {
            PriorityMethod::Random => {
                // Fisher-Yates shuffle.
                for i in 0..n.saturating_sub(1) {
                    let j = rng.gen_range(i..n);
                    ranks.swap(i, j);
                }
            }
            PriorityMethod::Sorted => {
                // Increasing ranks in ascending size order, stable on ties.
                let mut order: Vec<usize> = (0..n).collect();
                order.sort_by_key(|&w| self.workflows[w].size());
                for (rank, &w) in order.iter().enumerate() {
                    ranks[w] = rank;
                }
            }
        }

        for (w, workflow) in self.workflows.iter_mut().enumerate() {
            workflow.priority = ranks[w];
        }
        for task in &mut self.tasks {
            if let Some(w) = task.workflow {
                task.dax_priority = ranks[w];
            }
        }
    }

    /// Completion-weighted score: every workflow whose terminal task
    /// completed by the deadline contributes `2^-priority`.
    pub fn compute_score(&self, deadline: f64) -> f64 {
        self.workflows
            .iter()
            .filter(|w| w.completed_at.map_or(false, |t| t <= deadline))
            .map(|w| 2f64.powi(-(w.priority as i32)))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn chain(name: &str, len: usize) -> WorkflowDefinition {
        let tasks = (0..len)
            .map(|i| TaskDefinition {
                name: if i == len - 1 {
                    "end".to_string()
                } else {
                    format!("t{}", i)
                },
                kind: TaskKind::Compute,
                flops: 100.,
                children: if i + 1 < len {
                    vec![if i + 2 == len {
                        "end".to_string()
                    } else {
                        format!("t{}", i + 1)
                    }]
                } else {
                    vec![]
                },
            })
            .collect();
        WorkflowDefinition {
            name: name.to_string(),
            tasks,
        }
    }

    fn priorities(ensemble: &Ensemble) -> Vec<usize> {
        ensemble.workflows().iter().map(|w| w.priority).collect()
    }

    #[test]
    fn priorities_form_a_permutation() {
        for method in [PriorityMethod::Random, PriorityMethod::Sorted] {
            let mut ensemble = Ensemble::new();
            for i in 0..7 {
                ensemble.add_workflow(&chain(&format!("wf{}", i), 2 + i));
            }
            let mut rng = StdRng::seed_from_u64(42);
            ensemble.assign_priorities(method, &mut rng);

            let mut seen = priorities(&ensemble);
            seen.sort();
            assert_eq!(seen, (0..7).collect::<Vec<_>>());
            for workflow in ensemble.workflows() {
                for &task in workflow.tasks() {
                    assert_eq!(ensemble.task(task).dax_priority, workflow.priority);
                }
            }
        }
    }

    #[test]
    fn random_priorities_are_seed_stable() {
        let mut first = None;
        for _ in 0..2 {
            let mut ensemble = Ensemble::new();
            for i in 0..10 {
                ensemble.add_workflow(&chain(&format!("wf{}", i), 3));
            }
            let mut rng = StdRng::seed_from_u64(7);
            ensemble.assign_priorities(PriorityMethod::Random, &mut rng);
            let ranks = priorities(&ensemble);
            match &first {
                None => first = Some(ranks),
                Some(expected) => assert_eq!(&ranks, expected),
            }
        }
    }

    #[test]
    fn sorted_priorities_follow_size() {
        let mut ensemble = Ensemble::new();
        ensemble.add_workflow(&chain("big", 5));
        ensemble.add_workflow(&chain("small", 2));
        ensemble.add_workflow(&chain("medium", 3));
        let mut rng = StdRng::seed_from_u64(0);
        ensemble.assign_priorities(PriorityMethod::Sorted, &mut rng);

        assert_eq!(priorities(&ensemble), vec![2, 0, 1]);
    }

    #[test]
    fn score_weights_by_priority() {
        let mut ensemble = Ensemble::new();
        for i in 0..3 {
            ensemble.add_workflow(&chain(&format!("wf{}", i), 2 + i));
        }
        let mut rng = StdRng::seed_from_u64(0);
        ensemble.assign_priorities(PriorityMethod::Sorted, &mut rng);
        assert_eq!(priorities(&ensemble), vec![0, 1, 2]);

        // Workflows with priorities 0 and 2 complete, priority 1 does not.
        ensemble.mark_workflow_complete(0, 500.);
        ensemble.mark_workflow_complete(2, 900.);
        assert_eq!(ensemble.compute_score(1000.), 1.25);
    }

    #[test]
    fn score_ignores_completions_past_the_deadline() {
        let mut ensemble = Ensemble::new();
        ensemble.add_workflow(&chain("wf", 2));
        ensemble.mark_workflow_complete(0, 1500.);
        assert_eq!(ensemble.compute_score(1000.), 0.);
        assert_eq!(ensemble.completed_workflows(), 1);
    }

    #[test]
    fn ready_children_follow_transfers_without_duplicates() {
        // a -> (x1, x2) -> b: two transfers between the same pair of
        // compute tasks must yield b once.
        let def = WorkflowDefinition {
            name: "diamond".to_string(),
            tasks: vec![
                TaskDefinition {
                    name: "a".to_string(),
                    kind: TaskKind::Compute,
                    flops: 10.,
                    children: vec!["x1".to_string(), "x2".to_string()],
                },
                TaskDefinition {
                    name: "x1".to_string(),
                    kind: TaskKind::Transfer,
                    flops: 0.,
                    children: vec!["end".to_string()],
                },
                TaskDefinition {
                    name: "x2".to_string(),
                    kind: TaskKind::Transfer,
                    flops: 0.,
                    children: vec!["end".to_string()],
                },
                TaskDefinition {
                    name: "end".to_string(),
                    kind: TaskKind::Compute,
                    flops: 10.,
                    children: vec![],
                },
            ],
        };
        let mut ensemble = Ensemble::new();
        let wf = ensemble.add_workflow(&def);
        let root = ensemble.workflow(wf).root();
        let end = ensemble.workflow(wf).end();

        // Producer not scheduled yet: the child is not ready.
        assert!(!ensemble.is_ready(end));
        assert!(ensemble.ready_children(root).is_empty());

        ensemble.set_state(root, TaskState::Scheduled);
        ensemble.set_state(root, TaskState::Done);
        assert_eq!(ensemble.ready_children(root), vec![end]);

        // An already scheduled child is not reported again.
        ensemble.set_state(end, TaskState::Scheduled);
        assert!(ensemble.ready_children(root).is_empty());
    }

    #[test]
    fn ready_requires_all_predecessors() {
        let def = WorkflowDefinition {
            name: "join".to_string(),
            tasks: vec![
                TaskDefinition {
                    name: "a".to_string(),
                    kind: TaskKind::Compute,
                    flops: 10.,
                    children: vec!["end".to_string()],
                },
                TaskDefinition {
                    name: "b".to_string(),
                    kind: TaskKind::Compute,
                    flops: 10.,
                    children: vec!["end".to_string()],
                },
                TaskDefinition {
                    name: "end".to_string(),
                    kind: TaskKind::Compute,
                    flops: 10.,
                    children: vec![],
                },
            ],
        };
        let mut ensemble = Ensemble::new();
        let wf = ensemble.add_workflow(&def);
        let tasks: Vec<TaskId> = ensemble.workflow(wf).tasks().to_vec();

        ensemble.set_state(tasks[0], TaskState::Done);
        // b is still not scheduled, so end is not ready and must not be
        // reported among a's ready children.
        assert!(ensemble.ready_children(tasks[0]).is_empty());

        ensemble.set_state(tasks[1], TaskState::Scheduled);
        assert_eq!(ensemble.ready_children(tasks[0]), vec![tasks[2]]);
    }
}
