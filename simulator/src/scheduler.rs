use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

use dslab_core::{cast, log_debug, log_info, Event, EventHandler, SimulationContext};
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::cluster::{TaskCompleted, VmCluster};
use crate::config::sim_config::SchedulingConfig;
use crate::host::VmId;
use crate::provisioner::Provisioner;
use crate::workflow::{Ensemble, TaskId, TaskState};

/// Self-event marking a provisioning period boundary.
#[derive(Clone, Serialize)]
pub struct ProvisioningCycle {}

/// Priority queue entry. Lower `dax_priority` wins; FIFO between tasks of
/// one workflow via the insertion sequence number.
struct QueuedTask {
    priority: usize,
    seq: u64,
    task: TaskId,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that the max-heap pops the lowest priority value and,
        // on ties, the oldest entry.
        other
            .priority
            .cmp(&self.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dynamic provisioning, dynamic scheduling. Ready tasks go to a single
/// workflow-priority queue and are dispatched to idle VMs picked uniformly
/// at random; once per period the provisioner adjusts the pool.
pub struct DpdsScheduler {
    config: Rc<SchedulingConfig>,
    ensemble: Rc<RefCell<Ensemble>>,
    cluster: Rc<RefCell<VmCluster>>,
    provisioner: Provisioner,

    queue: BinaryHeap<QueuedTask>,
    queued: FxHashSet<TaskId>,
    next_seq: u64,
    idle_pool: Vec<VmId>,

    completed_workflows: usize,
    makespan: f64,

    ctx: SimulationContext,
}

impl DpdsScheduler {
    pub fn new(
        ctx: SimulationContext,
        config: Rc<SchedulingConfig>,
        ensemble: Rc<RefCell<Ensemble>>,
        cluster: Rc<RefCell<VmCluster>>,
        provisioner: Provisioner,
    ) -> Self {
        DpdsScheduler {
            config,
            ensemble,
            cluster,
            provisioner,
            queue: BinaryHeap::new(),
            queued: FxHashSet::default(),
            next_seq: 0,
            idle_pool: Vec::new(),
            completed_workflows: 0,
            makespan: 0.,
            ctx,
        }
    }

    /// Queue the root of every workflow, dispatch what fits on the initial
    /// VMs and arm the provisioning timer.
    pub fn start(&mut self) {
        let roots: Vec<TaskId> = {
            let ensemble = self.ensemble.borrow();
            ensemble.workflows().iter().map(|w| w.root()).collect()
        };
        for root in roots {
            self.ensemble.borrow_mut().set_state(root, TaskState::Schedulable);
            self.push(root);
        }
        self.refresh_idle_pool();
        self.dispatch();
        self.ctx.emit_self(ProvisioningCycle {}, self.config.period);
    }

    /// Last recorded task completion time. Stays meaningful even when the
    /// run drains past the deadline.
    pub fn makespan(&self) -> f64 {
        self.makespan
    }

    fn push(&mut self, task: TaskId) {
        if !self.queued.insert(task) {
            return;
        }
        let priority = self.ensemble.borrow().task(task).dax_priority;
        self.queue.push(QueuedTask {
            priority,
            seq: self.next_seq,
            task,
        });
        self.next_seq += 1;
    }

    fn refresh_idle_pool(&mut self) {
        self.idle_pool = self.cluster.borrow().idle_vms();
    }

    /// Match queued tasks with idle VMs until one side runs out. The VM is
    /// picked uniformly at random.
    fn dispatch(&mut self) {
        if self.ctx.time() >= self.config.deadline {
            return;
        }
        while !self.idle_pool.is_empty() && !self.queue.is_empty() {
            let slot = self.ctx.gen_range(0..self.idle_pool.len());
            let host = self.idle_pool.swap_remove(slot);
            let entry = self.queue.pop().unwrap();
            self.queued.remove(&entry.task);

            let (task_name, workflow_name) = {
                let ensemble = self.ensemble.borrow();
                let task = ensemble.task(entry.task);
                let workflow = task
                    .workflow
                    .map(|w| ensemble.workflow(w).name.clone())
                    .unwrap_or_default();
                (task.name.clone(), workflow)
            };
            let mut cluster = self.cluster.borrow_mut();
            log_info!(
                self.ctx,
                "schedule {} ({}) on {}",
                task_name,
                workflow_name,
                cluster.host(host).name
            );
            cluster.set_busy(host);
            cluster.schedule_task(entry.task, host);
        }
    }

    fn on_task_completed(&mut self, task: TaskId, host: VmId) {
        let workflow = self.ensemble.borrow().task(task).workflow;
        match workflow {
            None => {
                // A VM finished booting. Nothing to queue, but dispatch may
                // now make progress through the freed dependency.
                log_debug!(
                    self.ctx,
                    "{} is done",
                    self.ensemble.borrow().task(task).name
                );
            }
            Some(workflow) => {
                self.makespan = self.ctx.time();
                self.cluster.borrow_mut().set_idle(host);
                self.idle_pool.push(host);

                let (task_name, workflow_name, is_terminal) = {
                    let ensemble = self.ensemble.borrow();
                    (
                        ensemble.task(task).name.clone(),
                        ensemble.workflow(workflow).name.clone(),
                        ensemble.workflow(workflow).end() == task,
                    )
                };
                if self.ctx.time() > self.config.deadline {
                    log_info!(
                        self.ctx,
                        "{} ({}) has completed after the deadline",
                        task_name,
                        workflow_name
                    );
                } else {
                    log_info!(self.ctx, "{} ({}) has completed", task_name, workflow_name);
                }
                if is_terminal {
                    self.ensemble
                        .borrow_mut()
                        .mark_workflow_complete(workflow, self.ctx.time());
                    self.completed_workflows += 1;
                    log_info!(self.ctx, "{}: workflow complete!", workflow_name);
                }

                let children = self.ensemble.borrow().ready_children(task);
                for &child in &children {
                    self.ensemble
                        .borrow_mut()
                        .set_state(child, TaskState::Schedulable);
                }
                for child in children {
                    self.push(child);
                }
            }
        }
        self.dispatch();
    }

    fn on_provisioning_cycle(&mut self) {
        if self.completed_workflows == self.ensemble.borrow().workflows().len() {
            return;
        }
        let now = self.ctx.time();
        if now >= self.config.deadline {
            // In-flight tasks are left to drain; nothing new is started.
            log_info!(self.ctx, "time's up! the deadline was reached at {:.3}", now);
            return;
        }

        let consumed = self.cluster.borrow().budget_consumption();
        log_debug!(self.ctx, "${:.2} have been spent so far", consumed);
        {
            let mut cluster = self.cluster.borrow_mut();
            self.provisioner.provision(&mut cluster, consumed, now, &self.ctx);
        }
        self.refresh_idle_pool();
        self.dispatch();
        self.ctx.emit_self(ProvisioningCycle {}, self.config.period);
    }
}

impl EventHandler for DpdsScheduler {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            TaskCompleted { task_id, host_id } => {
                self.on_task_completed(task_id, host_id);
            }
            ProvisioningCycle {} => {
                self.on_provisioning_cycle();
            }
        });
    }
}
