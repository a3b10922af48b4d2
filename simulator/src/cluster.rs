use std::cell::RefCell;
use std::rc::Rc;

use dslab_compute::multicore::{CompFinished, CompStarted, Compute, CoresDependency};
use dslab_core::{cast, log_debug, Event, EventHandler, Id, SimulationContext};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::config::sim_config::HostConfig;
use crate::host::{VmHost, VmId};
use crate::workflow::{Ensemble, TaskId, TaskKind, TaskState};

/// Reported to the scheduler whenever a compute or boot task finishes.
/// Transfers are zero-cost surrogates and complete silently.
#[derive(Clone, Serialize)]
pub struct TaskCompleted {
    pub task_id: usize,
    pub host_id: usize,
}

/// The VM pool together with its execution engine bridge. Each host owns a
/// compute model instance; a task assigned to a host starts executing once
/// every one of its dependency edges (workflow, transfer and injected
/// sequencing edges alike) is satisfied. The compute model would happily
/// run several tasks of one host in parallel, which is exactly what the
/// sequencing edges prevent.
pub struct VmCluster {
    hosts: Vec<VmHost>,
    computes: Vec<Rc<RefCell<Compute>>>,

    ensemble: Rc<RefCell<Ensemble>>,

    assignments: FxHashMap<TaskId, VmId>,
    comp_to_task: FxHashMap<u64, TaskId>,
    running_comps: FxHashMap<TaskId, u64>,

    scheduler_id: Id,
    ctx: SimulationContext,
}

impl VmCluster {
    pub fn new(ctx: SimulationContext, ensemble: Rc<RefCell<Ensemble>>) -> Self {
        VmCluster {
            hosts: Vec::new(),
            computes: Vec::new(),
            ensemble,
            assignments: FxHashMap::default(),
            comp_to_task: FxHashMap::default(),
            running_comps: FxHashMap::default(),
            scheduler_id: u32::MAX, // must be set later
            ctx,
        }
    }

    pub fn set_scheduler(&mut self, scheduler_id: Id) {
        self.scheduler_id = scheduler_id;
    }

    pub fn add_host(
        &mut self,
        config: HostConfig,
        compute: Rc<RefCell<Compute>>,
        price: f64,
        boot_delay: f64,
    ) -> VmId {
        self.hosts
            .push(VmHost::new(config.name, config.speed, price, boot_delay));
        self.computes.push(compute);
        self.hosts.len() - 1
    }

    pub fn host(&self, id: VmId) -> &VmHost {
        &self.hosts[id]
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn set_idle(&mut self, id: VmId) {
        self.hosts[id].set_idle();
    }

    pub fn set_busy(&mut self, id: VmId) {
        self.hosts[id].set_busy();
    }

    /// Activate a VM: billing starts immediately and, when a boot delay is
    /// modeled, a synthetic boot task is scheduled on the host so that any
    /// compute task dispatched to it queues behind the boot.
    pub fn start_vm(&mut self, id: VmId) {
        let now = self.ctx.time();
        self.hosts[id].start(now);
        log_debug!(
            self.ctx,
            "VM started on {}: total cost is now ${:.2} for this host",
            self.hosts[id].name,
            self.hosts[id].accumulated_cost
        );

        if self.hosts[id].boot_delay > 0. {
            let boot = {
                let mut ensemble = self.ensemble.borrow_mut();
                let boot = ensemble.add_synthetic_task(
                    format!("Booting {}", self.hosts[id].name),
                    self.hosts[id].boot_delay * self.hosts[id].speed,
                );
                ensemble.set_state(boot, TaskState::Scheduled);
                boot
            };
            self.hosts[id].booting = Some(boot);
            self.assignments.insert(boot, id);
            self.handle_resource_dependency(id, boot);
            self.try_start(boot);
        }
    }

    /// Deactivate a VM and bill the completed hours. A still-pending boot
    /// task is discarded: its completion event will be ignored.
    pub fn terminate_vm(&mut self, id: VmId) {
        if let Some(boot) = self.hosts[id].booting.take() {
            if let Some(comp) = self.running_comps.remove(&boot) {
                self.comp_to_task.remove(&comp);
            }
            self.assignments.remove(&boot);
            log_debug!(
                self.ctx,
                "discarding pending boot task of {}",
                self.hosts[id].name
            );
        }
        self.hosts[id].terminate(self.ctx.time());
        log_debug!(
            self.ctx,
            "VM stopped on {}: total cost is now ${:.2} for this host",
            self.hosts[id].name,
            self.hosts[id].accumulated_cost
        );
    }

    pub fn terminate_all_active(&mut self) {
        for id in 0..self.hosts.len() {
            if self.hosts[id].is_on() {
                self.terminate_vm(id);
            }
        }
    }

    /// Assign a task to a host. The task becomes `Scheduled` right away;
    /// execution starts once all its predecessors are done.
    pub fn schedule_task(&mut self, task: TaskId, host: VmId) {
        self.assignments.insert(task, host);
        self.ensemble.borrow_mut().set_state(task, TaskState::Scheduled);
        self.handle_resource_dependency(host, task);
        self.try_start(task);
    }

    /// The compute model runs two independent tasks of one host in
    /// parallel unless an explicit edge ties them. Enforce the sequential
    /// execution the scheduler assumed by adding a sequencing edge from the
    /// host's previously scheduled task, when it is still in the system and
    /// not already a predecessor.
    fn handle_resource_dependency(&mut self, host: VmId, task: TaskId) {
        if let Some(source) = self.hosts[host].last_scheduled {
            let mut ensemble = self.ensemble.borrow_mut();
            if ensemble.task(source).state != TaskState::Done
                && !ensemble.dependency_exists(source, task)
            {
                ensemble.add_dependency(source, task);
            }
        }
        self.hosts[host].last_scheduled = Some(task);
    }

    fn try_start(&mut self, task: TaskId) {
        let flops = {
            let ensemble = self.ensemble.borrow();
            if ensemble.task(task).state != TaskState::Scheduled {
                return;
            }
            let blocked = ensemble
                .preds(task)
                .iter()
                .any(|&p| ensemble.task(p).state != TaskState::Done);
            if blocked {
                return;
            }
            ensemble.task(task).flops
        };
        let host = self.assignments[&task];
        let comp_id = self.computes[host].borrow_mut().run(
            flops,
            0,
            1,
            1,
            CoresDependency::Linear,
            self.ctx.id(),
        );
        self.comp_to_task.insert(comp_id, task);
        self.running_comps.insert(task, comp_id);
    }

    fn on_comp_started(&mut self, comp_id: u64) {
        if let Some(&task) = self.comp_to_task.get(&comp_id) {
            self.ensemble.borrow_mut().set_state(task, TaskState::Running);
        }
    }

    fn on_comp_finished(&mut self, comp_id: u64) {
        let task = match self.comp_to_task.remove(&comp_id) {
            Some(task) => task,
            None => {
                // Boot task of a VM that has been terminated meanwhile.
                log_debug!(self.ctx, "ignoring stale completion {}", comp_id);
                return;
            }
        };
        self.running_comps.remove(&task);
        let host = self.assignments[&task];

        let dependents = {
            let mut ensemble = self.ensemble.borrow_mut();
            ensemble.set_state(task, TaskState::Done);

            // Output transfers complete instantly once their producer is
            // done; what remains to unblock are the compute successors,
            // either direct or one transfer hop away.
            let mut dependents = Vec::new();
            for succ in ensemble.succs(task).to_vec() {
                if ensemble.task(succ).kind == TaskKind::Transfer {
                    let pending = ensemble
                        .preds(succ)
                        .iter()
                        .any(|&p| ensemble.task(p).state != TaskState::Done);
                    if !pending {
                        ensemble.set_state(succ, TaskState::Done);
                        dependents.extend(ensemble.succs(succ).iter().copied());
                    }
                } else {
                    dependents.push(succ);
                }
            }
            dependents
        };

        if self.hosts[host].booting == Some(task) {
            self.hosts[host].booting = None;
        }

        for dependent in dependents {
            if self.assignments.contains_key(&dependent) {
                self.try_start(dependent);
            }
        }

        self.ctx.emit_now(
            TaskCompleted {
                task_id: task,
                host_id: host,
            },
            self.scheduler_id,
        );
    }

    pub fn idle_vms(&self) -> Vec<VmId> {
        (0..self.hosts.len())
            .filter(|&id| self.hosts[id].is_idle())
            .collect()
    }

    pub fn running_vms(&self) -> Vec<VmId> {
        (0..self.hosts.len())
            .filter(|&id| self.hosts[id].is_on())
            .collect()
    }

    /// VMs that would enter a new billed hour before the next provisioning
    /// check.
    pub fn ending_billing_cycle_vms(&self, period: f64, margin: f64) -> Vec<VmId> {
        let now = self.ctx.time();
        (0..self.hosts.len())
            .filter(|&id| self.hosts[id].nearing_billing_cycle(now, period, margin))
            .collect()
    }

    /// First powered-off slot, if the resource pool is not exhausted.
    pub fn find_inactive_vm(&self) -> Option<VmId> {
        (0..self.hosts.len()).find(|&id| !self.hosts[id].is_on())
    }

    /// Busy share of the active VMs, in percent; 0 when nothing is active.
    pub fn utilization(&self) -> f64 {
        let active = self.hosts.iter().filter(|h| h.is_on()).count();
        if active == 0 {
            return 0.;
        }
        let busy = self.hosts.iter().filter(|h| h.is_busy()).count();
        100. * busy as f64 / active as f64
    }

    /// Money spent so far: everything billed, plus an estimate of the
    /// completed hours active VMs have not been billed for yet.
    pub fn budget_consumption(&self) -> f64 {
        let now = self.ctx.time();
        self.hosts
            .iter()
            .map(|h| {
                h.accumulated_cost
                    + if h.is_on() {
                        h.unbilled_hours(now) * h.price
                    } else {
                        0.
                    }
            })
            .sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.hosts.iter().map(|h| h.accumulated_cost).sum()
    }
}

impl EventHandler for VmCluster {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            CompStarted { id, .. } => {
                self.on_comp_started(id);
            }
            CompFinished { id } => {
                self.on_comp_finished(id);
            }
        });
    }
}
