use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use dslab_compute::multicore::Compute;
use dslab_core::simulation::Simulation;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use sugars::{rc, refcell};

use crate::cluster::VmCluster;
use crate::config::sim_config::SchedulingConfig;
use crate::error::SchedulingError;
use crate::provisioner::Provisioner;
use crate::scheduler::DpdsScheduler;
use crate::workflow::{Ensemble, WorkflowDefinition};

/// Final metrics of a run.
#[derive(Serialize, Clone, Debug)]
pub struct RunReport {
    /// Time of the last task completion.
    pub makespan: f64,
    /// Workflows whose terminal task completed, deadline or not.
    pub completed_workflows: usize,
    pub total_workflows: usize,
    /// Money billed over the whole run, final settlement included.
    pub total_cost: f64,
    /// Sum of `2^-priority` over workflows completed by the deadline.
    pub score: f64,
    pub cost_budget_ratio: f64,
    pub makespan_deadline_ratio: f64,
}

/// Glues the pieces of one scheduling run together: builds the ensemble
/// and the VM pool from their descriptions, wires the scheduler and the
/// cluster through the event bus and drives the simulation to completion.
pub struct EnsembleSchedulingSimulation {
    sim: Simulation,
    config: Rc<SchedulingConfig>,
    ensemble: Rc<RefCell<Ensemble>>,
    cluster: Rc<RefCell<VmCluster>>,
    scheduler: Rc<RefCell<DpdsScheduler>>,
    initial_vm_count: usize,
}

impl EnsembleSchedulingSimulation {
    pub fn new(
        mut sim: Simulation,
        config: SchedulingConfig,
        workflows: Vec<WorkflowDefinition>,
    ) -> Result<Self, SchedulingError> {
        config.validate()?;
        if workflows.is_empty() {
            return Err(SchedulingError::EmptyEnsemble);
        }
        let slots = config.host_slots();
        let initial_vm_count = config.initial_vm_count();
        if initial_vm_count > slots.len() {
            return Err(SchedulingError::PlatformTooSmall {
                required: initial_vm_count,
                available: slots.len(),
            });
        }
        let config = Rc::new(config);

        let mut ensemble = Ensemble::new();
        for def in &workflows {
            ensemble.add_workflow(def);
        }
        let ensemble = rc!(refcell!(ensemble));

        let cluster_ctx = sim.create_context("cluster");
        let mut cluster = VmCluster::new(cluster_ctx, ensemble.clone());
        for slot in slots {
            let compute_name = format!("compute-{}", slot.name);
            let compute_ctx = sim.create_context(&compute_name);
            let compute = rc!(refcell!(Compute::new(
                slot.speed,
                1024,
                u64::MAX,
                compute_ctx
            )));
            sim.add_handler(&compute_name, compute.clone());
            cluster.add_host(slot, compute, config.price, config.boot_delay);
        }
        let cluster = rc!(refcell!(cluster));
        sim.add_handler("cluster", cluster.clone());

        let scheduler_ctx = sim.create_context("scheduler");
        let provisioner = Provisioner::new(config.clone(), initial_vm_count);
        let scheduler = rc!(refcell!(DpdsScheduler::new(
            scheduler_ctx,
            config.clone(),
            ensemble.clone(),
            cluster.clone(),
            provisioner
        )));
        let scheduler_id = sim.add_handler("scheduler", scheduler.clone());
        cluster.borrow_mut().set_scheduler(scheduler_id);

        Ok(EnsembleSchedulingSimulation {
            sim,
            config,
            ensemble,
            cluster,
            scheduler,
            initial_vm_count,
        })
    }

    pub fn ensemble(&self) -> Rc<RefCell<Ensemble>> {
        self.ensemble.clone()
    }

    pub fn time(&self) -> f64 {
        self.sim.time()
    }

    pub fn run(&mut self) -> RunReport {
        {
            let mut rng = StdRng::seed_from_u64(self.config.seed);
            self.ensemble
                .borrow_mut()
                .assign_priorities(self.config.priority_method, &mut rng);
        }
        {
            let ensemble = self.ensemble.borrow();
            println!(
                "Scheduling {} workflows under ${:.2} / {:.0} s constraints:",
                ensemble.workflows().len(),
                self.config.budget,
                self.config.deadline
            );
            for workflow in ensemble.workflows() {
                println!(
                    "  {} ({} tasks, priority {})",
                    workflow.name,
                    workflow.size(),
                    workflow.priority
                );
            }
        }

        println!("{} VMs are started initially", self.initial_vm_count);
        {
            let mut cluster = self.cluster.borrow_mut();
            for vm in 0..self.initial_vm_count {
                cluster.start_vm(vm);
            }
        }
        self.scheduler.borrow_mut().start();

        let t = Instant::now();
        self.sim.step_until_no_events();
        let elapsed = t.elapsed();
        println!(
            "Simulated {:.3} s in {:.2?} ({} events)",
            self.sim.time(),
            elapsed,
            self.sim.event_count()
        );

        // Final settlement: stop everything that still runs and bill the
        // remaining completed hours.
        self.cluster.borrow_mut().terminate_all_active();

        let report = self.build_report();
        println!("Makespan: {:.3} s", report.makespan);
        println!(
            "Success rate: {}/{}",
            report.completed_workflows, report.total_workflows
        );
        println!("Total cost: ${:.2}", report.total_cost);
        println!("Score: {}", report.score);
        println!("Cost/Budget: {:.3}", report.cost_budget_ratio);
        println!("Makespan/Deadline: {:.3}", report.makespan_deadline_ratio);
        report
    }

    fn build_report(&self) -> RunReport {
        let ensemble = self.ensemble.borrow();
        let makespan = self.scheduler.borrow().makespan();
        let total_cost = self.cluster.borrow().total_cost();
        RunReport {
            makespan,
            completed_workflows: ensemble.completed_workflows(),
            total_workflows: ensemble.workflows().len(),
            total_cost,
            score: ensemble.compute_score(self.config.deadline),
            cost_budget_ratio: total_cost / self.config.budget,
            makespan_deadline_ratio: makespan / self.config.deadline,
        }
    }
}
