use dslab_core::simulation::Simulation;

use ensemble_sched::config::sim_config::SchedulingConfig;
use ensemble_sched::workflow::{TaskDefinition, TaskState, WorkflowDefinition};
use ensemble_sched::{EnsembleSchedulingSimulation, RunReport};

fn config(yaml: &str) -> SchedulingConfig {
    serde_yaml::from_str(yaml).unwrap()
}

/// A linear workflow of `len` compute tasks, `flops` each.
fn chain(name: &str, len: usize, flops: f64) -> WorkflowDefinition {
    let tasks = (0..len)
        .map(|i| TaskDefinition {
            name: format!("t{}", i),
            kind: Default::default(),
            flops,
            children: if i + 1 < len {
                vec![format!("t{}", i + 1)]
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

fn run(config: SchedulingConfig, workflows: Vec<WorkflowDefinition>) -> (RunReport, EnsembleSchedulingSimulation) {
    let sim = Simulation::new(config.seed);
    let mut sim = EnsembleSchedulingSimulation::new(sim, config, workflows).unwrap();
    let report = sim.run();
    (report, sim)
}

#[test]
fn completes_a_linear_workflow() {
    let config = config(
        r#"
        priority_method: sorted
        budget: 8
        deadline: 7200
        lower_utilization: 0
        hosts: [{name: vm, speed: 1, count: 4}]
        "#,
    );
    let (report, _) = run(config, vec![chain("wf", 3, 600.)]);

    assert_eq!(report.completed_workflows, 1);
    assert_eq!(report.total_workflows, 1);
    assert_eq!(report.score, 1.);
    assert!((report.makespan - 1800.).abs() < 1e-9);
    // Four VMs for less than an hour each.
    assert!((report.total_cost - 4.).abs() < 1e-9);
    assert!(report.cost_budget_ratio <= 1.);
}

#[test]
fn schedules_an_ensemble_by_size() {
    let config = config(
        r#"
        priority_method: sorted
        budget: 8
        deadline: 7200
        lower_utilization: 0
        hosts: [{name: vm, speed: 1, count: 4}]
        "#,
    );
    let workflows = vec![
        chain("big", 4, 600.),
        chain("small", 2, 600.),
        chain("medium", 3, 600.),
    ];
    let (report, sim) = run(config, workflows);

    // Smaller workflows are more important and weigh more in the score.
    let ensemble = sim.ensemble();
    let priorities: Vec<usize> = ensemble
        .borrow()
        .workflows()
        .iter()
        .map(|w| w.priority)
        .collect();
    assert_eq!(priorities, vec![2, 0, 1]);

    assert_eq!(report.completed_workflows, 3);
    assert_eq!(report.score, 1.75);
}

#[test]
fn boot_delay_defers_the_first_task() {
    let config = config(
        r#"
        budget: 8
        deadline: 7200
        lower_utilization: 0
        boot_delay: 300
        hosts: [{name: vm, speed: 1, count: 4}]
        "#,
    );
    let (report, _) = run(config, vec![chain("wf", 3, 600.)]);

    assert_eq!(report.completed_workflows, 1);
    assert!((report.makespan - 2100.).abs() < 1e-9);
}

#[test]
fn deadline_stops_dispatch_but_lets_tasks_drain() {
    let config = config(
        r#"
        budget: 2
        deadline: 1000
        lower_utilization: 0
        hosts: [{name: vm, speed: 1, count: 2}]
        "#,
    );
    let (report, sim) = run(config, vec![chain("wf", 3, 600.)]);

    // The second task was running when the deadline hit and drains to
    // completion at 1200; the third is never dispatched.
    assert_eq!(report.completed_workflows, 0);
    assert_eq!(report.score, 0.);
    assert!((report.makespan - 1200.).abs() < 1e-9);

    let ensemble = sim.ensemble();
    let end = ensemble.borrow().workflow(0).end();
    assert!(ensemble.borrow().task(end).state < TaskState::Done);
}

#[test]
fn final_settlement_bills_completed_hours() {
    let config = config(
        r#"
        budget: 1
        deadline: 7200
        lower_utilization: 0
        hosts: [{name: vm, speed: 1, count: 1}]
        "#,
    );
    let (report, _) = run(config, vec![chain("wf", 10, 600.)]);

    assert_eq!(report.completed_workflows, 1);
    assert!((report.makespan - 6000.).abs() < 1e-9);
    // One hour charged at activation, a second one settled at the end.
    assert!((report.total_cost - 2.).abs() < 1e-9);
    assert_eq!(report.score, 1.);
}

#[test]
#[should_panic(expected = "resource pool exhausted")]
fn exhausted_resource_pool_panics() {
    let config = config(
        r#"
        budget: 2
        deadline: 7200
        upper_utilization: 50
        lower_utilization: 0
        vmax: 2
        hosts: [{name: vm, speed: 1, count: 1}]
        "#,
    );
    run(config, vec![chain("wf", 2, 600.)]);
}

#[test]
fn rejects_a_platform_smaller_than_the_initial_pool() {
    let config = config(
        r#"
        budget: 8
        deadline: 7200
        hosts: [{name: vm, speed: 1, count: 2}]
        "#,
    );
    let result =
        EnsembleSchedulingSimulation::new(Simulation::new(123), config, vec![chain("wf", 2, 600.)]);
    assert!(matches!(
        result,
        Err(ensemble_sched::SchedulingError::PlatformTooSmall {
            required: 4,
            available: 2
        })
    ));
}
