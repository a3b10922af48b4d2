use std::fs::File;
use std::io::Write;

use anyhow::Context;
use clap::Parser;
use env_logger::Builder;

use dslab_core::simulation::Simulation;
use ensemble_sched::config::sim_config::SchedulingConfig;
use ensemble_sched::workflow::WorkflowDefinition;
use ensemble_sched::EnsembleSchedulingSimulation;

#[derive(Parser)]
#[command(about = "Simulates scheduling of a workflow ensemble onto elastically provisioned VMs")]
struct Args {
    /// Platform and scheduling parameters (YAML).
    #[arg(long)]
    config: String,

    /// Workflow description (YAML); may be given several times.
    #[arg(long = "workflow", required = true)]
    workflows: Vec<String>,

    /// Scheduling algorithm, overrides the config.
    #[arg(long)]
    algorithm: Option<String>,

    /// Priority assignment method, overrides the config.
    #[arg(long)]
    priority: Option<String>,

    /// Total budget, overrides the config.
    #[arg(long)]
    budget: Option<f64>,

    /// Deadline in seconds, overrides the config.
    #[arg(long)]
    deadline: Option<f64>,

    /// VM hourly price, overrides the config.
    #[arg(long)]
    price: Option<f64>,

    /// Provisioning period in seconds, overrides the config.
    #[arg(long)]
    period: Option<f64>,

    /// Upper utilization threshold in percent, overrides the config.
    #[arg(long)]
    upper_utilization: Option<f64>,

    /// Lower utilization threshold in percent, overrides the config.
    #[arg(long)]
    lower_utilization: Option<f64>,

    /// Autoscaling cap relative to the initial VM count, overrides the config.
    #[arg(long)]
    vmax: Option<f64>,

    /// VM boot delay in seconds, overrides the config.
    #[arg(long)]
    boot_delay: Option<f64>,

    /// Seed, overrides the config.
    #[arg(long)]
    seed: Option<u64>,

    /// Suppress all log output.
    #[arg(long)]
    silent: bool,

    /// Write the final report to this path as JSON.
    #[arg(long)]
    dump: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut builder = Builder::from_default_env();
    builder.format(|buf, record| writeln!(buf, "{}", record.args()));
    if args.silent {
        builder.filter_level(log::LevelFilter::Off);
    }
    builder.init();

    let mut config = SchedulingConfig::from_file(&args.config);
    if let Some(algorithm) = &args.algorithm {
        config.algorithm = algorithm.parse()?;
    }
    if let Some(priority) = &args.priority {
        config.priority_method = priority.parse()?;
    }
    if let Some(budget) = args.budget {
        config.budget = budget;
    }
    if let Some(deadline) = args.deadline {
        config.deadline = deadline;
    }
    if let Some(price) = args.price {
        config.price = price;
    }
    if let Some(period) = args.period {
        config.period = period;
    }
    if let Some(upper) = args.upper_utilization {
        config.upper_utilization = upper;
    }
    if let Some(lower) = args.lower_utilization {
        config.lower_utilization = lower;
    }
    if let Some(vmax) = args.vmax {
        config.vmax = vmax;
    }
    if let Some(boot_delay) = args.boot_delay {
        config.boot_delay = boot_delay;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let workflows: Vec<WorkflowDefinition> = args
        .workflows
        .iter()
        .map(|file| WorkflowDefinition::from_file(file))
        .collect();

    let sim = Simulation::new(config.seed);
    let mut sim = EnsembleSchedulingSimulation::new(sim, config, workflows)
        .context("cannot set up the simulation")?;
    let report = sim.run();

    if let Some(path) = &args.dump {
        let file = File::create(path).with_context(|| format!("cannot create {}", path))?;
        serde_json::to_writer_pretty(file, &report)?;
    }
    Ok(())
}
