use std::rc::Rc;

use dslab_core::{log_error, log_info, log_warn, SimulationContext};

use crate::cluster::VmCluster;
use crate::config::sim_config::SchedulingConfig;
use crate::host::VmId;

/// Slack subtracted from the billing cycle window, covers the time it takes
/// to actually deprovision a VM. cloudworkflowsim uses one second.
pub const BILLING_MARGIN: f64 = 1.;

/// Periodic elastic provisioning. Runs once per period from the scheduler:
/// contracts the pool when the remaining budget no longer covers the VMs
/// about to start a new billed hour (or the deadline has passed), otherwise
/// follows the utilization of the active VMs.
pub struct Provisioner {
    config: Rc<SchedulingConfig>,
    initial_vm_count: usize,
}

impl Provisioner {
    pub fn new(config: Rc<SchedulingConfig>, initial_vm_count: usize) -> Self {
        Provisioner {
            config,
            initial_vm_count,
        }
    }

    pub fn provision(
        &self,
        cluster: &mut VmCluster,
        consumed: f64,
        now: f64,
        ctx: &SimulationContext,
    ) {
        let remaining = self.config.budget - consumed;
        let running = cluster.running_vms();
        let ending = cluster.ending_billing_cycle_vms(self.config.period, BILLING_MARGIN);

        if remaining < ending.len() as f64 * self.config.price || now > self.config.deadline {
            let target = contraction_size(running.len(), remaining, self.config.price);
            if target > 0 {
                log_info!(
                    ctx,
                    "${:.2} remain and {} VMs are close to their billing cycle, have to stop {} VMs",
                    remaining,
                    ending.len(),
                    target
                );
                self.stop_vms(cluster, target, &ending, ctx);
            }
        } else {
            let utilization = cluster.utilization();
            if utilization > self.config.upper_utilization {
                let cap = self.config.vmax * self.initial_vm_count as f64;
                if (running.len() as f64) < cap {
                    match cluster.find_inactive_vm() {
                        Some(vm) => {
                            log_info!(
                                ctx,
                                "{:.2}% utilization is above the upper threshold, start a new VM",
                                utilization
                            );
                            cluster.start_vm(vm);
                        }
                        None => {
                            log_error!(ctx, "no inactive VM left in the resource pool");
                            panic!("resource pool exhausted, increase the platform size");
                        }
                    }
                }
            } else if utilization < self.config.lower_utilization {
                let idle = cluster.idle_vms();
                let target = (idle.len() + 1) / 2;
                if target > 0 {
                    log_info!(
                        ctx,
                        "{:.2}% utilization is under the lower threshold, have to stop {} VMs",
                        utilization,
                        target
                    );
                    self.stop_vms(cluster, target, &idle, ctx);
                }
            }
        }
    }

    /// Terminate up to `how_many` VMs from `candidates`, skipping busy ones
    /// so that running tasks are never killed.
    fn stop_vms(
        &self,
        cluster: &mut VmCluster,
        how_many: usize,
        candidates: &[VmId],
        ctx: &SimulationContext,
    ) {
        let mut how_many = how_many;
        if how_many > candidates.len() {
            log_warn!(
                ctx,
                "trying to stop more VMs than there are candidates ({} > {}), stopping {} instead",
                how_many,
                candidates.len(),
                candidates.len()
            );
            how_many = candidates.len();
        }
        let mut stopped = 0;
        for &vm in candidates {
            if stopped == how_many {
                break;
            }
            if !cluster.host(vm).is_idle() {
                continue;
            }
            log_info!(ctx, "terminate {}", cluster.host(vm).name);
            cluster.terminate_vm(vm);
            stopped += 1;
        }
        if stopped < how_many {
            log_warn!(
                ctx,
                "some candidate VMs are busy, stopped only {} of {}",
                stopped,
                how_many
            );
        }
    }
}

/// How many VMs the pool must lose so that the remaining budget still pays
/// for one more hour of every survivor.
fn contraction_size(running: usize, remaining: f64, price: f64) -> usize {
    let affordable = (remaining / price).floor();
    let excess = running as f64 - affordable;
    if excess <= 0. {
        0
    } else {
        excess as usize
    }
}
