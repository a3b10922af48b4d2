use serde::Serialize;

use crate::workflow::TaskId;

pub type VmId = usize;

#[derive(Serialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum VmState {
    Off,
    Idle,
    Busy,
}

/// One VM slot of the platform. Billing is hourly: the first (possibly
/// partial) hour is charged on activation, additional completed hours on
/// termination.
pub struct VmHost {
    pub name: String,
    /// Compute speed in flops per second.
    pub speed: f64,
    pub state: VmState,
    /// Time of the last activation, 0 while off.
    pub start_time: f64,
    /// Earliest time the VM can execute a task, accounts for boot delay.
    pub available_at: f64,
    /// VM hourly price.
    pub price: f64,
    /// Time before a started VM actually becomes available.
    pub boot_delay: f64,
    pub accumulated_cost: f64,
    /// Last task scheduled on this host, for resource-order enforcement.
    /// A plain index: it must never keep a task alive.
    pub last_scheduled: Option<TaskId>,
    /// Synthetic boot task, present only while the provisioning delay is
    /// being modeled.
    pub booting: Option<TaskId>,
}

impl VmHost {
    pub fn new(name: String, speed: f64, price: f64, boot_delay: f64) -> Self {
        VmHost {
            name,
            speed,
            state: VmState::Off,
            start_time: 0.,
            available_at: 0.,
            price,
            boot_delay,
            accumulated_cost: 0.,
            last_scheduled: None,
            booting: None,
        }
    }

    pub fn is_on(&self) -> bool {
        self.state != VmState::Off
    }

    pub fn is_idle(&self) -> bool {
        self.state == VmState::Idle
    }

    pub fn is_busy(&self) -> bool {
        self.state == VmState::Busy
    }

    /// Activate the VM: idle, start time reset, first hour charged.
    pub fn start(&mut self, now: f64) {
        self.state = VmState::Idle;
        self.start_time = now;
        self.available_at = now + self.boot_delay;
        self.accumulated_cost += self.price;
    }

    /// Deactivate the VM and bill the additional completed hours since the
    /// last activation; the partial first hour was charged by `start`.
    pub fn terminate(&mut self, now: f64) {
        let elapsed = now - self.start_time;
        self.accumulated_cost += (elapsed / 3600.).floor() * self.price;
        self.state = VmState::Off;
        self.start_time = 0.;
        self.available_at = 0.;
        self.last_scheduled = None;
        self.booting = None;
    }

    pub fn set_idle(&mut self) {
        self.state = VmState::Idle;
    }

    pub fn set_busy(&mut self) {
        self.state = VmState::Busy;
    }

    /// Whether the VM would enter a new billed hour before the next
    /// provisioning check. The margin covers the deprovisioning delay;
    /// cloudworkflowsim uses one second.
    pub fn nearing_billing_cycle(&self, now: f64, period: f64, margin: f64) -> bool {
        self.is_on() && ((now - self.start_time) as i64 % 3600) as f64 > 3600. - period - margin
    }

    /// Completed hours since the last activation that have not been billed
    /// yet, used to estimate consumption of still-running VMs.
    pub fn unbilled_hours(&self, now: f64) -> f64 {
        ((now - self.start_time) / 3600.).floor()
    }
}
