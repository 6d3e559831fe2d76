//! Kernel → dispatch catalog
//!
//! Lookups are linear scans; registrations follow kernel launches, not
//! wavefronts, so the lists stay short.

use tracing::{debug, warn};
use wavepoint_common::WaveDim3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub work_group_size: WaveDim3,
    pub grid_size: WaveDim3,
    /// Launches seen with exactly this geometry
    pub count: u32,
}

impl Dispatch {
    /// Work-groups per axis, rounded up. Zero or negative sizes count as one.
    pub fn work_group_count(&self) -> WaveDim3 {
        let axis = |grid: i32, group: i32| {
            let grid = grid.max(1);
            let group = group.max(1);
            if grid < group {
                warn!(
                    target: "wavepoint_core::kernel",
                    grid, group, "Grid is smaller than the work-group"
                );
            }
            // both are at least 1, so the quotient fits back into i32
            (grid as u32).div_ceil(group as u32) as i32
        };
        WaveDim3::new(
            axis(self.grid_size.x, self.work_group_size.x),
            axis(self.grid_size.y, self.work_group_size.y),
            axis(self.grid_size.z, self.work_group_size.z),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kernel {
    pub name: String,
    pub dispatches: Vec<Dispatch>,
}

impl Kernel {
    pub fn launch_count(&self) -> u64 {
        self.dispatches.iter().map(|d| u64::from(d.count)).sum()
    }
}

#[derive(Debug, Default)]
pub struct KernelCatalog {
    kernels: Vec<Kernel>,
    /// (kernel index, dispatch index) of the most recently touched dispatch
    active: Option<(usize, usize)>,
}

impl KernelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one launch and make its dispatch the active one
    pub fn register_dispatch(
        &mut self,
        kernel_name: &str,
        work_group_size: WaveDim3,
        grid_size: WaveDim3,
    ) -> &Dispatch {
        let k = match self.kernels.iter().position(|k| k.name == kernel_name) {
            Some(k) => k,
            None => {
                self.kernels.push(Kernel {
                    name: kernel_name.to_string(),
                    dispatches: Vec::new(),
                });
                self.kernels.len() - 1
            }
        };

        let kernel = &mut self.kernels[k];
        let d = match kernel
            .dispatches
            .iter()
            .position(|d| d.work_group_size == work_group_size && d.grid_size == grid_size)
        {
            Some(d) => {
                kernel.dispatches[d].count += 1;
                d
            }
            None => {
                kernel.dispatches.push(Dispatch {
                    work_group_size,
                    grid_size,
                    count: 1,
                });
                kernel.dispatches.len() - 1
            }
        };

        debug!(
            target: "wavepoint_core::kernel",
            kernel = kernel_name,
            count = kernel.dispatches[d].count,
            "Registered dispatch"
        );
        self.active = Some((k, d));
        &self.kernels[k].dispatches[d]
    }

    pub fn active_dispatch(&self) -> Option<(&Kernel, &Dispatch)> {
        let (k, d) = self.active?;
        let kernel = self.kernels.get(k)?;
        Some((kernel, kernel.dispatches.get(d)?))
    }

    pub fn active_kernel_name(&self) -> Option<&str> {
        self.active_dispatch().map(|(k, _)| k.name.as_str())
    }

    pub fn kernel(&self, name: &str) -> Option<&Kernel> {
        self.kernels.iter().find(|k| k.name == name)
    }

    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    pub fn clear_all(&mut self) {
        self.kernels.clear();
        self.active = None;
    }
}
