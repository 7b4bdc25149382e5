//! Replacement Validation
//!
//! Ordered checks a candidate device must pass before anything is mutated.
//! Checks short-circuit on the first rejection. A remote query that cannot
//! run is a hard error; a query that runs and returns a value failing policy
//! is a policy rejection.
//!
//! The one tolerated failure is an unreachable peer during the health check:
//! it is collected and reported as a warning unless some peer explicitly
//! reports itself unhealthy.

use crate::domain::ports::{RemoteExecutorRef, ServiceControllerRef, ServiceHealth};
use crate::error::{Error, Result};
use crate::records::{DiskRecord, Replacement};
use crate::remote::block_device::{unmount, BlockDevice};
use futures::future::join_all;
use std::fmt;
use tracing::{debug, info, warn};

// =============================================================================
// Checks
// =============================================================================

/// One validation step with the inputs it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Every other chunkserver on the host is healthy
    ClusterHealth { host: String, peers: Vec<String> },
    /// The candidate is at least as large as the old disk
    Size {
        host: String,
        device: String,
        old_device: String,
        old_size: Option<u64>,
    },
    /// No other chunkserver owns the candidate
    NotInUse {
        host: String,
        device: String,
        service_id: String,
        owner: Option<String>,
    },
    /// The candidate is not the old physical disk
    DifferentDisk {
        host: String,
        device: String,
        old_device: String,
        old_disk_id: Option<String>,
    },
    /// The candidate carries no filesystem
    Empty { host: String, device: String },
    /// The old mount point is released
    UnmountOld { host: String, mount_point: String },
}

impl Check {
    /// Checks for `ticket`, in execution order
    ///
    /// `records` are all disk records on the ticket's host.
    pub fn plan(ticket: &Replacement, records: &[DiskRecord]) -> Vec<Check> {
        let host = &ticket.host;
        let device = &ticket.new_device;

        let mut peers: Vec<String> = records
            .iter()
            .filter(|r| &r.host == host)
            .filter_map(|r| r.service_id.clone())
            .filter(|id| id != &ticket.service_id)
            .collect();
        peers.sort();
        peers.dedup();

        let owner = records
            .iter()
            .find(|r| &r.host == host && &r.device == device)
            .and_then(|r| r.service_id.clone());

        vec![
            Check::ClusterHealth {
                host: host.clone(),
                peers,
            },
            Check::Size {
                host: host.clone(),
                device: device.clone(),
                old_device: ticket.old_device.clone(),
                old_size: ticket.previous.size,
            },
            Check::NotInUse {
                host: host.clone(),
                device: device.clone(),
                service_id: ticket.service_id.clone(),
                owner,
            },
            Check::DifferentDisk {
                host: host.clone(),
                device: device.clone(),
                old_device: ticket.old_device.clone(),
                old_disk_id: ticket.old_disk_id.clone(),
            },
            Check::Empty {
                host: host.clone(),
                device: device.clone(),
            },
            Check::UnmountOld {
                host: host.clone(),
                mount_point: ticket.previous.mount_point.clone(),
            },
        ]
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::ClusterHealth { .. } => write!(f, "cluster health"),
            Check::Size { .. } => write!(f, "disk size"),
            Check::NotInUse { .. } => write!(f, "disk in use"),
            Check::DifferentDisk { .. } => write!(f, "same physical disk"),
            Check::Empty { .. } => write!(f, "disk empty"),
            Check::UnmountOld { .. } => write!(f, "unmount old disk"),
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// What the checks learned about the candidate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub candidate_size: Option<u64>,
    /// Peers whose health probe could not run
    pub unreachable: Vec<String>,
}

/// Runs [`Check`]s against remote hosts
pub struct ValidationPipeline {
    executor: RemoteExecutorRef,
    services: ServiceControllerRef,
}

impl ValidationPipeline {
    pub fn new(executor: RemoteExecutorRef, services: ServiceControllerRef) -> Self {
        Self { executor, services }
    }

    /// Run every check in order, stopping at the first failure
    pub async fn run(&self, checks: &[Check]) -> Result<ValidationReport> {
        let mut report = ValidationReport::default();
        for check in checks {
            debug!("Checking {}", check);
            self.run_check(check, &mut report).await?;
        }
        info!("All {} validation checks passed", checks.len());
        Ok(report)
    }

    async fn run_check(&self, check: &Check, report: &mut ValidationReport) -> Result<()> {
        match check {
            Check::ClusterHealth { host, peers } => {
                report.unreachable = self.check_health(host, peers).await?;
            }

            Check::Size {
                host,
                device,
                old_device,
                old_size,
            } => {
                let new_size = BlockDevice::new(self.executor.as_ref(), host, device)
                    .size()
                    .await?;
                report.candidate_size = Some(new_size);

                let Some(old_size) = *old_size else {
                    return Err(Error::OldDiskUnknown {
                        host: host.clone(),
                        device: old_device.clone(),
                        field: "size",
                        reason: "never recorded".to_string(),
                    });
                };
                if new_size < old_size {
                    return Err(Error::DiskTooSmall {
                        host: host.clone(),
                        device: device.clone(),
                        new_size,
                        old_device: old_device.clone(),
                        old_size,
                    });
                }
            }

            Check::NotInUse {
                host,
                device,
                service_id,
                owner,
            } => {
                if let Some(owner) = owner.as_ref().filter(|o| *o != service_id) {
                    return Err(Error::DiskInUse {
                        host: host.clone(),
                        device: device.clone(),
                        service_id: owner.clone(),
                    });
                }
            }

            Check::DifferentDisk {
                host,
                device,
                old_device,
                old_disk_id,
            } => {
                let Some(old_id) = old_disk_id else {
                    return Err(Error::OldDiskUnknown {
                        host: host.clone(),
                        device: old_device.clone(),
                        field: "uuid",
                        reason: "never recorded".to_string(),
                    });
                };
                let uuid = BlockDevice::new(self.executor.as_ref(), host, device)
                    .uuid()
                    .await?;
                if uuid.as_deref() == Some(old_id.as_str()) {
                    return Err(Error::SamePhysicalDisk {
                        host: host.clone(),
                        device: device.clone(),
                        uuid: old_id.clone(),
                    });
                }
            }

            Check::Empty { host, device } => {
                let fs_type = BlockDevice::new(self.executor.as_ref(), host, device)
                    .fs_type()
                    .await?;
                if let Some(fs_type) = fs_type {
                    return Err(Error::DiskNotEmpty {
                        host: host.clone(),
                        device: device.clone(),
                        fs_type,
                    });
                }
            }

            Check::UnmountOld { host, mount_point } => {
                unmount(self.executor.as_ref(), host, mount_point).await?;
            }
        }
        Ok(())
    }

    /// Probe all peers concurrently; returns the unreachable ones
    async fn check_health(&self, host: &str, peers: &[String]) -> Result<Vec<String>> {
        let probes = peers.iter().map(|id| self.services.probe(host, id));
        let results = join_all(probes).await;

        let mut unreachable = Vec::new();
        for (id, result) in peers.iter().zip(results) {
            match result {
                Ok(ServiceHealth::Healthy) => {}
                Ok(ServiceHealth::Unhealthy(reason)) => {
                    return Err(Error::ClusterUnhealthy {
                        host: host.to_string(),
                        service_id: id.clone(),
                        reason,
                    });
                }
                Err(e) => {
                    debug!("Health probe of {} on {} failed: {}", id, host, e);
                    unreachable.push(id.clone());
                }
            }
        }

        if !unreachable.is_empty() {
            warn!(
                "{} of {} chunkservers on {} could not be probed: {}",
                unreachable.len(),
                peers.len(),
                host,
                unreachable.join(", ")
            );
        }
        Ok(unreachable)
    }
}
