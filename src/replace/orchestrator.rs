//! Replacement Orchestrator
//!
//! Drives a disk swap for one chunkserver and the two operations around it:
//! reporting progress and cancelling.
//!
//! A replacement holds the topology lock from before validation to its last
//! write, and at most one ticket may be pending or running cluster-wide.
//! Validation runs before anything outside the ticket is touched; a rejected
//! attempt leaves no ticket behind. Later failures leave the ticket pending
//! so the operator can retry (the ticket is resumed) or stop.

use crate::domain::ports::{
    FormatRequest, FormatSubsystemRef, RemoteExecutorRef, ServiceControllerRef, StorageRef,
};
use crate::error::{Error, Result};
use crate::records::{
    DiskFilter, DiskRecord, Replacement, ReplacementFilter, ReplacementStatus,
};
use crate::remote::block_device::BlockDevice;
use crate::replace::plan::{ReplaceStep, StepContext};
use crate::storage::TopologyLock;
use crate::topology::{reconcile, reconcile_replacement, DisksDocument, ReconcileRequest};
use crate::validation::{Check, ValidationPipeline};
use tracing::{debug, info, warn};

const DEFAULT_UUID_REWRITE: &str = "tune2fs";

// =============================================================================
// Requests / Outcomes
// =============================================================================

/// Operator request to move a chunkserver onto a new device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceRequest {
    pub service_id: String,
    pub device: String,
    /// Start the chunkserver once the new disk is committed
    pub restart_service: bool,
}

impl ReplaceRequest {
    pub fn new(service_id: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            device: device.into(),
            restart_service: true,
        }
    }

    fn check(&self) -> Result<()> {
        if self.service_id.trim().is_empty() {
            return Err(Error::ChunkserverIdRequired);
        }
        if self.device.trim().is_empty() {
            return Err(Error::DevicePathRequired);
        }
        Ok(())
    }
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The replacement was cancelled and bookkeeping reverted
    Stopped(Replacement),
    /// No replacement existed for the chunkserver
    NoReplacement,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Coordinates replace, status and stop
pub struct ReplaceOrchestrator {
    store: StorageRef,
    executor: RemoteExecutorRef,
    services: ServiceControllerRef,
    formatter: FormatSubsystemRef,
    validation: ValidationPipeline,
    uuid_rewrite: String,
}

impl ReplaceOrchestrator {
    pub fn new(
        store: StorageRef,
        executor: RemoteExecutorRef,
        services: ServiceControllerRef,
        formatter: FormatSubsystemRef,
    ) -> Self {
        let validation = ValidationPipeline::new(executor.clone(), services.clone());
        Self {
            store,
            executor,
            services,
            formatter,
            validation,
            uuid_rewrite: DEFAULT_UUID_REWRITE.to_string(),
        }
    }

    /// Tool used to give a disk a fresh filesystem UUID
    pub fn with_uuid_rewrite(mut self, tool: impl Into<String>) -> Self {
        self.uuid_rewrite = tool.into();
        self
    }

    /// The disk a chunkserver currently owns
    ///
    /// Falls back to the snapshot in an in-flight ticket when the record was
    /// already removed by an interrupted commit.
    pub async fn locate(&self, service_id: &str) -> Result<DiskRecord> {
        let records = self.store.get_disks(&DiskFilter::All).await?;
        if records.is_empty() {
            return Err(Error::EmptyDisks);
        }
        if let Some(record) = records.into_iter().find(|r| r.is_owned_by(service_id)) {
            return Ok(record);
        }

        self.store
            .get_replacements(&ReplacementFilter::Service(service_id.to_string()))
            .await?
            .into_iter()
            .find(|t| t.status == ReplacementStatus::Pending)
            .map(|t| t.previous)
            .ok_or_else(|| Error::ServiceDiskNotFound {
                service_id: service_id.to_string(),
            })
    }

    // =========================================================================
    // Replace
    // =========================================================================

    /// Replace the disk of `request.service_id` with `request.device`
    pub async fn replace(&self, request: &ReplaceRequest) -> Result<Replacement> {
        request.check()?;
        let _lock = self
            .store
            .lock(&format!("replace {}", request.service_id))
            .await?;

        let old = self.locate(&request.service_id).await?;
        let (ticket, created) = self.open_ticket(request, &old).await?;
        info!(
            "Replacing disk of chunkserver {} on {}: {} -> {}",
            ticket.service_id, ticket.host, ticket.old_device, ticket.new_device
        );

        let host_records = self
            .store
            .get_disks(&DiskFilter::Host(ticket.host.clone()))
            .await?;
        let mut ctx = StepContext::new(ticket, host_records);

        for step in ReplaceStep::sequence(request.restart_service) {
            info!("[{}] {}", ctx.ticket.service_id, step);
            if let Err(e) = self.execute(step, &mut ctx).await {
                if !step.mutates() && created {
                    self.store.delete_replacement(&ctx.ticket.service_id).await?;
                    debug!("Discarded ticket of rejected replacement");
                }
                warn!("[{}] {} failed: {}", ctx.ticket.service_id, step, e);
                return Err(e);
            }
        }

        info!(
            "Disk of chunkserver {} on {} is now {}",
            ctx.ticket.service_id, ctx.ticket.host, ctx.ticket.new_device
        );
        Ok(ctx.ticket)
    }

    /// Create a pending ticket, or resume the caller's own pending one
    async fn open_ticket(
        &self,
        request: &ReplaceRequest,
        old: &DiskRecord,
    ) -> Result<(Replacement, bool)> {
        let in_flight = self
            .store
            .get_replacements(&ReplacementFilter::InFlight)
            .await?;

        if let Some(active) = in_flight.into_iter().next() {
            let resumable = active.service_id == request.service_id
                && active.status == ReplacementStatus::Pending
                && active.new_device == request.device;
            if !resumable {
                return Err(Error::ReplacementInProgress {
                    service_id: active.service_id,
                    host: active.host,
                    device: active.new_device,
                });
            }
            info!(
                "Resuming pending replacement of chunkserver {}",
                active.service_id
            );
            return Ok((active, false));
        }

        let old = self.identify_old(old, &request.device).await?;
        let mut ticket = Replacement::new(&request.service_id, old.clone(), &request.device);
        ticket.new_record_preexisted = request.device != old.device
            && !self
                .store
                .get_disks(&DiskFilter::device(&old.host, &request.device))
                .await?
                .is_empty();
        self.store.upsert_replacement(ticket.clone()).await?;
        Ok((ticket, true))
    }

    /// Complete the old record with the size and physical-disk id the checks need
    ///
    /// Records installed by a disks commit carry neither. They are read from
    /// the old device while it is still attached; a replacement whose old disk
    /// cannot be measured is refused.
    async fn identify_old(&self, old: &DiskRecord, new_device: &str) -> Result<DiskRecord> {
        let mut old = old.clone();
        if old.size.is_some() && old.disk_id().is_some() {
            return Ok(old);
        }

        let field = if old.size.is_none() { "size" } else { "uuid" };
        if old.device == new_device {
            return Err(old_disk_unknown(&old, field, "the device path already holds the new disk"));
        }

        let device = BlockDevice::new(self.executor.as_ref(), &old.host, &old.device);
        if old.size.is_none() {
            let size = device
                .size()
                .await
                .map_err(|e| old_disk_unknown(&old, "size", &e.to_string()))?;
            old.size = Some(size);
        }
        if old.disk_id().is_none() {
            let uuid = device
                .uuid()
                .await
                .map_err(|e| old_disk_unknown(&old, "uuid", &e.to_string()))?
                .ok_or_else(|| old_disk_unknown(&old, "uuid", "no filesystem UUID"))?;
            old.set_fs_uuid(&uuid)?;
        }

        info!(
            "Measured former disk {}:{}: size {:?}, uuid {:?}",
            old.host,
            old.device,
            old.size,
            old.disk_id()
        );
        Ok(old)
    }

    async fn execute(&self, step: ReplaceStep, ctx: &mut StepContext) -> Result<()> {
        let host = ctx.ticket.host.clone();
        let service_id = ctx.ticket.service_id.clone();

        match step {
            ReplaceStep::Validate => {
                let checks = Check::plan(&ctx.ticket, &ctx.host_records);
                let report = self.validation.run(&checks).await?;
                ctx.new_size = report.candidate_size;
            }

            ReplaceStep::StopService => {
                self.services.stop(&host, &service_id).await?;
            }

            ReplaceStep::Format => {
                let previous = &ctx.ticket.previous;
                self.formatter
                    .start(&FormatRequest {
                        host: host.clone(),
                        device: ctx.ticket.new_device.clone(),
                        mount_point: previous.mount_point.clone(),
                        percent: previous.format_percent,
                    })
                    .await?;
                ctx.new_uuid = BlockDevice::new(self.executor.as_ref(), &host, &ctx.ticket.new_device)
                    .uuid()
                    .await?;
                if ctx.new_uuid.is_none() {
                    debug!("{}:{} has no filesystem UUID yet", host, ctx.ticket.new_device);
                }
            }

            ReplaceStep::Commit => {
                reconcile_replacement(
                    self.store.as_ref(),
                    &host,
                    &ctx.ticket.new_device,
                    &ctx.ticket.previous,
                )
                .await?;
                self.store.upsert_disk(ctx.new_record()).await?;

                ctx.ticket.mark_running();
                self.store.upsert_replacement(ctx.ticket.clone()).await?;
            }

            ReplaceStep::StartService => {
                self.services.start(&host, &service_id).await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Tickets with progress refreshed from the formatter
    ///
    /// Only `running` tickets are refreshed. Refreshed tickets are persisted
    /// only when the topology lock is free.
    pub async fn status(&self, service_id: Option<&str>) -> Result<Vec<Replacement>> {
        let filter = match service_id {
            Some(id) => ReplacementFilter::Service(id.to_string()),
            None => ReplacementFilter::All,
        };
        let mut tickets = self.store.get_replacements(&filter).await?;
        let lock = self.store.lock("status").await.ok();

        // a pending ticket has not committed its device; format reports do not apply yet
        for ticket in tickets
            .iter_mut()
            .filter(|t| t.status == ReplacementStatus::Running)
        {
            let report = match self.formatter.status(&ticket.host, &ticket.new_device).await {
                Ok(Some(report)) => report,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        "Cannot read format progress of {}:{}: {}",
                        ticket.host, ticket.new_device, e
                    );
                    continue;
                }
            };

            if ticket.apply_progress(&report) && lock.is_some() {
                self.store.upsert_replacement(ticket.clone()).await?;
                self.backfill_disk_id(ticket).await?;
            }
        }
        Ok(tickets)
    }

    /// Record the new disk's UUID if it was not known at commit time
    async fn backfill_disk_id(&self, ticket: &Replacement) -> Result<()> {
        let filter = DiskFilter::device(&ticket.host, &ticket.new_device);
        let Some(mut record) = self.store.get_disks(&filter).await?.into_iter().next() else {
            return Ok(());
        };
        if record.uri.is_some() || !record.is_owned_by(&ticket.service_id) {
            return Ok(());
        }

        let device = BlockDevice::new(self.executor.as_ref(), &ticket.host, &ticket.new_device);
        match device.uuid().await {
            Ok(Some(uuid)) => {
                record.set_fs_uuid(&uuid)?;
                self.store.upsert_disk(record).await?;
            }
            Ok(None) => {}
            Err(e) => debug!("UUID of {}:{} unavailable: {}", ticket.host, ticket.new_device, e),
        }
        Ok(())
    }

    // =========================================================================
    // Stop
    // =========================================================================

    /// Cancel the replacement of `service_id` and revert its bookkeeping
    ///
    /// The formatter is not interrupted; the new disk gets a random UUID so
    /// it cannot be mistaken for the chunkserver's disk.
    pub async fn stop(&self, service_id: &str) -> Result<StopOutcome> {
        if service_id.trim().is_empty() {
            return Err(Error::ChunkserverIdRequired);
        }
        let lock = self.store.lock(&format!("stop {}", service_id)).await?;

        let Some(ticket) = self
            .store
            .get_replacements(&ReplacementFilter::Service(service_id.to_string()))
            .await?
            .into_iter()
            .next()
        else {
            info!("No disk replacement for chunkserver {}", service_id);
            return Ok(StopOutcome::NoReplacement);
        };

        if ticket.status == ReplacementStatus::Done {
            return Err(Error::ReplacementCompleted {
                service_id: ticket.service_id,
                host: ticket.host,
                device: ticket.new_device,
            });
        }

        let device = BlockDevice::new(self.executor.as_ref(), &ticket.host, &ticket.new_device);
        if device.uuid().await?.is_some() {
            device.randomize_uuid(&self.uuid_rewrite).await?;
        } else {
            debug!("{}:{} has no filesystem yet", ticket.host, ticket.new_device);
        }

        self.revert(&ticket, &lock).await?;
        self.store.delete_replacement(&ticket.service_id).await?;

        info!(
            "Stopped disk replacement of chunkserver {} ({} restored on {})",
            ticket.service_id, ticket.old_device, ticket.host
        );
        Ok(StopOutcome::Stopped(ticket))
    }

    async fn revert(&self, ticket: &Replacement, _lock: &TopologyLock) -> Result<()> {
        let new_filter = DiskFilter::device(&ticket.host, &ticket.new_device);
        let committed = self
            .store
            .get_disks(&new_filter)
            .await?
            .into_iter()
            .find(|r| r.is_owned_by(&ticket.service_id));

        if let Some(current) = committed.filter(|_| ticket.new_device != ticket.old_device) {
            let raw = self.store.disks_document().await?;
            let mut doc = DisksDocument::parse(&raw)?;
            let outcome = reconcile(
                &mut doc,
                &ReconcileRequest {
                    host: &ticket.host,
                    new_device: &ticket.old_device,
                    old: &current,
                    new_record_exists: false,
                    withdraw_old: !ticket.new_record_preexisted,
                },
            );
            doc.build()?;
            self.store.set_disks_document(&doc.to_yaml()?).await?;
            debug!("Topology reverted for {}: {:?}", ticket.host, outcome);

            if ticket.new_record_preexisted {
                self.store
                    .upsert_disk(DiskRecord {
                        service_id: None,
                        ..current
                    })
                    .await?;
            } else {
                self.store.delete_disks(&new_filter).await?;
            }
        }

        self.store.upsert_disk(ticket.previous.clone()).await?;
        Ok(())
    }
}

fn old_disk_unknown(old: &DiskRecord, field: &'static str, reason: &str) -> Error {
    Error::OldDiskUnknown {
        host: old.host.clone(),
        device: old.device.clone(),
        field,
        reason: reason.to_string(),
    }
}
