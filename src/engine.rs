// Engine assembly: every component receives its dependencies (clock, store,
// queues, seams) at construction. No globals, no service caches.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::config::Config;
use crate::core::{Clock, Result, SystemClock};
use crate::modules::approvals::services::approval_service::EscalationTask;
use crate::modules::approvals::services::{ApprovalService, PolicyEngine};
use crate::modules::exceptions::services::ExceptionManager;
use crate::modules::exports::services::{
    CircuitBreaker, DestinationConnector, RecordingConnector, StagingService,
};
use crate::modules::idempotency::services::{IdempotencyManager, SweepTask};
use crate::modules::invoices::services::{Extractor, IngestService, JsonExtractor};
use crate::modules::jobs::services::{
    DlqMonitorTask, JobQueue, RetryPolicy, Scheduler, WorkerPool,
};
use crate::modules::slo::services::{
    DailySliTask, DigestService, DigestTask, HourlySliTask, MetricsService,
};
use crate::modules::validation::services::{
    FieldEnhancer, GoodsReceiptBook, Lookups, NoopEnhancer, PurchaseOrderBook, RuleEngine,
    StaticGoodsReceiptBook, StaticPurchaseOrderBook, StaticVendorDirectory, StoreInvoiceIndex,
    ValidationSettings, VendorDirectory,
};
use crate::modules::workflow::services::{
    ExportPostHandler, RevalidateHandler, WorkflowJobHandler, WorkflowRunner,
};
use crate::store::{AuditLogSubscriber, MemoryStore, OutboxRelay};

/// DLQ depth at which the monitor raises an alert
const DLQ_ALERT_THRESHOLD: usize = 10;

pub struct Engine {
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<JobQueue>,
    pub idempotency: Arc<IdempotencyManager>,
    pub lookups: Lookups,
    pub ingest: Arc<IngestService>,
    pub runner: Arc<WorkflowRunner>,
    pub exceptions: Arc<ExceptionManager>,
    pub approvals: Arc<ApprovalService>,
    pub policies: Arc<PolicyEngine>,
    pub staging: Arc<StagingService>,
    pub metrics: Arc<MetricsService>,
    pub digest: Arc<DigestService>,
    pub relay: Arc<OutboxRelay>,
    pub scheduler: Arc<Scheduler>,
    workers: Arc<WorkerPool>,
}

pub struct EngineBuilder {
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    extractor: Option<Arc<dyn Extractor>>,
    enhancer: Option<Arc<dyn FieldEnhancer>>,
    connector: Option<Arc<dyn DestinationConnector>>,
    vendors: Option<Arc<dyn VendorDirectory>>,
    purchase_orders: Option<Arc<dyn PurchaseOrderBook>>,
    goods_receipts: Option<Arc<dyn GoodsReceiptBook>>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: None,
            extractor: None,
            enhancer: None,
            connector: None,
            vendors: None,
            purchase_orders: None,
            goods_receipts: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn enhancer(mut self, enhancer: Arc<dyn FieldEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn DestinationConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn vendors(mut self, vendors: Arc<dyn VendorDirectory>) -> Self {
        self.vendors = Some(vendors);
        self
    }

    pub fn purchase_orders(mut self, purchase_orders: Arc<dyn PurchaseOrderBook>) -> Self {
        self.purchase_orders = Some(purchase_orders);
        self
    }

    pub fn goods_receipts(mut self, goods_receipts: Arc<dyn GoodsReceiptBook>) -> Self {
        self.goods_receipts = Some(goods_receipts);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = Arc::new(self.config);
        let clock: Arc<dyn Clock> = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        let store = MemoryStore::new(clock.clone());

        let retry = RetryPolicy::new(
            config.retry_initial_delay,
            config.retry_multiplier,
            config.retry_max_delay,
            config.retry_max_attempts,
        );
        let queue = Arc::new(JobQueue::new(store.clone(), retry));
        let idempotency = Arc::new(IdempotencyManager::new(
            store.clone(),
            config.idempotency_max_executions,
        ));

        let lookups = Lookups {
            vendors: self
                .vendors
                .unwrap_or_else(|| Arc::new(StaticVendorDirectory::new())),
            purchase_orders: self
                .purchase_orders
                .unwrap_or_else(|| Arc::new(StaticPurchaseOrderBook::new())),
            goods_receipts: self
                .goods_receipts
                .unwrap_or_else(|| Arc::new(StaticGoodsReceiptBook::new())),
            invoice_index: Arc::new(StoreInvoiceIndex::new(store.clone())),
        };
        let rules = Arc::new(RuleEngine::standard(
            ValidationSettings::with_tolerance(config.validation_tolerance),
            lookups.clone(),
        ));

        let extractor: Arc<dyn Extractor> = self
            .extractor
            .unwrap_or_else(|| Arc::new(JsonExtractor::new(store.clone())));
        let enhancer: Arc<dyn FieldEnhancer> =
            self.enhancer.unwrap_or_else(|| Arc::new(NoopEnhancer));
        let connector: Arc<dyn DestinationConnector> = self
            .connector
            .unwrap_or_else(|| Arc::new(RecordingConnector::new("ledger")));

        let staging = Arc::new(StagingService::new(
            store.clone(),
            queue.clone(),
            idempotency.clone(),
            connector,
            CircuitBreaker::new(clock.clone()),
            clock.clone(),
            config.staging_quality_threshold,
            config.staging_approval_timeout,
            config.staging_rollback_window,
        ));
        let policies = Arc::new(PolicyEngine::new(store.clone(), lookups.vendors.clone()));
        let approvals = Arc::new(ApprovalService::new(store.clone(), queue.clone()));
        let exceptions = Arc::new(ExceptionManager::new(store.clone(), queue.clone()));

        let runner = Arc::new(WorkflowRunner::new(
            store.clone(),
            clock.clone(),
            config.clone(),
            extractor,
            enhancer,
            rules.clone(),
            policies.clone(),
            staging.clone(),
            queue.clone(),
        ));

        let metrics = Arc::new(MetricsService::new(store.clone(), clock.clone()));
        metrics.seed_defaults()?;
        let digest = Arc::new(DigestService::new(store.clone(), clock.clone()));
        let ingest = Arc::new(IngestService::new(
            store.clone(),
            queue.clone(),
            idempotency.clone(),
            config.idempotency_ttl,
        ));

        let relay = Arc::new(OutboxRelay::new(store.clone(), config.alert_delivery_sla));
        relay.subscribe(Arc::new(AuditLogSubscriber::new(store.clone())));
        relay.subscribe(metrics.clone());

        let mut workers = WorkerPool::new(
            queue.clone(),
            config.job_soft_timeout,
            config.job_hard_timeout,
            config.worker_concurrency,
            config.worker_prefetch,
        );
        workers.register(Arc::new(WorkflowJobHandler::parse(runner.clone())));
        workers.register(Arc::new(WorkflowJobHandler::process(runner.clone())));
        workers.register(Arc::new(RevalidateHandler::new(
            store.clone(),
            clock.clone(),
            rules.clone(),
            runner.clone(),
        )));
        workers.register(Arc::new(ExportPostHandler::new(
            staging.clone(),
            queue.clone(),
        )));
        let workers = Arc::new(workers);

        let mut scheduler = Scheduler::new(clock.clone());
        scheduler.register("0 * * * *", Arc::new(HourlySliTask(metrics.clone())))?;
        scheduler.register("5 1 * * *", Arc::new(DailySliTask(metrics.clone())))?;
        scheduler.register("0 9 * * 1", Arc::new(DigestTask(digest.clone())))?;
        scheduler.register("15 * * * *", Arc::new(SweepTask(idempotency.clone())))?;
        scheduler.register(
            "*/5 * * * *",
            Arc::new(DlqMonitorTask::new(
                store.clone(),
                queue.clone(),
                DLQ_ALERT_THRESHOLD,
            )),
        )?;
        scheduler.register("*/15 * * * *", Arc::new(EscalationTask(approvals.clone())))?;
        let scheduler = Arc::new(scheduler);

        Ok(Engine {
            config,
            clock,
            store,
            queue,
            idempotency,
            lookups,
            ingest,
            runner,
            exceptions,
            approvals,
            policies,
            staging,
            metrics,
            digest,
            relay,
            scheduler,
            workers,
        })
    }
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Deterministic drain: alternate the outbox relay and the worker pool
    /// until both are idle. Tests and maintenance commands use this instead
    /// of the background loops.
    pub async fn pump(&self) -> Result<()> {
        loop {
            let delivered = self.relay.drain_all().await;
            let processed = self.workers.run_until_idle().await?;
            if delivered == 0 && processed == 0 {
                return Ok(());
            }
        }
    }

    /// Fire any scheduled tasks that are due, then settle the fallout
    pub async fn tick_scheduler(&self) -> Result<()> {
        self.scheduler.tick().await;
        self.pump().await
    }

    /// Production mode: parallel workers, continuous relay, scheduler.
    /// Blocks until ctrl-c.
    pub async fn run(&self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = self.workers.clone().spawn(shutdown_rx.clone());
        handles.push(tokio::spawn(self.relay.clone().run(shutdown_rx.clone())));
        handles.push(tokio::spawn(self.scheduler.clone().run(shutdown_rx)));

        info!(
            workers = self.config.worker_concurrency,
            "Engine running; ctrl-c to stop"
        );
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
        let _ = shutdown_tx.send(true);
        futures_util::future::join_all(handles).await;
        Ok(())
    }
}
