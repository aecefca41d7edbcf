use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use apflow::core::{ManualClock, Principal, Role};
use apflow::invoices::models::{Invoice, InvoiceSource, InvoiceState};
use apflow::invoices::services::SubmitOutcome;
use apflow::modules::approvals::models::PolicyGate;
use apflow::modules::exports::services::RecordingConnector;
use apflow::modules::validation::services::{
    StaticGoodsReceiptBook, StaticPurchaseOrderBook, StaticVendorDirectory,
};
use apflow::store::{EventKind, OutboxEvent};
use apflow::{Config, Engine};

use super::documents::doc_bytes;

/// Engine wired for deterministic tests: manual clock, recording connector,
/// in-memory directories.
pub struct TestHarness {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub connector: Arc<RecordingConnector>,
    pub vendors: Arc<StaticVendorDirectory>,
    pub purchase_orders: Arc<StaticPurchaseOrderBook>,
    pub goods_receipts: Arc<StaticGoodsReceiptBook>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let clock = Arc::new(ManualClock::new());
        let connector = Arc::new(RecordingConnector::new("ledger"));
        let vendors = Arc::new(StaticVendorDirectory::new());
        let purchase_orders = Arc::new(StaticPurchaseOrderBook::new());
        let goods_receipts = Arc::new(StaticGoodsReceiptBook::new());

        let engine = Engine::builder(config)
            .clock(clock.clone())
            .connector(connector.clone())
            .vendors(vendors.clone())
            .purchase_orders(purchase_orders.clone())
            .goods_receipts(goods_receipts.clone())
            .build()
            .expect("engine builds");

        Self {
            engine,
            clock,
            connector,
            vendors,
            purchase_orders,
            goods_receipts,
        }
    }

    pub fn clerk() -> Principal {
        Principal::new("clerk-1", Role::ApClerk, "acme")
    }

    pub fn manager() -> Principal {
        Principal::new("manager-1", Role::ApManager, "acme")
    }

    pub fn controller() -> Principal {
        Principal::new("controller-1", Role::Controller, "acme")
    }

    pub async fn submit(&self, doc: &Value) -> SubmitOutcome {
        self.engine
            .ingest
            .submit_document(
                doc_bytes(doc),
                "invoice.json",
                &Self::clerk(),
                InvoiceSource::Api,
                None,
            )
            .await
            .expect("submission accepted")
    }

    /// Submit and run the engine until idle
    pub async fn submit_and_pump(&self, doc: &Value) -> Invoice {
        let outcome = self.submit(doc).await;
        self.pump().await;
        self.invoice(outcome.invoice_id)
    }

    pub async fn pump(&self) {
        self.engine.pump().await.expect("engine pump");
    }

    pub fn invoice(&self, invoice_id: Uuid) -> Invoice {
        self.engine
            .store
            .read(|t| t.invoice(invoice_id))
            .expect("invoice exists")
    }

    pub fn state(&self, invoice_id: Uuid) -> InvoiceState {
        self.invoice(invoice_id).state
    }

    pub fn add_gate(&self, gate: PolicyGate) {
        self.engine
            .store
            .transaction(|tx| {
                tx.upsert_policy_gate(gate.clone());
                Ok(())
            })
            .expect("gate stored");
    }

    /// (from, to) pairs of every recorded workflow transition, in order
    pub fn transitions(&self, invoice_id: Uuid) -> Vec<(String, String)> {
        self.events(invoice_id)
            .into_iter()
            .filter(|e| e.kind == EventKind::WorkflowTransition)
            .map(|e| {
                (
                    e.payload["from"].as_str().unwrap_or_default().to_string(),
                    e.payload["to"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    pub fn events(&self, invoice_id: Uuid) -> Vec<OutboxEvent> {
        self.engine.store.read(|t| t.outbox_events_for(invoice_id))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
