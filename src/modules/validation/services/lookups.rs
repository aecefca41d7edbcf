// External lookup seams for business rules.
//
// A lookup failure is not a verdict: rules translate `LookupError` into an
// indeterminate outcome so an unreachable directory never rejects a valid
// invoice.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::modules::invoices::models::{Extraction, Invoice};
use crate::store::MemoryStore;

/// Transient failure reaching the external system
#[derive(Debug, Clone, thiserror::Error)]
#[error("lookup failed: {0}")]
pub struct LookupError(pub String);

pub type LookupResult<T> = std::result::Result<T, LookupError>;

#[derive(Debug, Clone)]
pub struct VendorRecord {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub currencies: BTreeSet<String>,
    pub tax_id: Option<String>,
    pub spend_limit: Option<Decimal>,
    pub payment_terms_days: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct PurchaseOrder {
    pub number: String,
    pub vendor_id: String,
    pub total: Decimal,
    pub quantity: Decimal,
    pub currency: String,
    pub amount_tolerance: Decimal,
    pub quantity_tolerance: Decimal,
}

#[derive(Debug, Clone)]
pub struct GoodsReceipt {
    pub number: String,
    pub po_number: String,
    pub quantity: Decimal,
}

#[async_trait]
pub trait VendorDirectory: Send + Sync {
    async fn find_by_name(&self, name: &str) -> LookupResult<Option<VendorRecord>>;
}

#[async_trait]
pub trait PurchaseOrderBook: Send + Sync {
    async fn find(&self, po_number: &str) -> LookupResult<Option<PurchaseOrder>>;
}

#[async_trait]
pub trait GoodsReceiptBook: Send + Sync {
    async fn find(&self, grn_number: &str) -> LookupResult<Option<GoodsReceipt>>;
}

/// How a prior invoice was recognized as a duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKind {
    /// Same content hash
    Exact,
    /// Same (vendor, invoice_number, invoice_date)
    Structural,
    /// Amount within variance and date within window for the same vendor
    Near,
}

#[derive(Debug, Clone)]
pub struct DuplicateMatch {
    pub invoice_id: Uuid,
    pub kind: DuplicateKind,
}

#[async_trait]
pub trait InvoiceIndex: Send + Sync {
    async fn find_duplicates(
        &self,
        invoice: &Invoice,
        extraction: &Extraction,
        amount_variance: Decimal,
        date_window_days: i64,
    ) -> LookupResult<Vec<DuplicateMatch>>;
}

/// Bundle of lookup dependencies handed to the rule engine
#[derive(Clone)]
pub struct Lookups {
    pub vendors: Arc<dyn VendorDirectory>,
    pub purchase_orders: Arc<dyn PurchaseOrderBook>,
    pub goods_receipts: Arc<dyn GoodsReceiptBook>,
    pub invoice_index: Arc<dyn InvoiceIndex>,
}

// ---- bundled implementations ----

/// Configurable in-memory vendor directory. `set_unreachable` simulates an
/// outage for degradation behavior.
#[derive(Default)]
pub struct StaticVendorDirectory {
    vendors: Mutex<HashMap<String, VendorRecord>>,
    unreachable: AtomicBool,
}

impl StaticVendorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, vendor: VendorRecord) {
        self.vendors
            .lock()
            .unwrap()
            .insert(vendor.name.to_lowercase(), vendor);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl VendorDirectory for StaticVendorDirectory {
    async fn find_by_name(&self, name: &str) -> LookupResult<Option<VendorRecord>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LookupError("vendor directory unreachable".into()));
        }
        Ok(self.vendors.lock().unwrap().get(&name.to_lowercase()).cloned())
    }
}

#[derive(Default)]
pub struct StaticPurchaseOrderBook {
    orders: Mutex<HashMap<String, PurchaseOrder>>,
    unreachable: AtomicBool,
}

impl StaticPurchaseOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, po: PurchaseOrder) {
        self.orders.lock().unwrap().insert(po.number.clone(), po);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl PurchaseOrderBook for StaticPurchaseOrderBook {
    async fn find(&self, po_number: &str) -> LookupResult<Option<PurchaseOrder>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LookupError("purchase order system unreachable".into()));
        }
        Ok(self.orders.lock().unwrap().get(po_number).cloned())
    }
}

#[derive(Default)]
pub struct StaticGoodsReceiptBook {
    receipts: Mutex<HashMap<String, GoodsReceipt>>,
    unreachable: AtomicBool,
}

impl StaticGoodsReceiptBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, grn: GoodsReceipt) {
        self.receipts.lock().unwrap().insert(grn.number.clone(), grn);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl GoodsReceiptBook for StaticGoodsReceiptBook {
    async fn find(&self, grn_number: &str) -> LookupResult<Option<GoodsReceipt>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LookupError("goods receipt system unreachable".into()));
        }
        Ok(self.receipts.lock().unwrap().get(grn_number).cloned())
    }
}

/// Duplicate index over the engine's own store
pub struct StoreInvoiceIndex {
    store: Arc<MemoryStore>,
}

impl StoreInvoiceIndex {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl InvoiceIndex for StoreInvoiceIndex {
    async fn find_duplicates(
        &self,
        invoice: &Invoice,
        extraction: &Extraction,
        amount_variance: Decimal,
        date_window_days: i64,
    ) -> LookupResult<Vec<DuplicateMatch>> {
        let vendor = extraction.header_value("vendor_name").map(|v| v.to_lowercase());
        let number = extraction.header_value("invoice_number").map(|v| v.to_string());
        let date = extraction
            .header_value("invoice_date")
            .and_then(super::rules::parse_invoice_date);
        let total = extraction.header_decimal("total_amount");

        let matches = self.store.read(|t| {
            let mut found = Vec::new();
            for other in t.invoices() {
                if other.id == invoice.id || other.archived {
                    continue;
                }
                if other.content_hash == invoice.content_hash {
                    found.push(DuplicateMatch {
                        invoice_id: other.id,
                        kind: DuplicateKind::Exact,
                    });
                    continue;
                }
                let Some(other_ex) = t.extraction_for(other.id) else {
                    continue;
                };
                let other_vendor = other_ex.header_value("vendor_name").map(|v| v.to_lowercase());
                if vendor.is_none() || other_vendor != vendor {
                    continue;
                }
                let other_number = other_ex.header_value("invoice_number").map(|v| v.to_string());
                let other_date = other_ex
                    .header_value("invoice_date")
                    .and_then(super::rules::parse_invoice_date);
                if number.is_some() && other_number == number && other_date == date {
                    found.push(DuplicateMatch {
                        invoice_id: other.id,
                        kind: DuplicateKind::Structural,
                    });
                    continue;
                }
                if let (Some(total), Some(other_total), Some(date), Some(other_date)) = (
                    total,
                    other_ex.header_decimal("total_amount"),
                    date,
                    other_date,
                ) {
                    let days_apart = (date - other_date).num_days().abs();
                    if (total - other_total).abs() <= amount_variance
                        && days_apart <= date_window_days
                    {
                        found.push(DuplicateMatch {
                            invoice_id: other.id,
                            kind: DuplicateKind::Near,
                        });
                    }
                }
            }
            found
        });
        Ok(matches)
    }
}
