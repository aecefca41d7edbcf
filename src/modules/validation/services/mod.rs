pub mod business;
pub mod engine;
pub mod enhancer;
pub mod lookups;
pub mod rules;

pub use engine::{RuleEngine, RULES_VERSION};
pub use enhancer::{FieldEnhancer, NoopEnhancer};
pub use lookups::{
    DuplicateKind, DuplicateMatch, GoodsReceipt, GoodsReceiptBook, InvoiceIndex, LookupError,
    LookupResult, Lookups, PurchaseOrder, PurchaseOrderBook, StaticGoodsReceiptBook,
    StaticPurchaseOrderBook, StaticVendorDirectory, StoreInvoiceIndex, VendorDirectory,
    VendorRecord,
};
pub use rules::{Rule, RuleContext, ValidationSettings, DEFAULT_REQUIRED_FIELDS};
