// Invoice document builders. Documents are structured JSON the bundled
// extractor parses deterministically, so scenarios control every field and
// confidence literally.

use serde_json::{json, Value};

/// A mathematically consistent invoice: subtotal 200.00 + tax 20.00 =
/// total 220.00, one line 2 x 100.00.
pub fn clean_invoice(vendor: &str, number: &str) -> Value {
    json!({
        "vendor_name": vendor,
        "invoice_number": number,
        "invoice_date": "2025-05-20",
        "currency": "USD",
        "subtotal": "200.00",
        "tax_amount": "20.00",
        "total_amount": "220.00",
        "lines": [
            {"description": "Widgets", "quantity": "2", "unit_price": "100.00", "amount": "200.00"}
        ]
    })
}

/// Same shape with a broken grand total (221.00 instead of 220.00)
pub fn total_mismatch_invoice(vendor: &str, number: &str) -> Value {
    let mut doc = clean_invoice(vendor, number);
    doc["total_amount"] = json!("221.00");
    doc
}

/// A consistent invoice with an arbitrary round amount and no tax
pub fn invoice_with_total(vendor: &str, number: &str, total: &str) -> Value {
    json!({
        "vendor_name": vendor,
        "invoice_number": number,
        "invoice_date": "2025-05-20",
        "currency": "USD",
        "subtotal": total,
        "tax_amount": "0.00",
        "total_amount": total,
        "lines": [
            {"description": "Services", "quantity": "1", "unit_price": total, "amount": total}
        ]
    })
}

pub fn doc_bytes(doc: &Value) -> Vec<u8> {
    serde_json::to_vec_pretty(doc).expect("document serializes")
}
