pub mod approval_service;
pub mod policy_engine;

pub use approval_service::ApprovalService;
pub use policy_engine::PolicyEngine;
