pub mod exception;

pub use exception::{
    Exception, ExceptionCategory, ExceptionIssue, ExceptionStatus, ResolutionAction,
};
