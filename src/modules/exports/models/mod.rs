pub mod staged_export;

pub use staged_export::{
    ChangeSignificance, ExportFormat, ExportStatus, FieldChange, StagedExport,
};
