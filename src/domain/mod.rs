mod budget;
mod field;
mod history;
mod url;

pub use budget::{DomainBudget, registered_domain};
pub use field::{FieldKind, FieldValue};
pub use history::{CheckableUrl, FieldId, RecordHistoryEntry, RecordId, UrlHistoryEntry};
pub use url::{CheckUrl, UrlParseError};
