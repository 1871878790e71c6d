mod records;
mod status;
mod urls;

pub(crate) use records::{check_record, forget_record};
pub(crate) use status::{health, status};
pub(crate) use urls::{hide_url, list_urls, status_codes};

pub use records::CheckRecordResponse;
pub use urls::HideRequest;
