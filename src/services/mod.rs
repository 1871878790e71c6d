use thiserror::Error;

use crate::store::StoreError;

mod records;
mod reports;

pub use records::{check_record_now, forget_record};
pub use reports::*;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found")]
    NotFound,
    #[error("store error {0}")]
    Store(#[from] StoreError),
}
