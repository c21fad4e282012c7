//! Organization DTOs
//!
//! Onboarding requests and ledger query parameters.

use callmeter_core::models::TransactionCursor;
use callmeter_core::traits::MAX_PAGE_SIZE;
use serde::Deserialize;
use validator::Validate;

/// Wallet onboarding request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OpenWalletRequest {
    #[validate(length(min = 1, max = 128, message = "org_id is required"))]
    pub org_id: String,

    /// Currency code (ISO 4217); the configured default when absent
    #[validate(length(equal = 3, message = "currency must be a 3-letter code"))]
    pub currency: Option<String>,
}

/// Query parameters for the transaction history
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct TransactionQueryParams {
    /// `seq` of the last row on the previous page
    #[validate(range(min = 1))]
    pub cursor: Option<i64>,

    #[validate(range(min = 1, max = MAX_PAGE_SIZE))]
    pub limit: Option<usize>,
}

impl TransactionQueryParams {
    pub fn cursor(&self) -> Option<TransactionCursor> {
        self.cursor.map(|before_seq| TransactionCursor { before_seq })
    }
}
