use finledger_domain::{InvoiceCycle, InvoiceStatus, TransactionType};
use thiserror::Error;
use uuid::Uuid;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Bank account not found: {0}")]
    AccountNotFound(Uuid),
    #[error("Credit card not found: {0}")]
    CreditCardNotFound(Uuid),
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(Uuid),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),
    #[error("No installments found for purchase {0}")]
    InstallmentsNotFound(Uuid),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error("State conflict: {0}")]
    StateConflict(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

/// Business rules whose violation is reported verbatim to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("value must not be negative (got {0})")]
    NegativeValue(f64),
    #[error("credit limit exceeded: total {attempted:.2} over limit {limit:.2}")]
    CreditLimitExceeded { limit: f64, attempted: f64 },
    #[error("invoice {0} is already paid")]
    InvoicePaid(Uuid),
    #[error("invoice cannot be paid while {0}")]
    InvoiceNotPayable(InvoiceStatus),
    #[error("operation not supported for {0} transactions")]
    UnsupportedTransactionType(TransactionType),
    #[error("recurring transactions must be changed through their series")]
    RecurringTransaction,
    #[error("transaction is not part of a recurring series")]
    NotRecurring,
    #[error("transaction is already paid")]
    AlreadyPaid,
    #[error("transaction is already unpaid")]
    AlreadyUnpaid,
    #[error("an installment of this purchase is already paid")]
    InstallmentPaid,
    #[error("dates of a recurring series cannot be changed")]
    RecurringDateChange,
    #[error("field `{0}` cannot be changed here")]
    FieldNotAllowed(&'static str),
    #[error("credit card purchases must be created unpaid")]
    InvoiceMustBeUnpaid,
    #[error("recurring series may span at most one year")]
    RecurringPeriodTooLong,
    #[error("invoice cycle {0} is outside the accepted range")]
    InvoiceCycleOutOfRange(InvoiceCycle),
    #[error("name `{0}` is already in use")]
    DuplicateName(String),
    #[error("bank account {0} is still referenced by transactions or cards")]
    AccountInUse(Uuid),
    #[error("credit card {0} still has invoices")]
    CardHasInvoices(Uuid),
    #[error("credit limit {limit:.2} is below an unpaid invoice total of {total:.2}")]
    LimitBelowInvoiceTotal { limit: f64, total: f64 },
    #[error("invoice {0} still has transactions")]
    InvoiceInUse(Uuid),
}

/// Coarse classification of [`CoreError`] for callers deciding how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    InvariantViolation,
    StateConflict,
    Storage,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::AccountNotFound(_)
            | CoreError::CreditCardNotFound(_)
            | CoreError::InvoiceNotFound(_)
            | CoreError::TransactionNotFound(_)
            | CoreError::InstallmentsNotFound(_) => ErrorKind::NotFound,
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::Invariant(_) => ErrorKind::InvariantViolation,
            CoreError::StateConflict(_) => ErrorKind::StateConflict,
            CoreError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Only concurrent-modification failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::StateConflict(_))
    }

    pub fn invariant(&self) -> Option<&InvariantViolation> {
        match self {
            CoreError::Invariant(violation) => Some(violation),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_state_conflicts_are_retryable() {
        assert!(CoreError::StateConflict("stale".into()).is_retryable());
        assert!(!CoreError::Storage("disk".into()).is_retryable());
        assert!(!CoreError::from(InvariantViolation::AlreadyPaid).is_retryable());
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            CoreError::InvoiceNotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CoreError::from(InvariantViolation::InstallmentPaid).kind(),
            ErrorKind::InvariantViolation
        );
        assert_eq!(
            CoreError::Validation("bad".into()).kind(),
            ErrorKind::Validation
        );
    }
}
