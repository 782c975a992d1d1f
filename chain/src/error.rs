use cascade_store::StoreError;
use cascade_types::{AccountName, TransactionId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("unknown block: {0}")]
    UnknownBlock(String),

    #[error("there are no blocks to pop")]
    PopEmptyChain,

    #[error("block validation failed: {reason}")]
    BlockValidate { reason: String },

    #[error("block {0} does not link to any known block")]
    UnlinkableBlock(String),

    #[error("invalid transaction: {reason}")]
    Transaction { reason: String },

    #[error("transaction {id} is not unique")]
    TxDuplicate { id: TransactionId },

    #[error("transaction declares authority '{auth}' but does not have signatures for it")]
    TxMissingSigs { auth: String },

    #[error("action declares irrelevant authority '{auth}'; minimum authority is {min}")]
    TxIrrelevantAuth { auth: String, min: String },

    #[error("transaction bears irrelevant signatures from these keys: {keys}")]
    TxIrrelevantSig { keys: String },

    #[error("invalid signature on transaction {id}")]
    TxInvalidSignature { id: TransactionId },

    #[error("block log append out of order: expected block {expected}, got {got}")]
    LogAppendOutOfOrder { expected: u32, got: u32 },

    #[error("account not found: {0}")]
    AccountNotFound(AccountName),

    #[error("deferred transactions are not supported; block references {id}")]
    DeferredUnsupported { id: TransactionId },

    #[error("the controller is read-only")]
    ReadOnly,

    #[error("genesis misconfigured: {0}")]
    Genesis(String),

    #[error("state corruption: {0}")]
    StateCorruption(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("block log io error: {0}")]
    BlockLogIo(#[from] std::io::Error),

    #[error("block log codec error: {0}")]
    BlockLogCodec(String),

    #[error("config error: {0}")]
    Config(String),
}

impl ChainError {
    pub(crate) fn block_validate(reason: impl Into<String>) -> Self {
        Self::BlockValidate { reason: reason.into() }
    }

    pub(crate) fn transaction(reason: impl Into<String>) -> Self {
        Self::Transaction { reason: reason.into() }
    }
}
