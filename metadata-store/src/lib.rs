//! Durable storage for collections, documents, chunks, sync jobs, and their transition
//! log, plus a keyword index and nested transactions spanning all of it.

mod error;
mod pagination;
mod schema;
mod store;
mod transaction;

pub use error::StoreError;
pub use pagination::{Page, PageRequest, PaginationError, MAX_LIMIT};
pub use store::{MetadataStore, SortField, SortOrder};
pub use transaction::{OperationDescriptor, OperationKind, TransactionManager, TxnHandle};
