//! headcni-plugins: delegate plugin chains with on-disk state
//!
//! Features:
//! - Chain execution with `prevResult` threading between steps
//! - Reverse-order rollback when a step fails during ADD
//! - Best-effort reverse teardown on DEL, rebuilt from disk alone
//! - Single-delegate mode with IPAM synthesized from the subnet environment
//! - Atomic, permission-restricted state files

pub mod chain;
pub mod delegate;
pub mod invoker;
pub mod result;
pub mod state;

pub use chain::{ChainExecutor, ContainerRef, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
pub use delegate::DelegateBuilder;
pub use invoker::{DelegateInvoker, ExecInvoker};
pub use result::{enhance_result, normalize_and_enhance};
pub use state::{PluginState, StateStore};
