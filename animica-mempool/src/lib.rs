//! Transaction admission and pending-pool management.
//!
//! The pool is the exclusive owner of pending transaction storage. All
//! mutation goes through one writer lock so admission checks and watermark
//! updates stay linearizable; drains preserve (sender, nonce) order.

pub mod banlist;
pub mod errors;
pub mod policy;
pub mod pool;
pub mod watermark;

pub use banlist::{BanList, BanPolicy, Clock, ManualClock, SystemClock};
pub use errors::AdmissionError;
pub use policy::{AdmissionConfig, AdmissionPolicy, SenderUsage, TxMeta};
pub use pool::{Mempool, StateView};
pub use watermark::{FeeWatermark, Thresholds, WatermarkConfig};
