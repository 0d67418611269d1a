//! Worker-side execution: task admission/scheduling, result framing, and
//! transmit admission control.

pub mod channel;
pub mod mem_man;
pub mod scheduler;
pub mod task;
pub mod transmit_mgr;

pub use channel::{BufferSendChannel, ChannelShared, SendChannel, TaskCtx};
pub use mem_man::{LockType, MemMan, PrepareOutcome, UnlimitedMemMan};
pub use scheduler::{BlendScheduler, GroupScheduler, ScanScheduler};
pub use task::Task;
pub use transmit_mgr::{TransmitLock, TransmitMgr};
