pub mod core;
pub mod pool;
pub mod source;


pub use self::core::*;
pub use self::pool::{Permit, PoolClosed, Semaphore};
pub use self::source::{ByteSource, FileSource, MappedSource, open_source};
