mod pool;

pub use pool::{BufferPool, Pool, Reset, ScratchArena};
