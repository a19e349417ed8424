/// Allocator module - shared DMA-BUF allocation contract

pub mod buffer_allocator;

pub use buffer_allocator::*;
