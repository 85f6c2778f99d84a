//! Capture-side buffering.
//!
//! The input callback writes into a `ringbuf::HeapRb<f32>` producer whose
//! `push_slice` is wait-free and safe on the real-time audio thread. The
//! capture pump drains the consumer into `AudioFrame`s and hands them to a
//! `BatchAccumulator`.

pub mod batch;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the input device callback.
pub type FrameProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the capture pump thread.
pub type FrameConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^18 = 262 144 f32 samples ≈ 5.4 s at 48 kHz.
/// The pump drains every few milliseconds, so this only absorbs scheduler stalls.
pub const RING_CAPACITY: usize = 1 << 18;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_frame_ring() -> (FrameProducer, FrameConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
