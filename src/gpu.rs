pub mod backend;
pub mod context;
pub mod encoder;
pub mod kernels;
pub mod pool;
pub mod preprocess;
pub mod readback;
pub mod timestamps;

pub use backend::{BindingSet, BufferFactory, ComputeBackend, DispatchSize};
pub use context::GpuContext;
pub use encoder::FrameEncoder;
pub use kernels::{Kernel, KernelLibrary};
pub use pool::ResourcePool;
pub use preprocess::ShaderPreprocessor;
pub use readback::{ParticleCounts, PresentationStats, ReadbackSynchronizer};
pub use timestamps::TimestampRecorder;
