pub mod bucket;
pub mod constants;
pub mod orchestrator;
pub mod scene;
pub mod shapes;

pub use constants::{FrameInputs, MouseInput};
pub use orchestrator::{FrameReport, Simulation};
pub use scene::Scene;
pub use shapes::Shape;
