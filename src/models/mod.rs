pub mod audit;
pub mod criteria;
pub mod decision;
pub mod duplicate;
pub mod extraction;
pub mod project;
pub mod settings;
pub mod study;

pub use audit::*;
pub use criteria::*;
pub use decision::*;
pub use duplicate::*;
pub use extraction::*;
pub use project::*;
pub use settings::*;
pub use study::*;
