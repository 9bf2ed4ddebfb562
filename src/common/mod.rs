pub mod mission;
pub mod scene;
