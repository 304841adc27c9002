pub mod t3;
pub mod tilson;
pub mod traits;
